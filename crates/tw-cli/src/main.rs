//! CLI entry point for treewatch.
//!
//! Watches one or more paths and prints one line per change event until
//! interrupted.
//!
//! # Usage
//!
//! ```bash
//! treewatch [OPTIONS] <PATH>...
//!
//! # Watch a project tree, ignoring build output
//! treewatch --recursive --exclude target .
//!
//! # Report every raw change of one file as JSON lines
//! treewatch --delay 0 --json Cargo.toml
//!
//! # Start from a configuration file
//! treewatch --config treewatch.json src tests
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use tw_core::{Encoding, WatchOptions};
use tw_watcher::{ChangeEvent, Notification, WatchPaths, watch};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Watch files and directories and print change events.
///
/// Each event is printed as `<kind> <name>`, where kind is `update` or
/// `remove` and name is the absolute path in the selected encoding.
#[derive(Debug, Parser)]
#[command(name = "treewatch", version, about, long_about = None)]
struct Cli {
    /// Paths to watch. More than one path composes a single stream.
    #[arg(required = true, num_args = 1..)]
    paths: Vec<PathBuf>,

    /// Watch every directory nested beneath directory paths.
    #[arg(short, long, env = "TREEWATCH_RECURSIVE")]
    recursive: bool,

    /// Debounce window in milliseconds; 0 reports every raw change.
    #[arg(short, long, env = "TREEWATCH_DELAY")]
    delay: Option<u64>,

    /// Path encoding: utf8, buffer, base64 or hex.
    #[arg(short, long, env = "TREEWATCH_ENCODING")]
    encoding: Option<Encoding>,

    /// Only report paths matching this regular expression.
    #[arg(short, long)]
    filter: Option<String>,

    /// Never watch or report paths matching this regular expression.
    #[arg(short = 'x', long)]
    exclude: Vec<String>,

    /// JSON file with watch options; flags override its values.
    #[arg(short, long, env = "TREEWATCH_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Print events as JSON lines.
    #[arg(long)]
    json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long)]
    no_color: bool,
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default. Logs go
/// to stderr so that stdout carries only events.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},mio=warn,notify=warn"))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(use_ansi)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Builds [`WatchOptions`] from the config file and CLI flags.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed.
fn build_options(cli: &Cli) -> color_eyre::Result<WatchOptions> {
    let mut options = match &cli.config {
        Some(path) => WatchOptions::from_file(path)?,
        None => WatchOptions::default(),
    };

    if cli.recursive {
        options.recursive = true;
    }
    if let Some(delay) = cli.delay {
        options.delay_ms = delay;
    }
    if let Some(encoding) = cli.encoding {
        options.encoding = encoding;
    }
    if let Some(filter) = &cli.filter {
        options.filter = Some(filter.clone());
    }
    options.exclude.extend(cli.exclude.iter().cloned());

    Ok(options)
}

/// Maps the positional paths to a single or composed watch.
fn watch_paths(paths: &[PathBuf]) -> WatchPaths {
    match paths {
        [single] => WatchPaths::from(single.clone()),
        many => WatchPaths::from(many.to_vec()),
    }
}

// =============================================================================
// COMMAND IMPLEMENTATION
// =============================================================================

/// Watches until interrupted, printing every change.
///
/// # Errors
///
/// Returns an error if the watch cannot be started or stdout is closed.
async fn run(cli: &Cli) -> color_eyre::Result<()> {
    let options = build_options(cli)?;
    info!(
        paths = ?cli.paths,
        recursive = options.recursive,
        delay_ms = options.delay_ms,
        encoding = %options.encoding,
        "Starting watch"
    );

    let mut watcher = watch(watch_paths(&cli.paths), options).await?;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
            notification = watcher.recv() => match notification {
                Some(Notification::Change(event)) => print_event(&event, cli.json)?,
                Some(Notification::Ready) => info!(roots = ?watcher.roots(), "Watching"),
                Some(Notification::Error(err)) => tracing::error!(error = %err, "Watch error"),
                Some(Notification::Close) | None => break,
            },
        }
    }

    watcher.shutdown().await?;
    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(err) => tracing::warn!(error = %err, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

/// Formats one event as a line of text or JSON.
fn format_event(event: &ChangeEvent, json: bool) -> color_eyre::Result<String> {
    if json {
        Ok(serde_json::to_string(event)?)
    } else {
        Ok(format!("{} {}", event.kind, event.name))
    }
}

/// Prints one event to stdout.
fn print_event(event: &ChangeEvent, json: bool) -> color_eyre::Result<()> {
    let line = format_event(event, json)?;
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{line}")?;
    handle.flush()?;
    Ok(())
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Watch until interrupted
    run(&cli).await
}

#[cfg(test)]
mod tests {
    use tw_watcher::EventKind;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("treewatch").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn test_paths_are_required() {
        assert!(Cli::try_parse_from(["treewatch"]).is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = parse(&["-r", "--delay", "0", "--encoding", "hex", "-x", "target", "src"]);
        let options = build_options(&cli).unwrap();

        assert!(options.recursive);
        assert_eq!(options.delay_ms, 0);
        assert_eq!(options.encoding, Encoding::Hex);
        assert_eq!(options.exclude, vec!["target".to_owned()]);
    }

    #[test]
    fn test_invalid_encoding_flag_is_rejected() {
        let result = Cli::try_parse_from(["treewatch", "--encoding", "latin1", "src"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_file_is_merged_with_flags() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("treewatch.json");
        std::fs::write(&config, r#"{"recursive": true, "delay": 20, "exclude": ["dist"]}"#).unwrap();

        let cli = parse(&["--config", config.to_str().unwrap(), "--exclude", "target", "src"]);
        let options = build_options(&cli).unwrap();

        assert!(options.recursive);
        assert_eq!(options.delay_ms, 20);
        assert_eq!(options.exclude, vec!["dist".to_owned(), "target".to_owned()]);
    }

    #[test]
    fn test_multiple_paths_compose() {
        let single = parse(&["src"]);
        assert!(!watch_paths(&single.paths).is_many());

        let many = parse(&["src", "tests"]);
        assert!(watch_paths(&many.paths).is_many());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_path_argument_is_accepted() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let arg = OsString::from_vec(b"bad\xff".to_vec());
        let cli = Cli::try_parse_from([OsString::from("treewatch"), arg.clone()]).unwrap();
        assert_eq!(cli.paths, vec![PathBuf::from(arg)]);
    }

    #[test]
    fn test_format_event() {
        let event = ChangeEvent::new(EventKind::Remove, PathBuf::from("/w/a"), Encoding::Utf8);
        assert_eq!(format_event(&event, false).unwrap(), "remove /w/a");

        let json: serde_json::Value = serde_json::from_str(&format_event(&event, true).unwrap()).unwrap();
        assert_eq!(json["kind"], "remove");
        assert_eq!(json["path"], "/w/a");
    }
}
