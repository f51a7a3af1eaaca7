//! Configuration structures for treewatch sessions.
//!
//! This module provides the option set every watch session is built from:
//!
//! - [`Encoding`] - how reported paths are represented to the caller
//! - [`WatchOptions`] - recursion, debounce delay, encoding, and path patterns
//!
//! Every default lives here as a named constant and is covered by tests.
//! Options are resolved once, when a session is constructed, and never change
//! afterwards.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default debounce window in milliseconds.
pub const DEFAULT_DELAY_MS: u64 = 100;

/// External representation of the absolute path carried by a change event.
///
/// # Examples
///
/// ```
/// use tw_core::Encoding;
///
/// let encoding: Encoding = "hex".parse().unwrap();
/// assert_eq!(encoding, Encoding::Hex);
/// assert!("latin1".parse::<Encoding>().is_err());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Encoding {
    /// Native text string (`utf8`, also accepted as `utf-8` or `text`).
    #[default]
    Utf8,
    /// Raw path bytes, handed to the caller as-is.
    Buffer,
    /// Standard base64 (RFC 4648, padded) of the path bytes.
    Base64,
    /// Lowercase hexadecimal of the path bytes.
    Hex,
}

impl Encoding {
    /// Every recognized encoding, in declaration order.
    pub const ALL: [Self; 4] = [Self::Utf8, Self::Buffer, Self::Base64, Self::Hex];

    /// Returns the canonical name of this encoding.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Utf8 => "utf8",
            Self::Buffer => "buffer",
            Self::Base64 => "base64",
            Self::Hex => "hex",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "utf8" | "utf-8" | "text" => Ok(Self::Utf8),
            "buffer" => Ok(Self::Buffer),
            "base64" => Ok(Self::Base64),
            "hex" => Ok(Self::Hex),
            other => Err(ConfigError::invalid_encoding(other)),
        }
    }
}

impl TryFrom<String> for Encoding {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Options shared by every session created from one `watch` call.
///
/// Deserialization goes through an intermediate form so that an unknown
/// encoding is reported as [`ConfigError::InvalidEncoding`] by
/// [`WatchOptions::from_json`] rather than as a generic parse failure.
///
/// # Examples
///
/// ```
/// use tw_core::{Encoding, WatchOptions};
///
/// let options = WatchOptions::default();
/// assert!(!options.recursive);
/// assert_eq!(options.delay_ms, 100);
/// assert_eq!(options.encoding, Encoding::Utf8);
///
/// // A bare encoding string is shorthand for `{ "encoding": ... }`.
/// let options = WatchOptions::try_from("base64").unwrap();
/// assert_eq!(options.encoding, Encoding::Base64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWatchOptions")]
pub struct WatchOptions {
    /// Whether to watch every directory nested beneath a directory root.
    pub recursive: bool,

    /// Debounce window in milliseconds; `0` delivers every raw change.
    #[serde(rename = "delay")]
    pub delay_ms: u64,

    /// Representation of reported paths.
    pub encoding: Encoding,

    /// Regular expression a path must match to be reported.
    ///
    /// Include patterns never stop the tracker from descending into a
    /// directory; they only decide what is reported.
    pub filter: Option<String>,

    /// Regular expressions excluding matching paths.
    ///
    /// A directory matching an exclude pattern is never watched, so nothing
    /// beneath it is reported.
    pub exclude: Vec<String>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            delay_ms: DEFAULT_DELAY_MS,
            encoding: Encoding::Utf8,
            filter: None,
            exclude: Vec::new(),
        }
    }
}

impl WatchOptions {
    /// Sets recursive mode.
    #[must_use]
    pub const fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Sets the debounce window in milliseconds.
    #[must_use]
    pub const fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Sets the encoding of reported paths.
    #[must_use]
    pub const fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the include pattern.
    #[must_use]
    pub fn with_filter(mut self, pattern: impl Into<String>) -> Self {
        self.filter = Some(pattern.into());
        self
    }

    /// Adds an exclude pattern.
    #[must_use]
    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    /// Returns the debounce window.
    #[inline]
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Parses options from a JSON document.
    ///
    /// Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEncoding`] for an unknown `encoding`
    /// value and [`ConfigError::Parse`] for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawWatchOptions = serde_json::from_str(json)?;
        Self::try_from(raw)
    }

    /// Reads and parses options from a JSON file.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json(&contents)
    }
}

impl From<Encoding> for WatchOptions {
    fn from(encoding: Encoding) -> Self {
        Self::default().with_encoding(encoding)
    }
}

impl TryFrom<&str> for WatchOptions {
    type Error = ConfigError;

    fn try_from(encoding: &str) -> Result<Self, Self::Error> {
        Ok(Self::from(encoding.parse::<Encoding>()?))
    }
}

impl TryFrom<String> for WatchOptions {
    type Error = ConfigError;

    fn try_from(encoding: String) -> Result<Self, Self::Error> {
        Self::try_from(encoding.as_str())
    }
}

/// Wire form of [`WatchOptions`] with the encoding left unvalidated.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawWatchOptions {
    recursive: bool,
    #[serde(alias = "delay_ms")]
    delay: u64,
    encoding: Option<String>,
    filter: Option<String>,
    exclude: Vec<String>,
}

impl Default for RawWatchOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            delay: DEFAULT_DELAY_MS,
            encoding: None,
            filter: None,
            exclude: Vec::new(),
        }
    }
}

impl TryFrom<RawWatchOptions> for WatchOptions {
    type Error = ConfigError;

    fn try_from(raw: RawWatchOptions) -> Result<Self, Self::Error> {
        let encoding = raw
            .encoding
            .as_deref()
            .map_or(Ok(Encoding::default()), str::parse)?;
        Ok(Self {
            recursive: raw.recursive,
            delay_ms: raw.delay,
            encoding,
            filter: raw.filter,
            exclude: raw.exclude,
        })
    }
}
