//! Error types for the tw-core crate.
//!
//! This module provides the [`ConfigError`] type for option parsing and
//! validation failures. Every variant is raised before a session opens any
//! native watch.

use camino::Utf8PathBuf;

/// Errors that can occur while loading or validating watch options.
///
/// # Examples
///
/// ```
/// use tw_core::ConfigError;
///
/// let error = ConfigError::invalid_encoding("utf16");
/// assert!(error.to_string().contains("utf16"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested encoding is not one of `utf8`, `buffer`, `base64`, `hex`.
    #[error("invalid encoding '{0}': expected one of utf8, buffer, base64, hex")]
    InvalidEncoding(String),

    /// A configuration option has an invalid value.
    #[error("invalid configuration option '{option}': {reason}")]
    InvalidOption {
        /// The name of the invalid option.
        option: String,
        /// Explanation of why the option is invalid.
        reason: String,
    },

    /// An I/O error occurred while reading a configuration file.
    #[error("failed to read configuration {path}: {source}")]
    Io {
        /// The configuration file that could not be read.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the configuration document.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Creates a new [`ConfigError::InvalidEncoding`] error.
    #[inline]
    pub fn invalid_encoding(value: impl Into<String>) -> Self {
        Self::InvalidEncoding(value.into())
    }

    /// Creates a new [`ConfigError::InvalidOption`] error.
    #[inline]
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }
}
