//! Path encoding for delivered change events.
//!
//! A change event carries the resolved absolute path in the representation
//! the caller asked for with [`Encoding`]. Encoding is pure and infallible;
//! decoding exists so callers can recover the original path bytes.

use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use tw_core::Encoding;

/// A path in its configured external representation.
///
/// # Examples
///
/// ```
/// use tw_watcher::{EncodedName, encode};
/// use tw_core::Encoding;
///
/// let name = encode(b"/tmp/a", Encoding::Hex);
/// assert_eq!(name, EncodedName::Text("2f746d702f61".to_owned()));
/// assert_eq!(name.decode(Encoding::Hex).unwrap(), b"/tmp/a");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum EncodedName {
    /// Textual form (`utf8`, `base64`, `hex`).
    Text(String),
    /// Raw bytes (`buffer`).
    Bytes(Vec<u8>),
}

impl EncodedName {
    /// Returns the textual form, if this is not a raw byte name.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Bytes(_) => None,
        }
    }

    /// Recovers the original path bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the representation does not match
    /// `encoding` or is not valid for it.
    pub fn decode(&self, encoding: Encoding) -> Result<Vec<u8>, DecodeError> {
        match (self, encoding) {
            (Self::Text(text), Encoding::Utf8) => Ok(text.as_bytes().to_vec()),
            (Self::Bytes(bytes), Encoding::Buffer) => Ok(bytes.clone()),
            (Self::Text(text), Encoding::Base64) => Ok(STANDARD.decode(text)?),
            (Self::Text(text), Encoding::Hex) => Ok(hex::decode(text)?),
            (_, expected) => Err(DecodeError::Mismatch(expected)),
        }
    }
}

impl fmt::Display for EncodedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Bytes(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
        }
    }
}

/// Errors that can occur when decoding an [`EncodedName`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The name was not produced with the given encoding.
    #[error("name is not in {0} representation")]
    Mismatch(Encoding),

    /// Invalid base64 text.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Invalid hexadecimal text.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Encodes absolute path bytes in the given representation.
///
/// `Utf8` is lossy for non-UTF-8 input; `buffer`, `base64` and `hex` keep
/// every byte.
#[must_use]
pub fn encode(path: &[u8], encoding: Encoding) -> EncodedName {
    match encoding {
        Encoding::Utf8 => EncodedName::Text(String::from_utf8_lossy(path).into_owned()),
        Encoding::Buffer => EncodedName::Bytes(path.to_vec()),
        Encoding::Base64 => EncodedName::Text(STANDARD.encode(path)),
        Encoding::Hex => EncodedName::Text(hex::encode(path)),
    }
}

/// Encodes a resolved path from its raw bytes.
#[inline]
#[must_use]
pub fn encode_path(path: &Path, encoding: Encoding) -> EncodedName {
    encode(&path_bytes(path), encoding)
}

/// Returns the bytes of `path` as the operating system stores them.
#[cfg(unix)]
#[must_use]
pub fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;

    Cow::Borrowed(path.as_os_str().as_bytes())
}

/// Returns the bytes of `path`; lossy where the platform path is not UTF-8.
#[cfg(not(unix))]
#[must_use]
pub fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    match path.to_string_lossy() {
        Cow::Borrowed(text) => Cow::Borrowed(text.as_bytes()),
        Cow::Owned(text) => Cow::Owned(text.into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/home/user/project/src/main.rs";

    #[test]
    fn test_encode_utf8() {
        let name = encode_path(Path::new(PATH), Encoding::Utf8);
        assert_eq!(name.as_text(), Some(PATH));
        assert_eq!(name.to_string(), PATH);
    }

    #[test]
    fn test_encode_buffer_is_raw_bytes() {
        let name = encode_path(Path::new(PATH), Encoding::Buffer);
        assert_eq!(name, EncodedName::Bytes(PATH.as_bytes().to_vec()));
        assert!(name.as_text().is_none());
    }

    #[test]
    fn test_encode_base64() {
        let name = encode(b"/tmp/f", Encoding::Base64);
        assert_eq!(name.as_text(), Some("L3RtcC9m"));
    }

    #[test]
    fn test_encode_hex() {
        let name = encode(b"/a", Encoding::Hex);
        assert_eq!(name.as_text(), Some("2f61"));
    }

    #[test]
    fn test_every_encoding_round_trips() {
        let inputs = [PATH, "/tmp/with space/ü.txt", "/"];
        for input in inputs {
            for encoding in Encoding::ALL {
                let name = encode(input.as_bytes(), encoding);
                assert_eq!(
                    name.decode(encoding).unwrap(),
                    input.as_bytes(),
                    "{encoding} round trip of {input}"
                );
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_keeps_every_byte() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let raw: &[u8] = b"/tmp/bad\xff.txt";
        let path = Path::new(OsStr::from_bytes(raw));
        for encoding in [Encoding::Buffer, Encoding::Base64, Encoding::Hex] {
            let name = encode_path(path, encoding);
            assert_eq!(name.decode(encoding).unwrap(), raw, "{encoding}");
        }
        assert_eq!(
            encode_path(path, Encoding::Utf8).as_text(),
            Some("/tmp/bad\u{fffd}.txt")
        );
    }

    #[test]
    fn test_decode_mismatch() {
        let name = encode(b"/a", Encoding::Buffer);
        assert!(matches!(
            name.decode(Encoding::Hex),
            Err(DecodeError::Mismatch(Encoding::Hex))
        ));
    }

    #[test]
    fn test_decode_invalid_hex() {
        let name = EncodedName::Text("zz".to_owned());
        assert!(matches!(name.decode(Encoding::Hex), Err(DecodeError::Hex(_))));
    }

    #[test]
    fn test_serialize_untagged() {
        let text = serde_json::to_string(&encode(b"/a", Encoding::Utf8)).unwrap();
        assert_eq!(text, r#""/a""#);
        let bytes = serde_json::to_string(&encode(b"/a", Encoding::Buffer)).unwrap();
        assert_eq!(bytes, "[47,97]");
    }
}
