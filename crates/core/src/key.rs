//! Request path to cache key codec.
//!
//! A key is the lowercase hex encoding of the path's UTF-8 bytes. The
//! encoding is injective, reversible and uses only `[0-9a-f]`, so it is
//! safe as a file name on case-insensitive filesystems and can never
//! introduce a separator or a traversal sequence.

use crate::error::{Error, Result};
use std::fmt;

/// Maximum length of a single on-disk name segment.
///
/// Long keys are split into directories so no component exceeds the
/// usual 255-byte `NAME_MAX`.
pub const SEGMENT_LEN: usize = 128;

/// Marker appended to every non-final segment. Directories therefore
/// never share a name with a file.
const DIR_SUFFIX: char = '-';

/// Storage key for a request path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    path: String,
    encoded: String,
}

impl CacheKey {
    /// Encode a request path. Total over all strings.
    pub fn encode(path: &str) -> Self {
        Self {
            path: path.to_string(),
            encoded: hex::encode(path.as_bytes()),
        }
    }

    /// Recover a key from its encoded form.
    pub fn decode(encoded: &str) -> Result<Self> {
        if encoded.is_empty() {
            return Err(Error::InvalidKey("empty key".to_string()));
        }
        if !encoded.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(Error::InvalidKey(format!(
                "key contains non-hex characters: {encoded}"
            )));
        }
        let bytes = hex::decode(encoded).map_err(|e| Error::InvalidKey(e.to_string()))?;
        let path = String::from_utf8(bytes)
            .map_err(|_| Error::InvalidKey(format!("key is not valid UTF-8: {encoded}")))?;
        Ok(Self {
            path,
            encoded: encoded.to_string(),
        })
    }

    /// The request path this key was derived from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The flat encoded form.
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Relative location of the backing object inside the storage root.
    pub fn storage_path(&self) -> String {
        let chunks: Vec<&str> = self
            .encoded
            .as_bytes()
            .chunks(SEGMENT_LEN)
            // hex output is ASCII, every chunk boundary is a char boundary
            .map(|c| std::str::from_utf8(c).unwrap_or_default())
            .collect();

        let mut out = String::with_capacity(self.encoded.len() + chunks.len() * 2);
        for (i, chunk) in chunks.iter().enumerate() {
            out.push_str(chunk);
            if i + 1 < chunks.len() {
                out.push(DIR_SUFFIX);
                out.push('/');
            }
        }
        out
    }

    /// Inverse of [`CacheKey::storage_path`].
    pub fn from_storage_path(location: &str) -> Result<Self> {
        let segments: Vec<&str> = location.split('/').collect();
        let last = segments.len() - 1;
        let mut encoded = String::with_capacity(location.len());

        for (i, segment) in segments.iter().enumerate() {
            if i < last {
                let dir = segment.strip_suffix(DIR_SUFFIX).ok_or_else(|| {
                    Error::InvalidKey(format!("unexpected directory segment: {segment}"))
                })?;
                if dir.len() != SEGMENT_LEN {
                    return Err(Error::InvalidKey(format!(
                        "directory segment has wrong length: {segment}"
                    )));
                }
                encoded.push_str(dir);
            } else {
                if segment.is_empty() || segment.len() > SEGMENT_LEN {
                    return Err(Error::InvalidKey(format!(
                        "file segment has wrong length: {segment}"
                    )));
                }
                encoded.push_str(segment);
            }
        }

        Self::decode(&encoded)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}
