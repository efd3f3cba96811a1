//! Binary-safe store keys.
//!
//! Keys embed raw account addresses, which are arbitrary bytes, so a key is
//! a byte string rather than a `String`. Builders append `:`-separated
//! segments in the layout every deployment already has on disk.

use std::fmt;

use offorder_types::Address;

/// A store key (arbitrary bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Key(Vec<u8>);

impl Key {
    /// Start a key at the given namespace prefix.
    #[must_use]
    pub fn root(prefix: &str) -> Self {
        Self(prefix.as_bytes().to_vec())
    }

    /// Append `:segment`.
    #[must_use]
    pub fn push(mut self, segment: impl AsRef<[u8]>) -> Self {
        self.0.push(b':');
        self.0.extend_from_slice(segment.as_ref());
        self
    }

    /// Append `:<address bytes>`.
    #[must_use]
    pub fn push_addr(self, addr: &Address) -> Self {
        self.push(addr.as_bytes())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}
