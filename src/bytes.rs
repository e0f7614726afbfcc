//! Owned, cheaply-cloneable byte ranges used for keys, values, and pages.
//!
//! The tree never interprets these bytes itself; ordering and sizing are
//! delegated entirely to caller-supplied functions (see [`crate::codec::TreeFunctions`]).

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// An immutable view of bytes that may own its storage or be a cheap slice of
/// a larger shared buffer (e.g. a parsed page).
#[derive(Clone, Eq, PartialEq, Hash, Default)]
pub struct Bytes {
    data: Arc<[u8]>,
    start: usize,
    end: usize,
}

impl Bytes {
    /// The empty byte range (used for an internal node's implicit branch-0 minKey).
    pub fn empty() -> Self {
        Self {
            data: Arc::from([]),
            start: 0,
            end: 0,
        }
    }

    pub fn copy_from(bytes: &[u8]) -> Self {
        Self {
            data: Arc::from(bytes),
            start: 0,
            end: bytes.len(),
        }
    }

    pub fn from_vec(v: Vec<u8>) -> Self {
        let len = v.len();
        Self {
            data: Arc::from(v.into_boxed_slice()),
            start: 0,
            end: len,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// Return a sub-range of this byte range without copying the underlying storage.
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        let start = self.start + offset;
        let end = start + len;
        assert!(end <= self.end, "slice out of bounds");
        Self {
            data: Arc::clone(&self.data),
            start,
            end,
        }
    }
}

impl Deref for Bytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Self::from_vec(v)
    }
}

impl From<&[u8]> for Bytes {
    fn from(v: &[u8]) -> Self {
        Self::copy_from(v)
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes({} bytes)", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero_length() {
        assert_eq!(Bytes::empty().len(), 0);
        assert!(Bytes::empty().is_empty());
    }

    #[test]
    fn slice_shares_storage() {
        let page = Bytes::copy_from(b"hello world");
        let word = page.slice(6, 5);
        assert_eq!(word.as_slice(), b"world");
    }

    #[test]
    fn equality_is_by_content() {
        let a = Bytes::copy_from(b"abc");
        let b = Bytes::from_vec(b"abc".to_vec());
        assert_eq!(a, b);
    }
}
