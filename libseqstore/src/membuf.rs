//! Shared read-only byte buffers backing the on-disk indexes.
//!
//! A [`MemBuf`] is either a private RAM buffer or a view into a memory map;
//! either way it dereferences to `&[u8]` and clones cheaply. Index readers
//! never care which backing they got, and there is no per-access dispatch
//! beyond the slice bounds.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use memmap2::Mmap;

#[derive(Clone)]
enum Backing {
    OwnedRam(Arc<Vec<u8>>),
    MmapView(Arc<Mmap>),
}

/// A cheaply cloneable read-only byte region.
#[derive(Clone)]
pub struct MemBuf {
    backing: Backing,
    offset: usize,
    len: usize,
}

impl MemBuf {
    /// Wrap an owned buffer.
    pub fn from_vec(data: Vec<u8>) -> MemBuf {
        let len = data.len();
        MemBuf {
            backing: Backing::OwnedRam(Arc::new(data)),
            offset: 0,
            len,
        }
    }

    pub(crate) fn from_arc(data: Arc<Vec<u8>>) -> MemBuf {
        let len = data.len();
        MemBuf {
            backing: Backing::OwnedRam(data),
            offset: 0,
            len,
        }
    }

    pub(crate) fn from_mmap(map: Arc<Mmap>, offset: usize, len: usize) -> MemBuf {
        debug_assert!(offset + len <= map.len());
        MemBuf {
            backing: Backing::MmapView(map),
            offset,
            len,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        match &self.backing {
            Backing::OwnedRam(data) => &data[self.offset..self.offset + self.len],
            Backing::MmapView(map) => &map[self.offset..self.offset + self.len],
        }
    }

    /// A sub-view of this buffer.
    pub fn slice(&self, start: usize, len: usize) -> MemBuf {
        assert!(start + len <= self.len);
        MemBuf {
            backing: self.backing.clone(),
            offset: self.offset + start,
            len,
        }
    }
}

impl Deref for MemBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for MemBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.backing {
            Backing::OwnedRam(_) => "ram",
            Backing::MmapView(_) => "mmap",
        };
        write!(f, "MemBuf({}, {} bytes)", kind, self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_round_trip() {
        let buf = MemBuf::from_vec(vec![1, 2, 3, 4]);
        assert_eq!(buf.len(), 4);
        assert_eq!(&buf[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_slice() {
        let buf = MemBuf::from_vec(vec![0, 1, 2, 3, 4, 5]);
        let sub = buf.slice(2, 3);
        assert_eq!(&sub[..], &[2, 3, 4]);
        let subsub = sub.slice(1, 1);
        assert_eq!(&subsub[..], &[3]);
    }

    #[test]
    #[should_panic]
    fn test_slice_out_of_bounds() {
        let buf = MemBuf::from_vec(vec![0, 1]);
        let _ = buf.slice(1, 2);
    }
}
