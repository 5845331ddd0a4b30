//! Fixed- and variable-width packed integer vectors.
//!
//! Values are packed `width` bits each into little-endian 64-bit words. The
//! mutable flavor is backed by atomic words: writes to distinct indices whose
//! bit ranges fall in different words are naturally race-free, and writes
//! that share a word go through compare-and-swap loops. The single-word
//! atomic primitives (`compare_and_swap`, `saturating_increment`,
//! `claim_next_available`) are what the builders use to claim slots without
//! a mutex.
//!
//! The variable-width flavor is the same structure with the width computed
//! from the maximum value declared at construction; the width travels in the
//! subpart's JSON header.

use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::SeqstoreError;
use crate::membuf::MemBuf;
use crate::spiral::{CreateState, OpenState};
use crate::Result;

/// Bits needed to represent `max_value`; at least 1.
pub(crate) fn bits_for(max_value: u64) -> u32 {
    (64 - max_value.leading_zeros()).max(1)
}

fn value_mask(width: u32) -> u64 {
    if width == 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

fn words_for(len: usize, width: u32) -> usize {
    (len * width as usize).div_ceil(64)
}

#[derive(Debug, Serialize, Deserialize)]
struct PackedMeta {
    value_count: u64,
    bit_width: u32,
    max_value: u64,
}

const META: &str = "packed.json";
const VALUES: &str = "values";

/// A read-only packed integer vector over a [`MemBuf`].
#[derive(Clone)]
#[derive(Debug)]
pub struct PackedIntVec {
    words: MemBuf,
    width: u32,
    len: usize,
    max_value: u64,
}

impl PackedIntVec {
    #[inline]
    fn word(&self, idx: usize) -> u64 {
        LittleEndian::read_u64(&self.words[idx * 8..idx * 8 + 8])
    }

    #[inline]
    pub fn get(&self, idx: usize) -> u64 {
        debug_assert!(idx < self.len);
        let bit = idx * self.width as usize;
        let (w, off) = (bit / 64, (bit % 64) as u32);
        let mut v = self.word(w) >> off;
        if off + self.width > 64 {
            v |= self.word(w + 1) << (64 - off);
        }
        v & value_mask(self.width)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// The largest value this vector was declared to hold.
    pub fn max_value(&self) -> u64 {
        self.max_value
    }

    pub fn open(state: &OpenState) -> Result<PackedIntVec> {
        let meta: PackedMeta = state.open_json(META)?;
        let words = state.open_part(VALUES)?;
        let len = meta.value_count as usize;
        if words.len() < words_for(len, meta.bit_width) * 8 {
            return Err(SeqstoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "packed vector of {} values x {} bits needs {} bytes, part has {}",
                    len,
                    meta.bit_width,
                    words_for(len, meta.bit_width) * 8,
                    words.len()
                ),
            )));
        }
        Ok(PackedIntVec {
            words,
            width: meta.bit_width,
            len,
            max_value: meta.max_value,
        })
    }

    pub fn store(&self, state: &CreateState) -> Result<()> {
        state.create_json(
            META,
            &PackedMeta {
                value_count: self.len as u64,
                bit_width: self.width,
                max_value: self.max_value,
            },
        )?;
        state.put_part(VALUES, self.words.as_slice().to_vec());
        Ok(())
    }
}

/// A construction-time packed integer vector backed by atomic words.
pub struct MutablePackedIntVec {
    words: Vec<AtomicU64>,
    width: u32,
    len: usize,
    max_value: u64,
}

impl MutablePackedIntVec {
    /// A vector of `len` zeroes wide enough to hold `max_value`.
    pub fn new(len: usize, max_value: u64) -> MutablePackedIntVec {
        let width = bits_for(max_value);
        let mut words = Vec::with_capacity(words_for(len, width));
        words.resize_with(words_for(len, width), || AtomicU64::new(0));
        MutablePackedIntVec {
            words,
            width,
            len,
            max_value,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn max_value(&self) -> u64 {
        self.max_value
    }

    #[inline]
    pub fn get(&self, idx: usize) -> u64 {
        debug_assert!(idx < self.len);
        let bit = idx * self.width as usize;
        let (w, off) = (bit / 64, (bit % 64) as u32);
        let mut v = self.words[w].load(Ordering::Relaxed) >> off;
        if off + self.width > 64 {
            v |= self.words[w + 1].load(Ordering::Relaxed) << (64 - off);
        }
        v & value_mask(self.width)
    }

    /// Store `value` at `idx`. Safe to call concurrently for distinct
    /// indices; word-sharing neighbors are merged with CAS loops.
    pub fn set(&self, idx: usize, value: u64) {
        debug_assert!(idx < self.len);
        debug_assert!(value <= self.max_value || self.width == 64);
        let bit = idx * self.width as usize;
        let (w, off) = (bit / 64, (bit % 64) as u32);
        let lo_bits = self.width.min(64 - off);
        let lo_mask = value_mask(lo_bits) << off;
        let _ = self.words[w].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
            Some((cur & !lo_mask) | ((value & value_mask(lo_bits)) << off))
        });
        if lo_bits < self.width {
            let hi_bits = self.width - lo_bits;
            let hi_mask = value_mask(hi_bits);
            let _ = self.words[w + 1].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some((cur & !hi_mask) | (value >> lo_bits))
            });
        }
    }

    #[inline]
    fn single_word(&self, idx: usize) -> (usize, u32) {
        let bit = idx * self.width as usize;
        let (w, off) = (bit / 64, (bit % 64) as u32);
        // The atomic cell primitives only work on cells that do not straddle
        // a word boundary; all callers use widths that guarantee this.
        assert!(off + self.width <= 64);
        (w, off)
    }

    /// Atomic compare-and-swap of the cell at `idx`. The cell must fit in a
    /// single word.
    pub fn compare_and_swap(&self, idx: usize, expected: u64, new: u64) -> bool {
        let (w, off) = self.single_word(idx);
        let mask = value_mask(self.width) << off;
        loop {
            let cur = self.words[w].load(Ordering::Relaxed);
            if (cur & mask) >> off != expected {
                return false;
            }
            let next = (cur & !mask) | ((new & value_mask(self.width)) << off);
            if self.words[w]
                .compare_exchange_weak(cur, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Atomically increment the cell at `idx`, clamping at the maximum
    /// value. Returns `true` if the cell was already saturated (and so was
    /// left unchanged).
    pub fn saturating_increment(&self, idx: usize) -> bool {
        let (w, off) = self.single_word(idx);
        let mask = value_mask(self.width);
        loop {
            let cur = self.words[w].load(Ordering::Relaxed);
            let val = (cur >> off) & mask;
            if val == mask {
                return true;
            }
            let next = (cur & !(mask << off)) | ((val + 1) << off);
            if self.words[w]
                .compare_exchange_weak(cur, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return false;
            }
        }
    }

    /// Atomically find the next index at or after `start` whose value is
    /// strictly below the maximum and saturate it. Returns the claimed index,
    /// or `len()` if every remaining cell is already saturated.
    pub fn claim_next_available(&self, start: usize) -> usize {
        for idx in start..self.len {
            if !self.saturating_increment_to_max(idx) {
                return idx;
            }
        }
        self.len
    }

    /// Saturate the cell outright; returns `true` if it was already at max.
    fn saturating_increment_to_max(&self, idx: usize) -> bool {
        let (w, off) = self.single_word(idx);
        let mask = value_mask(self.width);
        loop {
            let cur = self.words[w].load(Ordering::Relaxed);
            let val = (cur >> off) & mask;
            if val == mask {
                return true;
            }
            let next = cur | (mask << off);
            if self.words[w]
                .compare_exchange_weak(cur, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return false;
            }
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.words.len() * 8];
        for (i, word) in self.words.iter().enumerate() {
            LittleEndian::write_u64(&mut bytes[i * 8..i * 8 + 8], word.load(Ordering::Relaxed));
        }
        bytes
    }

    /// Freeze into a read-only vector.
    pub fn into_reader(self) -> PackedIntVec {
        let bytes = self.to_bytes();
        PackedIntVec {
            words: MemBuf::from_vec(bytes),
            width: self.width,
            len: self.len,
            max_value: self.max_value,
        }
    }

    pub fn store(&self, state: &CreateState) -> Result<()> {
        state.create_json(
            META,
            &PackedMeta {
                value_count: self.len as u64,
                bit_width: self.width,
                max_value: self.max_value,
            },
        )?;
        state.put_part(VALUES, self.to_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spiral::{SpiralCreate, SpiralOpen};

    #[test]
    fn test_bits_for() {
        assert_eq!(bits_for(0), 1);
        assert_eq!(bits_for(1), 1);
        assert_eq!(bits_for(2), 2);
        assert_eq!(bits_for(255), 8);
        assert_eq!(bits_for(256), 9);
        assert_eq!(bits_for(u64::MAX), 64);
    }

    #[test]
    fn test_rw_across_word_boundaries() {
        // Width 13 guarantees cells straddling word boundaries.
        let vec = MutablePackedIntVec::new(100, 8191);
        assert_eq!(vec.width(), 13);
        for i in 0..100 {
            vec.set(i, (i as u64 * 97) % 8192);
        }
        for i in 0..100 {
            assert_eq!(vec.get(i), (i as u64 * 97) % 8192, "index {}", i);
        }
        let frozen = vec.into_reader();
        for i in 0..100 {
            assert_eq!(frozen.get(i), (i as u64 * 97) % 8192);
        }
    }

    #[test]
    fn test_overwrite() {
        let vec = MutablePackedIntVec::new(4, 3);
        vec.set(1, 1);
        vec.set(2, 2);
        assert_eq!(vec.get(0), 0);
        assert_eq!(vec.get(1), 1);
        assert_eq!(vec.get(2), 2);
        vec.set(2, 0);
        assert_eq!(vec.get(2), 0);
        assert_eq!(vec.get(1), 1);
    }

    #[test]
    fn test_saturating_increment() {
        let vec = MutablePackedIntVec::new(1, 3);
        assert!(!vec.saturating_increment(0));
        assert!(!vec.saturating_increment(0));
        assert!(!vec.saturating_increment(0));
        assert_eq!(vec.get(0), 3);
        // Saturated now.
        assert!(vec.saturating_increment(0));
        assert_eq!(vec.get(0), 3);
    }

    #[test]
    fn test_compare_and_swap() {
        let vec = MutablePackedIntVec::new(8, 15);
        vec.set(3, 7);
        assert!(!vec.compare_and_swap(3, 6, 9));
        assert_eq!(vec.get(3), 7);
        assert!(vec.compare_and_swap(3, 7, 9));
        assert_eq!(vec.get(3), 9);
    }

    #[test]
    fn test_claim_next_available() {
        let vec = MutablePackedIntVec::new(5, 1);
        assert_eq!(vec.claim_next_available(0), 0);
        assert_eq!(vec.claim_next_available(0), 1);
        assert_eq!(vec.claim_next_available(3), 3);
        assert_eq!(vec.claim_next_available(2), 2);
        assert_eq!(vec.claim_next_available(0), 4);
        // Everything claimed.
        assert_eq!(vec.claim_next_available(0), vec.len());
    }

    #[test]
    fn test_spiral_round_trip() {
        let vec = MutablePackedIntVec::new(300, 100);
        for i in 0..300 {
            vec.set(i, (i as u64 * 31) % 101);
        }
        let create = SpiralCreate::mem();
        vec.store(&create.create().subpart("vec")).unwrap();
        let open = SpiralOpen::from_mem(create.close_mem().unwrap()).unwrap();
        let decoded = PackedIntVec::open(&open.open().subpart("vec")).unwrap();
        assert_eq!(decoded.len(), 300);
        assert_eq!(decoded.max_value(), 100);
        for i in 0..300 {
            assert_eq!(decoded.get(i), (i as u64 * 31) % 101);
        }
    }
}
