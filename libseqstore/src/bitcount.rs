//! Rank-1 bit arrays ("bitcounts").
//!
//! A bitcount answers `rank(i)` — the number of set bits strictly below `i`
//! — in constant time using per-word prefix sums computed by a finalize
//! pass, and `select(k)` — the position of the k-th set bit — by a binary
//! search over those sums. The seqset's `prev_*` bitmaps and the mergemap
//! are bitcounts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::SeqstoreError;
use crate::membuf::MemBuf;
use crate::spiral::{CreateState, OpenState};
use crate::Result;

#[derive(Debug, Serialize, Deserialize)]
struct BitcountMeta {
    num_bits: u64,
}

const META: &str = "bitcount.json";
const BITS: &str = "bits";
const COUNTS: &str = "counts";

/// Sampling interval for the optional select acceleration index.
const SELECT_SAMPLE: u64 = 4096;

fn word_count(nbits: usize) -> usize {
    nbits.div_ceil(64)
}

/// A bit array under construction. Bits may be set concurrently; distinct
/// bits never interfere because updates are atomic ORs.
pub struct BitcountBuilder {
    bits: Vec<AtomicU64>,
    nbits: usize,
}

impl BitcountBuilder {
    pub fn new(nbits: usize) -> BitcountBuilder {
        let mut bits = Vec::with_capacity(word_count(nbits));
        bits.resize_with(word_count(nbits), || AtomicU64::new(0));
        BitcountBuilder { bits, nbits }
    }

    pub fn len(&self) -> usize {
        self.nbits
    }

    pub fn is_empty(&self) -> bool {
        self.nbits == 0
    }

    #[inline]
    pub fn set(&self, idx: usize, value: bool) {
        debug_assert!(idx < self.nbits);
        let mask = 1u64 << (idx % 64);
        if value {
            self.bits[idx / 64].fetch_or(mask, Ordering::Relaxed);
        } else {
            self.bits[idx / 64].fetch_and(!mask, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        debug_assert!(idx < self.nbits);
        self.bits[idx / 64].load(Ordering::Relaxed) & (1u64 << (idx % 64)) != 0
    }

    /// Compute the prefix sums and freeze.
    pub fn finalize(self) -> Bitcount {
        let nwords = self.bits.len();
        let mut bit_bytes = vec![0u8; nwords * 8];
        let mut count_bytes = vec![0u8; (nwords + 1) * 8];
        let mut total = 0u64;
        for (i, word) in self.bits.iter().enumerate() {
            let w = word.load(Ordering::Relaxed);
            LittleEndian::write_u64(&mut bit_bytes[i * 8..i * 8 + 8], w);
            LittleEndian::write_u64(&mut count_bytes[i * 8..i * 8 + 8], total);
            total += w.count_ones() as u64;
        }
        LittleEndian::write_u64(&mut count_bytes[nwords * 8..nwords * 8 + 8], total);
        Bitcount {
            bits: MemBuf::from_vec(bit_bytes),
            counts: MemBuf::from_vec(count_bytes),
            nbits: self.nbits,
            select_index: OnceLock::new(),
        }
    }
}

/// A finalized rank-1 bit array.
#[derive(Debug)]
pub struct Bitcount {
    bits: MemBuf,
    counts: MemBuf,
    nbits: usize,
    select_index: OnceLock<Vec<u64>>,
}

impl Bitcount {
    #[inline]
    fn word(&self, idx: usize) -> u64 {
        LittleEndian::read_u64(&self.bits[idx * 8..idx * 8 + 8])
    }

    #[inline]
    fn count_word(&self, idx: usize) -> u64 {
        LittleEndian::read_u64(&self.counts[idx * 8..idx * 8 + 8])
    }

    pub fn len(&self) -> usize {
        self.nbits
    }

    pub fn is_empty(&self) -> bool {
        self.nbits == 0
    }

    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        debug_assert!(idx < self.nbits);
        self.word(idx / 64) & (1u64 << (idx % 64)) != 0
    }

    /// Number of set bits strictly below `idx`; `idx` may equal `len()`.
    #[inline]
    pub fn rank(&self, idx: usize) -> u64 {
        debug_assert!(idx <= self.nbits);
        let (w, off) = (idx / 64, idx % 64);
        if off == 0 {
            self.count_word(w)
        } else {
            self.count_word(w) + (self.word(w) & ((1u64 << off) - 1)).count_ones() as u64
        }
    }

    /// Total number of set bits.
    pub fn total_set(&self) -> u64 {
        self.count_word(word_count(self.nbits))
    }

    /// Position of the k-th (0-based) set bit; `len()` when `k` equals
    /// [`Bitcount::total_set`]. O(log n), or O(1)-ish once
    /// [`Bitcount::make_select_index`] has run.
    pub fn select(&self, k: u64) -> usize {
        if k >= self.total_set() {
            return self.nbits;
        }
        let nwords = word_count(self.nbits);
        let (mut lo, mut hi) = (0usize, nwords);
        if let Some(index) = self.select_index.get() {
            let slot = (k / SELECT_SAMPLE) as usize;
            lo = index[slot] as usize;
            if slot + 1 < index.len() {
                hi = (index[slot + 1] as usize + 1).min(nwords);
            }
        }
        // Largest word w with counts[w] <= k.
        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            if self.count_word(mid) <= k {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        let mut word = self.word(lo);
        let mut need = k - self.count_word(lo);
        loop {
            let tz = word.trailing_zeros() as usize;
            if need == 0 {
                return lo * 64 + tz;
            }
            word &= word - 1;
            need -= 1;
        }
    }

    /// Build the in-memory select acceleration index. Idempotent; installed
    /// once, so concurrent callers see either nothing or the whole index.
    pub fn make_select_index(&self) {
        let _ = self.select_index.get_or_init(|| {
            let nwords = word_count(self.nbits);
            let mut index = vec![0u64];
            let mut sample = 1u64;
            for w in 0..nwords {
                let after = self.count_word(w) + self.word(w).count_ones() as u64;
                // The (sample * SELECT_SAMPLE)-th set bit lives in word w.
                while sample * SELECT_SAMPLE < after {
                    index.push(w as u64);
                    sample += 1;
                }
            }
            index
        });
    }

    pub fn store(&self, state: &CreateState) -> Result<()> {
        state.create_json(
            META,
            &BitcountMeta {
                num_bits: self.nbits as u64,
            },
        )?;
        state.put_part(BITS, self.bits.as_slice().to_vec());
        state.put_part(COUNTS, self.counts.as_slice().to_vec());
        Ok(())
    }

    pub fn open(state: &OpenState) -> Result<Bitcount> {
        let meta: BitcountMeta = state.open_json(META)?;
        let nbits = meta.num_bits as usize;
        let bits = state.open_part(BITS)?;
        let counts = state.open_part(COUNTS)?;
        if bits.len() < word_count(nbits) * 8 || counts.len() < (word_count(nbits) + 1) * 8 {
            return Err(SeqstoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("bitcount of {} bits has truncated parts", nbits),
            )));
        }
        Ok(Bitcount {
            bits,
            counts,
            nbits,
            select_index: OnceLock::new(),
        })
    }
}
