//! An injective map from a sparse source space onto a dense destination
//! space.
//!
//! Each destination id has exactly one source id; several destinations may
//! share a source. Only two tables are stored: a bitcount over destinations
//! marking the first destination of each group, and a packed array giving
//! each group's source id in ascending order. That is enough to answer both
//! `source -> [lo, hi)` range lookups and `destination -> source` reverse
//! lookups. The readmap uses one of these to attach read ids to seqset
//! entries.

use serde::{Deserialize, Serialize};

use crate::bitcount::{Bitcount, BitcountBuilder};
use crate::error::SeqstoreError;
use crate::packed::{MutablePackedIntVec, PackedIntVec};
use crate::spiral::{CreateState, OpenState};
use crate::Result;

#[derive(Debug, Serialize, Deserialize)]
struct SparseMultiMeta {
    source_count: u64,
    dest_count: u64,
}

const META: &str = "sparse.json";
const FIRST_IN_GROUP: &str = "first_in_group";
const SOURCE_OF_GROUP: &str = "source_of_group";

#[derive(Debug)]
pub struct SparseMulti {
    first_in_group: Bitcount,
    source_of_group: PackedIntVec,
    source_count: u64,
}

impl SparseMulti {
    /// Number of destination ids.
    pub fn dest_count(&self) -> usize {
        self.first_in_group.len()
    }

    /// Size of the source space.
    pub fn source_count(&self) -> u64 {
        self.source_count
    }

    /// Number of distinct sources with at least one destination.
    pub fn group_count(&self) -> u64 {
        self.first_in_group.total_set()
    }

    fn group_start(&self, group: u64) -> u64 {
        self.first_in_group.select(group) as u64
    }

    /// First group whose source id is >= `source`.
    fn group_lower_bound(&self, source: u64) -> u64 {
        let (mut lo, mut hi) = (0u64, self.group_count());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.source_of_group.get(mid as usize) < source {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// The destination range `[lo, hi)` attached to `source`; empty when the
    /// source has no destinations.
    pub fn lookup(&self, source: u64) -> (u64, u64) {
        let g = self.group_lower_bound(source);
        let start = self.group_start(g);
        if g < self.group_count() && self.source_of_group.get(g as usize) == source {
            (start, self.group_start(g + 1))
        } else {
            (start, start)
        }
    }

    /// The destination range covering every source in `[start, limit)`.
    pub fn lookup_range(&self, start: u64, limit: u64) -> (u64, u64) {
        let g_lo = self.group_lower_bound(start);
        let g_hi = self.group_lower_bound(limit);
        (self.group_start(g_lo), self.group_start(g_hi))
    }

    /// First destination whose source is >= `source` (`dest_count()` when
    /// none).
    pub fn lookup_lower_bound(&self, source: u64) -> u64 {
        self.group_start(self.group_lower_bound(source))
    }

    /// The source id owning destination `dest`.
    pub fn reverse_lookup(&self, dest: u64) -> u64 {
        let g = self.group_of_dest(dest);
        self.source_of_group.get(g as usize)
    }

    /// The group id owning destination `dest`. Group ids are the same iff
    /// the sources are the same, which callers use to deduplicate per-source
    /// work.
    pub fn group_of_dest(&self, dest: u64) -> u64 {
        debug_assert!((dest as usize) < self.dest_count());
        self.first_in_group.rank(dest as usize + 1) - 1
    }

    /// Is `dest` the first destination of its group?
    pub fn dest_is_first_in_group(&self, dest: u64) -> bool {
        self.first_in_group.get(dest as usize)
    }

    /// The source of group `group`.
    pub fn source_of_group(&self, group: u64) -> u64 {
        self.source_of_group.get(group as usize)
    }

    /// Iterate `(source, [dest_lo, dest_hi))` groups in ascending source
    /// order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, (u64, u64))> + '_ {
        (0..self.group_count()).map(move |g| {
            (
                self.source_of_group.get(g as usize),
                (self.group_start(g), self.group_start(g + 1)),
            )
        })
    }

    pub fn store(&self, state: &CreateState) -> Result<()> {
        state.create_json(
            META,
            &SparseMultiMeta {
                source_count: self.source_count,
                dest_count: self.dest_count() as u64,
            },
        )?;
        self.first_in_group.store(&state.subpart(FIRST_IN_GROUP))?;
        self.source_of_group
            .store(&state.subpart(SOURCE_OF_GROUP))?;
        Ok(())
    }

    pub fn open(state: &OpenState) -> Result<SparseMulti> {
        let meta: SparseMultiMeta = state.open_json(META)?;
        let first_in_group = Bitcount::open(&state.subpart(FIRST_IN_GROUP))?;
        let source_of_group = PackedIntVec::open(&state.subpart(SOURCE_OF_GROUP))?;
        if first_in_group.len() as u64 != meta.dest_count
            || first_in_group.total_set() != source_of_group.len() as u64
        {
            return Err(SeqstoreError::Consistency(format!(
                "sparse-multi tables disagree: {} dests, {} group bits, {} groups",
                meta.dest_count,
                first_in_group.total_set(),
                source_of_group.len()
            )));
        }
        first_in_group.make_select_index();
        Ok(SparseMulti {
            first_in_group,
            source_of_group,
            source_count: meta.source_count,
        })
    }
}

/// Single-pass builder; sources must be added in ascending order.
pub struct SparseMultiBuilder {
    first: BitcountBuilder,
    sources: Vec<u64>,
    source_count: u64,
    dest_count: usize,
    next_dest: usize,
}

impl SparseMultiBuilder {
    pub fn new(source_count: u64, dest_count: usize) -> SparseMultiBuilder {
        SparseMultiBuilder {
            first: BitcountBuilder::new(dest_count),
            sources: Vec::new(),
            source_count,
            dest_count,
            next_dest: 0,
        }
    }

    /// Append the next destination, owned by `source`. Returns the assigned
    /// destination id.
    pub fn add(&mut self, source: u64) -> Result<u64> {
        if source >= self.source_count {
            return Err(SeqstoreError::Input(format!(
                "source {} out of range (source space is {})",
                source, self.source_count
            )));
        }
        if self.next_dest >= self.dest_count {
            return Err(SeqstoreError::Input(format!(
                "more than {} destinations added",
                self.dest_count
            )));
        }
        match self.sources.last() {
            Some(&last) if last > source => {
                return Err(SeqstoreError::Consistency(format!(
                    "sources must be added in ascending order ({} after {})",
                    source, last
                )));
            }
            Some(&last) if last == source => {}
            _ => {
                self.sources.push(source);
                self.first.set(self.next_dest, true);
            }
        }
        let dest = self.next_dest as u64;
        self.next_dest += 1;
        Ok(dest)
    }

    pub fn finalize(self) -> Result<SparseMulti> {
        if self.next_dest != self.dest_count {
            return Err(SeqstoreError::Consistency(format!(
                "sparse-multi expected {} destinations, got {}",
                self.dest_count, self.next_dest
            )));
        }
        let max_source = self.source_count.saturating_sub(1);
        let packed = MutablePackedIntVec::new(self.sources.len(), max_source);
        for (g, &source) in self.sources.iter().enumerate() {
            packed.set(g, source);
        }
        let first_in_group = self.first.finalize();
        first_in_group.make_select_index();
        Ok(SparseMulti {
            first_in_group,
            source_of_group: packed.into_reader(),
            source_count: self.source_count,
        })
    }
}
