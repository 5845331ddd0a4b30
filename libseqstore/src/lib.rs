//! libseqstore is a content-addressed storage engine for short-read DNA
//! sequencing data.
//!
//! The core index is the [`seqset`](crate::seqset): every distinct substring
//! of every input read (and of each read's reverse complement), stored
//! prefix-maximal and sorted, with FM-index-style navigation — push a base
//! onto the front of a prefix, pop one off, find a query — in logarithmic or
//! constant time. The [`readmap`](crate::readmap) maps the original reads
//! onto seqset entries with pairing, orientation and length. Seqsets built
//! from disjoint read sets can be combined through the merge pipeline
//! ([`seqset_flat`](crate::seqset_flat), [`mergemap`](crate::mergemap),
//! [`merger`](crate::merger)), and readmaps follow without rereading any
//! reads ([`make_readmap`](crate::make_readmap)).
//!
//! Everything serializes into [`spiral`](crate::spiral) archives: store-only
//! ZIP files whose parts map straight into memory.

pub mod bitcount;
pub mod builder;
pub mod context;
pub mod dna;
pub mod error;
pub mod io;
pub mod lt_search;
pub mod make_readmap;
pub mod membuf;
pub mod mergemap;
pub mod merger;
pub mod packed;
pub mod readmap;
pub mod seqset;
pub mod seqset_flat;
pub mod sparse_multi;
pub mod spiral;
pub mod testutil;

pub use self::context::Context;
pub use self::dna::{Base, Sequence};
pub use self::error::SeqstoreError;
pub use self::readmap::Readmap;
pub use self::seqset::{Seqset, SeqsetBuilder, SeqsetRange};

pub type Result<T> = std::result::Result<T, SeqstoreError>;

/// One corrected-read record: a single read or an ordered pair. The engine
/// only ever sees these; parsing, trimming and error correction happen
/// upstream.
#[derive(Debug, Clone)]
pub struct ReadRecord {
    pub read: Sequence,
    pub mate: Option<Sequence>,
}
