//! Long-range redundancy elimination.
//!
//! The compression side turns a chunk into literal runs and
//! back-references; the decompression side replays them against the
//! growing output.  The hash table, tag construction, and culling policy
//! live in [`hash`].

pub mod compress;
pub mod decompress;
pub mod hash;

pub use compress::{compress_chunk, RzipStats};
pub use decompress::{decompress_chunk, HistoryFile};
pub use hash::HashTable;
