// config.rs — Compile-time constants shared across the pipeline.

/// Container format version written into the magic header.
pub const LRZ_MAJOR_VERSION: u8 = 0;
pub const LRZ_MINOR_VERSION: u8 = 6;

/// Length of the fixed archive header.
pub const MAGIC_LEN: usize = 24;

/// Number of logical streams multiplexed into one file
/// (stream 0 = control records, stream 1 = literal bytes).
pub const NUM_STREAMS: usize = 2;

/// Granularity of the redundancy window: the `-w` option counts in units of
/// this many bytes.
pub const CHUNK_MULTIPLE: u64 = 100 * 1024 * 1024;

/// Base size of one stream buffer handed to a back-end worker.
pub const STREAM_BUFSIZE: usize = 10 * 1024 * 1024;

/// Shortest back-reference worth recording.  Also the width of the rolling
/// tag window.
pub const MINIMUM_MATCH: usize = 31;

/// Matches at least this long are emitted immediately rather than waiting
/// for a longer overlapping candidate.
pub const GREAT_MATCH: usize = 1024;

/// A single literal or match record never describes more than this many
/// bytes; longer runs are split.
pub const MAX_EMIT: usize = 0xFFFF;

/// Record-header length fields are this many bytes wide.
pub const EMIT_LEN_BYTES: usize = 2;

/// Default back-end compression level.
pub const DEFAULT_LEVEL: u32 = 7;

/// Default niceness for background-friendly operation.
pub const DEFAULT_NICE: i32 = 19;

/// Default output suffix.
pub const DEFAULT_SUFFIX: &str = ".lrz";

/// Smallest chunk buffer the compressor will retry down to before giving up
/// when allocation fails.
pub const MIN_CHUNK_BYTES: u64 = 100 * 1024 * 1024;

/// Per-level tuning for the rzip hash table.
///
/// `mb_used` bounds the table's memory, `initial_freq` picks how many low
/// tag bits must be set before a position is inserted at all, and
/// `max_chain_len` caps runs of identical tags before one is evicted.
#[derive(Debug, Clone, Copy)]
pub struct Level {
    pub mb_used: u64,
    pub initial_freq: u32,
    pub max_chain_len: u32,
}

/// Hash-table tuning indexed by window size (in `CHUNK_MULTIPLE` units,
/// capped at 9).  Larger windows get larger, more selective tables.
pub const LEVELS: [Level; 10] = [
    Level { mb_used: 1, initial_freq: 4, max_chain_len: 1 },
    Level { mb_used: 2, initial_freq: 4, max_chain_len: 2 },
    Level { mb_used: 4, initial_freq: 4, max_chain_len: 2 },
    Level { mb_used: 8, initial_freq: 4, max_chain_len: 2 },
    Level { mb_used: 16, initial_freq: 4, max_chain_len: 3 },
    Level { mb_used: 32, initial_freq: 4, max_chain_len: 4 },
    Level { mb_used: 32, initial_freq: 2, max_chain_len: 6 },
    Level { mb_used: 64, initial_freq: 1, max_chain_len: 16 },
    Level { mb_used: 64, initial_freq: 1, max_chain_len: 32 },
    Level { mb_used: 64, initial_freq: 1, max_chain_len: 128 },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_table_is_monotonic_in_memory() {
        for w in LEVELS.windows(2) {
            assert!(w[0].mb_used <= w[1].mb_used);
        }
    }

    #[test]
    fn emit_limit_fits_len_bytes() {
        assert_eq!(MAX_EMIT, (1 << (8 * EMIT_LEN_BYTES)) - 1);
    }
}
