//! The match/literal emission pass.
//!
//! One pass over a chunk: roll the tag window byte by byte, look up
//! candidate positions with the same tag, extend the best one forward and
//! backward, and emit the chunk as interleaved literal runs and
//! back-references.  Control records go to stream 0, literal bytes to
//! stream 1; the chunk ends with a zero sentinel and the CRC32 of the
//! original bytes.

use crate::config::{EMIT_LEN_BYTES, GREAT_MATCH, MAX_EMIT, MINIMUM_MATCH};
use crate::displaylevel;
use crate::error::Result;
use crate::stream::{push_le, StreamWriter};

use super::hash::HashTable;

/// Emission statistics for one chunk, reported at high verbosity.
#[derive(Debug, Default, Clone, Copy)]
pub struct RzipStats {
    pub inserts: u64,
    pub literals: u64,
    pub literal_bytes: u64,
    pub matches: u64,
    pub match_bytes: u64,
    pub tag_hits: u64,
    pub tag_misses: u64,
}

/// Candidate back-reference staged for emission.
#[derive(Clone, Copy)]
struct Candidate {
    /// Start of the match in the chunk (after backward extension).
    p: usize,
    len: usize,
    /// Absolute chunk offset of the match target.
    ofs: usize,
}

fn put_header(writer: &mut StreamWriter, head: u8, len: usize) -> Result<()> {
    let mut rec = Vec::with_capacity(1 + EMIT_LEN_BYTES);
    rec.push(head);
    push_le(&mut rec, len as u64, EMIT_LEN_BYTES);
    writer.write(0, &rec)
}

fn put_literal(
    writer: &mut StreamWriter,
    buf: &[u8],
    mut last: usize,
    p: usize,
    stats: &mut RzipStats,
) -> Result<()> {
    loop {
        let len = (p - last).min(MAX_EMIT);
        stats.literals += 1;
        stats.literal_bytes += len as u64;
        put_header(writer, 0, len)?;
        if len > 0 {
            writer.write(1, &buf[last..last + len])?;
        }
        last += len;
        if p <= last {
            break;
        }
    }
    Ok(())
}

fn put_match(
    writer: &mut StreamWriter,
    mut p: usize,
    target: usize,
    mut len: usize,
    chunk_bytes: usize,
    stats: &mut RzipStats,
) -> Result<()> {
    let distance = p - target;
    loop {
        let n = len.min(MAX_EMIT);
        put_header(writer, 1, n)?;
        let mut ofs = Vec::with_capacity(chunk_bytes);
        push_le(&mut ofs, distance as u64, chunk_bytes);
        writer.write(0, &ofs)?;

        stats.matches += 1;
        stats.match_bytes += n as u64;
        len -= n;
        p += n;
        if len == 0 {
            break;
        }
    }
    Ok(())
}

/// Extend a candidate match at `p0` against `target0` forward (bounded by
/// `end`) and backward (not crossing `last_match`).  Returns the total
/// length and how far the start moved back; too-short matches return 0.
fn match_len(
    buf: &[u8],
    p0: usize,
    target0: usize,
    end: usize,
    last_match: usize,
) -> (usize, usize) {
    if target0 >= p0 {
        return (0, 0);
    }
    let mut p = p0;
    let mut op = target0;
    while p < end && buf[p] == buf[op] {
        p += 1;
        op += 1;
    }
    let mut len = p - p0;

    let mut back = 0usize;
    while p0 - back > last_match
        && target0 - back > 0
        && buf[target0 - back - 1] == buf[p0 - back - 1]
    {
        back += 1;
    }
    len += back;

    if len < MINIMUM_MATCH {
        (0, 0)
    } else {
        (len, back)
    }
}

/// Probe the primary chain for the longest match at `p`.  Later equal
/// lengths in probe order replace earlier ones, matching the selector's
/// observable tie-break.
fn find_best_match(
    table: &HashTable,
    t: u64,
    p: usize,
    buf: &[u8],
    end: usize,
    last_match: usize,
    stats: &mut RzipStats,
) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;
    let mut length = 0usize;
    let mask = table.index_mask() as usize;
    let mut h = table.primary(t);
    while !table.is_empty_slot(h) {
        let entry = table.entry(h);
        if entry.t == t {
            let (mlen, rev) = match_len(buf, p, entry.offset as usize, end, last_match);
            if mlen != 0 {
                stats.tag_hits += 1;
            } else {
                stats.tag_misses += 1;
            }
            if mlen >= length && mlen != 0 {
                length = mlen;
                best = Some(Candidate {
                    p: p - rev,
                    len: mlen,
                    ofs: entry.offset as usize - rev,
                });
            }
        }
        h = (h + 1) & mask;
    }
    best
}

/// Compress one chunk into the stream writer.  Returns the chunk CRC32
/// (already written to stream 0) and the emission statistics.
pub fn compress_chunk(
    table: &mut HashTable,
    initial_freq: u32,
    buf: &[u8],
    writer: &mut StreamWriter,
    chunk_bytes: usize,
) -> Result<(u32, RzipStats)> {
    let mut stats = RzipStats::default();
    let mut tag_mask: u64 = (1 << initial_freq) - 1;
    let mut last_match = 0usize;

    if buf.len() > MINIMUM_MATCH {
        let end = buf.len() - MINIMUM_MATCH;
        let mut p = 0usize;
        let mut current = Candidate { p: 0, len: 0, ofs: 0 };
        let mut t = table.full_tag(buf);

        while p < end {
            p += 1;
            t = table.next_tag(t, buf[p - 1], buf[p + MINIMUM_MATCH - 1]);

            // No point searching while the table holds nothing this sparse.
            if (t & table.minimum_tag_mask) != table.minimum_tag_mask {
                continue;
            }

            let found = find_best_match(table, t, p, buf, end, last_match, &mut stats);

            if (t & tag_mask) == tag_mask {
                stats.inserts += 1;
                table.insert(t, p as u64);
                if table.over_limit() {
                    tag_mask = table.clean_one()?;
                }
            }

            if let Some(cand) = found {
                if cand.len > current.len {
                    current = cand;
                }
            }

            if (current.len >= GREAT_MATCH || p >= current.p + MINIMUM_MATCH)
                && current.len >= MINIMUM_MATCH
            {
                if last_match < current.p {
                    put_literal(writer, buf, last_match, current.p, &mut stats)?;
                }
                put_match(writer, current.p, current.ofs, current.len, chunk_bytes, &mut stats)?;
                last_match = current.p + current.len;
                p = last_match;
                current = Candidate { p, len: 0, ofs: 0 };
                if p < end {
                    t = table.full_tag(&buf[p..]);
                }
            }
        }
    }

    if last_match < buf.len() {
        put_literal(writer, buf, last_match, buf.len(), &mut stats)?;
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(buf);
    let cksum = hasher.finalize();

    // Sentinel record, then the chunk checksum.
    put_header(writer, 0, 0)?;
    writer.write(0, &cksum.to_le_bytes())?;

    displaylevel!(
        4,
        "chunk: {} literals ({} bytes), {} matches ({} bytes), {} inserts\n",
        stats.literals,
        stats.literal_bytes,
        stats.matches,
        stats.match_bytes,
        stats.inserts
    );
    if crate::display::display_level_now() >= 4 {
        let (total, primary) = table.distribution();
        if total > 0 {
            displaylevel!(
                4,
                "{total} hashes, {primary} in primary bucket ({:.3}%)\n",
                primary as f64 * 100.0 / total as f64
            );
        }
    }
    Ok((cksum, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LEVELS;

    #[test]
    fn match_len_extends_both_directions() {
        let unit = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut buf = unit.to_vec();
        buf.extend_from_slice(unit);
        // Second copy starts at 36; probe one byte into it against the
        // first copy so backward extension has one byte to reclaim.
        let (len, back) = match_len(&buf, 37, 1, buf.len(), 0);
        assert_eq!(back, 1);
        assert_eq!(len, 36);
    }

    #[test]
    fn match_len_rejects_short_and_forward_targets() {
        let buf = b"xyxyxyxyxy";
        assert_eq!(match_len(buf, 2, 0, buf.len(), 0), (0, 0)); // too short
        assert_eq!(match_len(buf, 2, 4, buf.len(), 0), (0, 0)); // target ahead
    }

    #[test]
    fn match_len_does_not_cross_last_match() {
        let data = vec![7u8; 200];
        let (_len, back) = match_len(&data, 100, 50, data.len(), 90);
        assert!(back <= 10, "backward extension must stop at last_match");
    }

    #[test]
    fn repetitive_chunk_emits_matches() {
        let dir = tempfile::tempdir().unwrap();
        let file = std::fs::File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(dir.path().join("s.bin"))
            .unwrap();
        let params = crate::codec::BackendParams {
            kind: crate::codec::CodecKind::None,
            level: 1,
            threshold: 1.0,
        };
        let mut writer =
            crate::stream::StreamWriter::open(&file, params, 4, 1 << 20, 0, 1, None).unwrap();
        let mut table = HashTable::new(&LEVELS[0]).unwrap();

        let pattern: Vec<u8> = (0u8..=255).collect();
        let buf: Vec<u8> = pattern
            .iter()
            .cycle()
            .take(256 * 64)
            .copied()
            .collect();
        let (crc, stats) =
            compress_chunk(&mut table, LEVELS[0].initial_freq, &buf, &mut writer, 4).unwrap();
        writer.close().unwrap();

        assert!(stats.matches > 0, "cyclic data must produce matches");
        assert!(stats.match_bytes > stats.literal_bytes);
        let mut h = crc32fast::Hasher::new();
        h.update(&buf);
        assert_eq!(crc, h.finalize());
    }

    #[test]
    fn tiny_chunk_is_all_literals() {
        let dir = tempfile::tempdir().unwrap();
        let file = std::fs::File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(dir.path().join("s.bin"))
            .unwrap();
        let params = crate::codec::BackendParams {
            kind: crate::codec::CodecKind::None,
            level: 1,
            threshold: 1.0,
        };
        let mut writer =
            crate::stream::StreamWriter::open(&file, params, 1, 1 << 16, 0, 1, None).unwrap();
        let mut table = HashTable::new(&LEVELS[0]).unwrap();

        let buf = b"short".to_vec();
        let (_, stats) =
            compress_chunk(&mut table, LEVELS[0].initial_freq, &buf, &mut writer, 1).unwrap();
        writer.close().unwrap();
        assert_eq!(stats.matches, 0);
        assert_eq!(stats.literal_bytes, buf.len() as u64);
    }
}
