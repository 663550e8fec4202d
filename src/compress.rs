//! Whole-file compression: chunking, container framing, integrity trailer.
//!
//! The input is processed in chunks sized to the redundancy window.  Each
//! chunk gets its own header (byte width, end-of-file flag, size) and its
//! own pair of Block Record chains; the rzip pass runs once per chunk with
//! a fresh hash-table lifetime.  The magic header is written up front and
//! rewritten at the end, when the LZMA properties and final size are known.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};

use crate::codec::{self, BackendParams, CodecKind};
use crate::config::{CHUNK_MULTIPLE, LEVELS, MIN_CHUNK_BYTES};
use crate::control::Control;
use crate::crypto::{self, KeyMaterial};
use crate::displaylevel;
use crate::error::{LrzError, Result};
use crate::magic::{write_magic, MagicParams};
use crate::rzip::{compress_chunk, HashTable, RzipStats};
use crate::stream::{push_le, StreamWriter};
use crate::util;

/// Outcome of one compression run.
pub struct CompressSummary {
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub md5: Option<[u8; 16]>,
}

/// Byte width needed to express `value` (at least 1, at most 8).
fn byte_width(value: u64) -> usize {
    let mut w = 1;
    while w < 8 && value >> (8 * w) != 0 {
        w += 1;
    }
    w
}

fn read_exact_into(file: &mut File, buf: &mut [u8]) -> Result<()> {
    file.read_exact(buf).map_err(LrzError::io("read input chunk"))
}

/// Compress `in_file` into `out_file`.
///
/// `in_len` must be the input's total size; the caller stages unseekable
/// sources (stdin) into a scratch file first.
pub fn compress_fd(
    control: &Control,
    in_file: &mut File,
    out_file: &File,
    in_len: u64,
) -> Result<CompressSummary> {
    let started = Instant::now();
    let mut out = out_file
        .try_clone()
        .map_err(LrzError::io("clone output handle"))?;

    // Key material first: a missing passphrase should fail before any
    // output exists.
    let (key, salt) = if control.encrypt {
        let password = control
            .password
            .as_ref()
            .ok_or_else(|| LrzError::Crypto("encryption requested without a passphrase".into()))?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let salt = crypto::generate_salt(now);
        displaylevel!(3, "Hashing passphrase...\n");
        let km = KeyMaterial::stretch(&salt, password)?;
        (Some(Arc::new(km)), Some(salt))
    } else {
        (None, None)
    };

    let lzma_props = (control.codec == CodecKind::Lzma)
        .then(|| codec::lzma_properties(control.level));
    let magic = write_magic(&MagicParams {
        expected_size: (!control.encrypt).then_some(in_len),
        salt,
        lzma_props,
        has_md5: control.compute_md5,
    });
    out.write_all(&magic)
        .map_err(LrzError::io("write archive header"))?;

    let params = BackendParams {
        kind: control.codec,
        level: control.level,
        threshold: control.lzo_threshold,
    };
    let chunk_window = control.chunk_window(in_len.max(1));
    let level = &LEVELS[(chunk_window / CHUNK_MULTIPLE).min(9) as usize];
    displaylevel!(
        3,
        "File size {in_len}, window {chunk_window}, hash table {} MB\n",
        level.mb_used
    );

    let mut table = HashTable::new(level)?;
    let mut md5 = Md5::new();
    let mut totals = RzipStats::default();
    let mut remaining = in_len;
    let mut first = true;
    let mut pass = 0u32;
    let passes = in_len / chunk_window + 1;

    while remaining > 0 || first {
        first = false;
        pass += 1;
        let chunk_started = Instant::now();
        let want = remaining.min(chunk_window);
        // Allocation pressure downgrades the chunk size rather than
        // failing, down to the floor.
        let mut buf =
            util::alloc_backoff(want as usize, MIN_CHUNK_BYTES.min(want.max(1)) as usize)?;
        let chunk = buf.len() as u64;
        let eof = chunk == remaining;
        let w = byte_width(chunk);

        displaylevel!(3, "Pass {pass} / {passes}: chunk of {chunk} bytes\n");

        let mut header = vec![w as u8, u8::from(eof)];
        push_le(&mut header, chunk, w);
        out.write_all(&header)
            .map_err(LrzError::io("write chunk header"))?;

        read_exact_into(in_file, &mut buf)?;
        md5.update(&buf);

        table.reset(level);
        let mut writer = StreamWriter::open(
            &out,
            params,
            w,
            chunk.max(1),
            control.window,
            control.threads,
            key.clone(),
        )?;
        let (_, stats) = compress_chunk(&mut table, level.initial_freq, &buf, &mut writer, w)?;
        writer.close()?;
        drop(buf);
        displaylevel!(
            3,
            "Pass {pass} done in {:.2}s ({:.1} MB/s)\n",
            chunk_started.elapsed().as_secs_f64(),
            chunk as f64 / (1 << 20) as f64 / chunk_started.elapsed().as_secs_f64().max(0.001)
        );

        totals.inserts += stats.inserts;
        totals.literals += stats.literals;
        totals.literal_bytes += stats.literal_bytes;
        totals.matches += stats.matches;
        totals.match_bytes += stats.match_bytes;
        remaining -= chunk;
    }

    let digest: [u8; 16] = md5.finalize().into();
    if control.compute_md5 {
        out.write_all(&digest)
            .map_err(LrzError::io("write integrity trailer"))?;
    }

    // Rewrite the header now that every field is final.
    out.flush().map_err(LrzError::io("flush archive"))?;
    let out_bytes = out
        .seek(SeekFrom::Current(0))
        .map_err(LrzError::io("measure archive"))?;
    out.seek(SeekFrom::Start(0))
        .map_err(LrzError::io("rewrite archive header"))?;
    out.write_all(&magic)
        .map_err(LrzError::io("rewrite archive header"))?;
    out.seek(SeekFrom::Start(out_bytes))
        .map_err(LrzError::io("finish archive"))?;

    displaylevel!(
        4,
        "matches={} match_bytes={} literals={} literal_bytes={} inserts={}\n",
        totals.matches,
        totals.match_bytes,
        totals.literals,
        totals.literal_bytes,
        totals.inserts
    );
    displaylevel!(
        2,
        "Compressed {in_len} bytes into {out_bytes} bytes ({:.3}:1) in {:.2}s\n",
        in_len as f64 / out_bytes.max(1) as f64,
        started.elapsed().as_secs_f64()
    );

    Ok(CompressSummary {
        in_bytes: in_len,
        out_bytes,
        md5: control.compute_md5.then_some(digest),
    })
}

/// Compress the file at `in_path` into a fresh archive at `out_path`.
pub fn compress_file(control: &Control, in_path: &Path, out_path: &Path) -> Result<CompressSummary> {
    if out_path.exists() && !control.force {
        return Err(LrzError::Format(format!(
            "{} already exists; not overwriting without force",
            out_path.display()
        )));
    }
    let mut in_file = File::open(in_path).map_err(LrzError::io("open input file"))?;
    let in_len = in_file
        .metadata()
        .map_err(LrzError::io("stat input file"))?
        .len();
    let out_file = File::options()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(out_path)
        .map_err(LrzError::io("create archive"))?;

    let summary = compress_fd(control, &mut in_file, &out_file, in_len)?;
    util::preserve_metadata(in_path, out_path);
    Ok(summary)
}
