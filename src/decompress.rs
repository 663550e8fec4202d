//! Whole-file decompression, archive testing, and structure listing.
//!
//! Chunks are consumed until the stored size is reached, or, when the size
//! is unknown (streamed or encrypted archives), until a chunk carrying the
//! end-of-file flag has been replayed.  Only then is the optional 16-byte
//! MD5 trailer read and checked.  Failed decompressions remove the partial
//! output unless the caller asked to keep broken files.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use md5::{Digest, Md5};

use crate::config::{LRZ_MAJOR_VERSION, LRZ_MINOR_VERSION, MAGIC_LEN, NUM_STREAMS};
use crate::control::Control;
use crate::crypto::KeyMaterial;
use crate::displaylevel;
use crate::error::{LrzError, Result};
use crate::magic::{read_magic, Magic};
use crate::rzip::{decompress_chunk, HistoryFile};
use crate::stream::{read_le, record_header_len, StreamReader};

/// Outcome of one decompression run.
#[derive(Debug)]
pub struct DecompressSummary {
    pub out_bytes: u64,
    /// MD5 of the reconstructed data, when the archive carried a trailer.
    pub md5: Option<[u8; 16]>,
}

/// Removes a created output file on failure unless committed or told to
/// keep broken results.
struct OutputGuard {
    path: Option<PathBuf>,
    keep_broken: bool,
    committed: bool,
}

impl OutputGuard {
    fn new(path: Option<PathBuf>, keep_broken: bool) -> Self {
        OutputGuard {
            path,
            keep_broken,
            committed: false,
        }
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if !self.committed && !self.keep_broken {
            if let Some(path) = &self.path {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

fn parse_magic(in_file: &mut File) -> Result<Magic> {
    let mut raw = [0u8; MAGIC_LEN];
    in_file
        .read_exact(&mut raw)
        .map_err(LrzError::io("read archive header"))?;
    let magic = read_magic(&raw)?;
    displaylevel!(
        3,
        "Detected archive version {}.{}\n",
        magic.major,
        magic.minor
    );
    if (magic.major, magic.minor) > (LRZ_MAJOR_VERSION, LRZ_MINOR_VERSION) {
        displaylevel!(
            2,
            "Archive was produced by a newer version ({}.{}); attempting anyway\n",
            magic.major,
            magic.minor
        );
    }
    Ok(magic)
}

fn key_for(control: &Control, magic: &Magic) -> Result<Option<Arc<KeyMaterial>>> {
    if let Some(salt) = &magic.salt {
        let password = control.password.as_ref().ok_or_else(|| {
            LrzError::Crypto("archive is encrypted and no passphrase was supplied".into())
        })?;
        displaylevel!(3, "Hashing passphrase...\n");
        Ok(Some(Arc::new(KeyMaterial::stretch(salt, password)?)))
    } else {
        if control.encrypt {
            displaylevel!(
                2,
                "Asked to decrypt a non-encrypted archive; bypassing decryption\n"
            );
        }
        Ok(None)
    }
}

/// Read the per-chunk header: byte width, end-of-file flag, chunk size.
fn read_chunk_header(in_file: &mut File) -> Result<(usize, bool, u64)> {
    let mut head = [0u8; 2];
    in_file
        .read_exact(&mut head)
        .map_err(LrzError::io("read chunk header"))?;
    let w = usize::from(head[0]);
    if !(1..=8).contains(&w) {
        return Err(LrzError::Format(format!("invalid chunk byte width {w}")));
    }
    let mut size = [0u8; 8];
    in_file
        .read_exact(&mut size[..w])
        .map_err(LrzError::io("read chunk header"))?;
    Ok((w, head[1] != 0, u64::from_le_bytes(size)))
}

/// Decompress an open archive into `out_file`.
pub fn decompress_fd(
    control: &Control,
    in_file: &mut File,
    out_file: File,
) -> Result<DecompressSummary> {
    let magic = parse_magic(in_file)?;
    let key = key_for(control, &magic)?;
    let in_len = in_file
        .metadata()
        .map_err(LrzError::io("stat archive"))?
        .len();

    let mut history = HistoryFile::new(out_file);
    let mut md5 = Md5::new();
    let mut total = 0u64;

    loop {
        match magic.expected_size {
            Some(expected) if total >= expected => break,
            _ => {}
        }
        let (w, eof, chunk_size) = read_chunk_header(in_file)?;
        displaylevel!(4, "Chunk of {chunk_size} bytes, width {w}, eof {eof}\n");

        let handle = in_file
            .try_clone()
            .map_err(LrzError::io("clone archive handle"))?;
        let mut reader = StreamReader::open(handle, w, key.clone(), magic.lzma_props)?;
        let got = decompress_chunk(&mut reader, &mut history, w, &mut md5)?;
        reader.close()?;

        if got != chunk_size {
            return Err(LrzError::Format(format!(
                "chunk reconstructed {got} bytes, header promised {chunk_size}"
            )));
        }
        total += got;
        if magic.expected_size.is_none() && eof {
            break;
        }
        if magic.expected_size.is_none() {
            // Streamed archive: stop scanning when only the trailer could
            // remain.
            let pos = in_file
                .seek(SeekFrom::Current(0))
                .map_err(LrzError::io("locate next chunk"))?;
            if pos >= in_len || (magic.has_md5 && pos + 16 >= in_len) {
                break;
            }
        }
    }

    if let Some(expected) = magic.expected_size {
        if total != expected {
            return Err(LrzError::Format(format!(
                "archive reconstructed {total} bytes, header promised {expected}"
            )));
        }
    }

    let digest: [u8; 16] = md5.finalize().into();
    let mut stored: Option<[u8; 16]> = None;
    if magic.has_md5 {
        let mut trailer = [0u8; 16];
        in_file
            .read_exact(&mut trailer)
            .map_err(LrzError::io("read integrity trailer"))?;
        if trailer != digest {
            return Err(LrzError::Invariant(format!(
                "MD5 mismatch: archive says {}, data hashes to {}",
                hex(&trailer),
                hex(&digest)
            )));
        }
        stored = Some(trailer);
    }

    Ok(DecompressSummary {
        out_bytes: total,
        md5: stored.or(Some(digest)),
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decompress the archive at `in_path` to `out_path`.
pub fn decompress_file(
    control: &Control,
    in_path: &Path,
    out_path: &Path,
) -> Result<DecompressSummary> {
    if out_path.exists() && !control.force {
        return Err(LrzError::Format(format!(
            "{} already exists; not overwriting without force",
            out_path.display()
        )));
    }
    let mut in_file = File::open(in_path).map_err(LrzError::io("open archive"))?;
    let out_file = File::options()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(out_path)
        .map_err(LrzError::io("create output file"))?;
    let mut guard = OutputGuard::new(Some(out_path.to_path_buf()), control.keep_broken);

    let summary = decompress_fd(control, &mut in_file, out_file)?;

    if control.check_output {
        verify_written_output(out_path, &summary)?;
    }
    guard.commit();
    crate::util::preserve_metadata(in_path, out_path);
    Ok(summary)
}

/// Re-read the freshly written output and compare its MD5 with the
/// in-flight digest.
fn verify_written_output(out_path: &Path, summary: &DecompressSummary) -> Result<()> {
    let Some(expected) = summary.md5 else {
        return Ok(());
    };
    let mut file = File::open(out_path).map_err(LrzError::io("reopen output for check"))?;
    let mut md5 = Md5::new();
    let mut buf = vec![0u8; 1 << 20];
    loop {
        let n = file.read(&mut buf).map_err(LrzError::io("re-read output"))?;
        if n == 0 {
            break;
        }
        md5.update(&buf[..n]);
    }
    let digest: [u8; 16] = md5.finalize().into();
    if digest != expected {
        return Err(LrzError::Invariant(
            "written output does not hash to the archive's MD5".into(),
        ));
    }
    displaylevel!(2, "Output file verified against archive MD5\n");
    Ok(())
}

/// Decompress into an unlinked scratch file, verifying everything, and
/// produce no output.
pub fn test_file(control: &Control, in_path: &Path) -> Result<DecompressSummary> {
    let mut in_file = File::open(in_path).map_err(LrzError::io("open archive"))?;
    let scratch = tempfile::tempfile_in(&control.tmpdir)
        .map_err(LrzError::io("create scratch file"))?;
    decompress_fd(control, &mut in_file, scratch)
}

// ───────────────────────────────────────────────────────────────────────────
// Structure listing
// ───────────────────────────────────────────────────────────────────────────

/// Walk the container without decoding payloads and print its structure.
pub fn info_file(control: &Control, in_path: &Path) -> Result<()> {
    let _ = control;
    let mut file = File::open(in_path).map_err(LrzError::io("open archive"))?;
    let magic = parse_magic(&mut file)?;
    let file_len = file
        .metadata()
        .map_err(LrzError::io("stat archive"))?
        .len();

    println!("{}:", in_path.display());
    println!("  version: {}.{}", magic.major, magic.minor);
    println!("  encrypted: {}", magic.encrypted);
    println!("  md5 trailer: {}", magic.has_md5);
    match magic.expected_size {
        Some(size) => println!("  uncompressed size: {size}"),
        None => println!("  uncompressed size: unknown"),
    }
    if let Some(props) = magic.lzma_props {
        println!(
            "  lzma properties: {:02x} {:02x} {:02x} {:02x} {:02x}",
            props[0], props[1], props[2], props[3], props[4]
        );
    }

    let salt_len = if magic.encrypted { 8u64 } else { 0 };
    let mut chunk_no = 0u32;
    let mut total_c = 0u64;
    let mut total_u = 0u64;
    loop {
        let pos = file
            .seek(SeekFrom::Current(0))
            .map_err(LrzError::io("locate chunk"))?;
        let trailer = if magic.has_md5 { 16 } else { 0 };
        if pos + trailer >= file_len {
            break;
        }
        let (w, eof, chunk_size) = read_chunk_header(&mut file)?;
        chunk_no += 1;
        println!("  chunk {chunk_no}: {chunk_size} bytes, field width {w}, eof {eof}");

        let area_start = file
            .seek(SeekFrom::Current(0))
            .map_err(LrzError::io("locate stream area"))?;
        let mut area_end = area_start + (NUM_STREAMS * record_header_len(w)) as u64;

        for stream in 0..NUM_STREAMS {
            // The chain head sits in the per-stream initial record.
            let head_record = area_start + (stream * record_header_len(w)) as u64;
            let mut header = vec![0u8; record_header_len(w)];
            file.seek(SeekFrom::Start(head_record))
                .map_err(LrzError::io("seek to stream head"))?;
            file.read_exact(&mut header)
                .map_err(LrzError::io("read stream head"))?;
            let mut next = read_le(&header[1 + 2 * w..], w);
            let mut block_no = 0u32;
            while next != 0 {
                let record = area_start + next;
                if record + record_header_len(w) as u64 > file_len {
                    return Err(LrzError::Format("chain pointer beyond end of file".into()));
                }
                file.seek(SeekFrom::Start(record))
                    .map_err(LrzError::io("seek to block record"))?;
                file.read_exact(&mut header)
                    .map_err(LrzError::io("read block record"))?;
                let codec = crate::codec::Codec::from_byte(header[0])?;
                let c_len = read_le(&header[1..], w);
                let u_len = read_le(&header[1 + w..], w);
                let after = read_le(&header[1 + 2 * w..], w);
                block_no += 1;
                println!(
                    "    stream {stream} block {block_no}: {} {c_len} -> {u_len} bytes @ {record}",
                    codec.name()
                );
                total_c += c_len;
                total_u += u_len;
                area_end = area_end
                    .max(record + record_header_len(w) as u64 + salt_len + c_len);
                if after != 0 && after <= next {
                    return Err(LrzError::Format("chain pointer does not advance".into()));
                }
                next = after;
            }
        }
        file.seek(SeekFrom::Start(area_end))
            .map_err(LrzError::io("seek past stream area"))?;
        if magic.expected_size.is_none() && eof {
            break;
        }
    }
    println!("  stored payload bytes: {total_c}");
    println!("  pre-codec payload bytes: {total_u}");
    if total_u > 0 {
        println!(
            "  back-end ratio: {:.3}",
            total_u as f64 / total_c.max(1) as f64
        );
    }
    Ok(())
}
