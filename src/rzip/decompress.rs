//! Record replay: reconstruct a chunk from its literal/match stream.
//!
//! Literal runs copy bytes straight from stream 1.  Matches copy from the
//! already-written output, which doubles as history: positional reads pull
//! from the same file that is being appended to, so back-references can
//! reach anywhere in the reconstructed prefix without holding it in memory.

use std::fs::File;
use std::io::Write;
use std::os::unix::fs::FileExt;

use md5::{Digest, Md5};

use crate::config::EMIT_LEN_BYTES;
use crate::error::{LrzError, Result};
use crate::stream::StreamReader;

/// Output file that can also serve reads of what it has written.
pub struct HistoryFile {
    file: File,
    pos: u64,
}

impl HistoryFile {
    /// Wrap an output file opened for both writing and reading, positioned
    /// at its start.
    pub fn new(file: File) -> HistoryFile {
        HistoryFile { file, pos: 0 }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file
            .write_all(data)
            .map_err(LrzError::io("write reconstructed data"))?;
        self.pos += data.len() as u64;
        Ok(())
    }

    fn read_history(&self, at: u64, buf: &mut [u8]) -> Result<()> {
        self.file
            .read_exact_at(buf, at)
            .map_err(LrzError::io("read back-reference history"))
    }

    pub fn into_inner(self) -> File {
        self.file
    }
}

/// Copy one literal run from stream 1.
fn unzip_literal(
    reader: &mut StreamReader,
    len: u64,
    out: &mut HistoryFile,
    cksum: &mut crc32fast::Hasher,
    md5: &mut Md5,
) -> Result<u64> {
    let len = usize::try_from(len)
        .map_err(|_| LrzError::Format("literal length out of range".into()))?;
    let mut buf = vec![0u8; len];
    let got = reader.read(1, &mut buf)?;
    if got != len {
        return Err(LrzError::Format("literal data truncated".into()));
    }
    cksum.update(&buf);
    md5.update(&buf);
    out.append(&buf)?;
    Ok(len as u64)
}

/// Copy one back-reference from the reconstructed output.  The copy is
/// windowed by the distance so overlapping references replicate correctly.
fn unzip_match(
    reader: &mut StreamReader,
    mut len: u64,
    out: &mut HistoryFile,
    chunk_bytes: usize,
    cksum: &mut crc32fast::Hasher,
    md5: &mut Md5,
) -> Result<u64> {
    let offset = reader.read_vchars(0, chunk_bytes)?;
    if offset == 0 || offset > out.position() {
        return Err(LrzError::Invariant(format!(
            "match reaches {offset} bytes back with only {} written",
            out.position()
        )));
    }
    let total = len;
    let mut src = out.position() - offset;
    while len > 0 {
        let n = len.min(offset) as usize;
        let mut buf = vec![0u8; n];
        out.read_history(src, &mut buf)?;
        cksum.update(&buf);
        md5.update(&buf);
        out.append(&buf)?;
        src += n as u64;
        len -= n as u64;
    }
    Ok(total)
}

/// Replay one chunk's records and verify its checksum.  Returns the number
/// of reconstructed bytes.
pub fn decompress_chunk(
    reader: &mut StreamReader,
    out: &mut HistoryFile,
    chunk_bytes: usize,
    md5: &mut Md5,
) -> Result<u64> {
    let mut cksum = crc32fast::Hasher::new();
    let mut total = 0u64;

    loop {
        let head = reader.read_u8(0)?;
        let len = reader.read_vchars(0, EMIT_LEN_BYTES)?;
        if head == 0 && len == 0 {
            break;
        }
        total += match head {
            0 => unzip_literal(reader, len, out, &mut cksum, md5)?,
            _ => unzip_match(reader, len, out, chunk_bytes, &mut cksum, md5)?,
        };
    }

    let good_cksum = reader.read_u32(0)?;
    let cksum = cksum.finalize();
    if good_cksum != cksum {
        return Err(LrzError::Invariant(format!(
            "bad checksum {cksum:#010x} - expected {good_cksum:#010x}"
        )));
    }
    Ok(total)
}
