//! Chain-following stream input.
//!
//! Each stream refills its buffer by seeking to the next Block Record in
//! its chain, reading and (if needed) decrypting the payload, and running
//! the tagged codec.  Chain pointers are validated before use: they must
//! advance strictly and stay inside the file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::codec::{decompress_block, Codec};
use crate::config::NUM_STREAMS;
use crate::crypto::{KeyMaterial, SALT_LEN};
use crate::error::{LrzError, Result};

use super::{read_le, record_header_len};

struct InStream {
    buf: Vec<u8>,
    bufp: usize,
    /// Offset of the next Block Record of this stream; 0 = chain ended.
    last_head: u64,
    /// Offset of the most recently read record, for chain validation.
    prev_record: u64,
}

/// Reader over one chunk's stream area.
pub struct StreamReader {
    file: File,
    initial_pos: u64,
    chunk_bytes: usize,
    file_len: u64,
    total_read: u64,
    streams: Vec<InStream>,
    key: Option<Arc<KeyMaterial>>,
    lzma_props: Option<[u8; 5]>,
}

impl StreamReader {
    /// Parse the chain-head records at the file's current position.
    pub fn open(
        mut file: File,
        chunk_bytes: usize,
        key: Option<Arc<KeyMaterial>>,
        lzma_props: Option<[u8; 5]>,
    ) -> Result<StreamReader> {
        let initial_pos = file
            .seek(SeekFrom::Current(0))
            .map_err(LrzError::io("locate stream area"))?;
        let file_len = file
            .metadata()
            .map_err(LrzError::io("stat archive"))?
            .len();
        let w = chunk_bytes;
        if !(1..=8).contains(&w) {
            return Err(LrzError::Format(format!("invalid chunk byte width {w}")));
        }

        let mut streams = Vec::with_capacity(NUM_STREAMS);
        let mut total_read = 0u64;
        let mut header = vec![0u8; record_header_len(w)];
        for stream in 0..NUM_STREAMS {
            file.read_exact(&mut header)
                .map_err(LrzError::io("read stream head record"))?;
            let codec = header[0];
            let c_len = read_le(&header[1..], w);
            let u_len = read_le(&header[1 + w..], w);
            let next = read_le(&header[1 + 2 * w..], w);
            if codec != Codec::None.to_byte() || c_len != 0 || u_len != 0 {
                return Err(LrzError::Format(format!(
                    "unexpected initial record in stream {stream}"
                )));
            }
            total_read += header.len() as u64;
            streams.push(InStream {
                buf: Vec::new(),
                bufp: 0,
                last_head: next,
                prev_record: 0,
            });
        }

        Ok(StreamReader {
            file,
            initial_pos,
            chunk_bytes,
            file_len,
            total_read,
            streams,
            key,
            lzma_props,
        })
    }

    /// Read and decode the next Block Record of `stream`.
    fn fill_buffer(&mut self, stream: usize) -> Result<()> {
        let w = self.chunk_bytes;
        let head = self.streams[stream].last_head;
        if head == 0 {
            return Err(LrzError::Format(format!(
                "stream {stream} exhausted before its data ended"
            )));
        }
        if head <= self.streams[stream].prev_record {
            return Err(LrzError::Format("chain pointer does not advance".into()));
        }
        let record_start = self.initial_pos + head;
        if record_start + record_header_len(w) as u64 > self.file_len {
            return Err(LrzError::Format("chain pointer beyond end of file".into()));
        }

        self.file
            .seek(SeekFrom::Start(record_start))
            .map_err(LrzError::io("seek to block record"))?;
        let mut header = vec![0u8; record_header_len(w)];
        self.file
            .read_exact(&mut header)
            .map_err(LrzError::io("read block record header"))?;
        let codec = Codec::from_byte(header[0])?;
        let c_len = read_le(&header[1..], w);
        let u_len = read_le(&header[1 + w..], w);
        let next_head = read_le(&header[1 + 2 * w..], w);

        let salt_len = if self.key.is_some() { SALT_LEN as u64 } else { 0 };
        if record_start + header.len() as u64 + salt_len + c_len > self.file_len {
            return Err(LrzError::Format("block payload beyond end of file".into()));
        }
        if next_head != 0 && next_head <= head {
            return Err(LrzError::Format("chain pointer does not advance".into()));
        }

        let mut salt = [0u8; SALT_LEN];
        if self.key.is_some() {
            self.file
                .read_exact(&mut salt)
                .map_err(LrzError::io("read block salt"))?;
        }
        let mut payload = vec![0u8; c_len as usize];
        self.file
            .read_exact(&mut payload)
            .map_err(LrzError::io("read block payload"))?;
        if let Some(key) = &self.key {
            key.decrypt_block(&salt, &mut payload)?;
        }

        let data = decompress_block(codec, &payload, u_len as usize, self.lzma_props)?;

        let s = &mut self.streams[stream];
        s.buf = data;
        s.bufp = 0;
        s.prev_record = head;
        s.last_head = next_head;
        self.total_read += header.len() as u64 + salt_len + c_len;
        Ok(())
    }

    /// Copy up to `out.len()` bytes from `stream`, following the chain as
    /// buffers drain.  A short count means the chain ended.
    pub fn read(&mut self, stream: usize, out: &mut [u8]) -> Result<usize> {
        let mut done = 0usize;
        while done < out.len() {
            let s = &mut self.streams[stream];
            let have = s.buf.len() - s.bufp;
            if have > 0 {
                let n = have.min(out.len() - done);
                out[done..done + n].copy_from_slice(&s.buf[s.bufp..s.bufp + n]);
                s.bufp += n;
                done += n;
                continue;
            }
            if s.last_head == 0 {
                break;
            }
            self.fill_buffer(stream)?;
        }
        Ok(done)
    }

    pub fn read_u8(&mut self, stream: usize) -> Result<u8> {
        let mut b = [0u8; 1];
        if self.read(stream, &mut b)? != 1 {
            return Err(LrzError::Format("stream truncated".into()));
        }
        Ok(b[0])
    }

    pub fn read_u32(&mut self, stream: usize) -> Result<u32> {
        let mut b = [0u8; 4];
        if self.read(stream, &mut b)? != 4 {
            return Err(LrzError::Format("stream truncated".into()));
        }
        Ok(u32::from_le_bytes(b))
    }

    /// Read a `width`-byte little-endian integer.
    pub fn read_vchars(&mut self, stream: usize, width: usize) -> Result<u64> {
        let mut b = [0u8; 8];
        if self.read(stream, &mut b[..width])? != width {
            return Err(LrzError::Format("stream truncated".into()));
        }
        Ok(u64::from_le_bytes(b))
    }

    /// Leave the file positioned just past everything this chunk's streams
    /// consumed, ready for the next chunk header.
    pub fn close(mut self) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(self.initial_pos + self.total_read))
            .map_err(LrzError::io("seek past stream area"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BackendParams, CodecKind};
    use crate::stream::{next_head_offset, push_le, StreamWriter};
    use std::io::{Seek, Write};

    const W: usize = 2;

    /// One stream-0 block of `payload`, store codec, returning the opened
    /// file positioned at the stream area.
    fn one_block_file(dir: &std::path::Path, payload: &[u8]) -> File {
        let file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(dir.join("streams.bin"))
            .unwrap();
        let params = BackendParams {
            kind: CodecKind::None,
            level: 1,
            threshold: 1.0,
        };
        let mut writer = StreamWriter::open(&file, params, W, 1 << 16, 0, 1, None).unwrap();
        writer.write(0, payload).unwrap();
        writer.close().unwrap();
        let mut file = file;
        file.seek(SeekFrom::Start(0)).unwrap();
        file
    }

    fn patch(file: &File, at: u64, bytes: &[u8]) {
        let mut f = file.try_clone().unwrap();
        f.seek(SeekFrom::Start(at)).unwrap();
        f.write_all(bytes).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
    }

    /// Offset of the first real Block Record (after the two head records).
    fn first_record() -> u64 {
        (2 * record_header_len(W)) as u64
    }

    #[test]
    fn unknown_codec_tag_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = one_block_file(dir.path(), &[9u8; 100]);
        patch(&file, first_record(), &[0xEE]);

        let mut reader = StreamReader::open(file, W, None, None).unwrap();
        let err = reader.read(0, &mut [0u8; 100]).unwrap_err();
        assert!(matches!(err, LrzError::Format(ref m) if m.contains("codec")), "{err}");
    }

    #[test]
    fn non_advancing_chain_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = one_block_file(dir.path(), &[9u8; 100]);
        // Point the block's chain pointer back at itself.
        let next_field = first_record() + next_head_offset(W) as u64;
        let mut loopy = Vec::new();
        push_le(&mut loopy, first_record(), W);
        patch(&file, next_field, &loopy);

        let mut reader = StreamReader::open(file, W, None, None).unwrap();
        let err = reader.read(0, &mut [0u8; 200]).unwrap_err();
        assert!(matches!(err, LrzError::Format(ref m) if m.contains("advance")), "{err}");
    }

    #[test]
    fn chain_beyond_end_of_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = one_block_file(dir.path(), &[9u8; 100]);
        let next_field = first_record() + next_head_offset(W) as u64;
        let mut far = Vec::new();
        push_le(&mut far, 60_000, W);
        patch(&file, next_field, &far);

        let mut reader = StreamReader::open(file, W, None, None).unwrap();
        let err = reader.read(0, &mut [0u8; 200]).unwrap_err();
        assert!(matches!(err, LrzError::Format(ref m) if m.contains("end of file")), "{err}");
    }

    #[test]
    fn exhausted_chain_reports_short_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = one_block_file(dir.path(), &[9u8; 100]);
        let mut reader = StreamReader::open(file, W, None, None).unwrap();
        let mut big = [0u8; 200];
        // The single block holds 100 bytes; the chain then ends cleanly.
        assert_eq!(reader.read(0, &mut big).unwrap(), 100);
    }
}
