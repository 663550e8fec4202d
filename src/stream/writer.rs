//! Buffered stream output with a ring of back-end workers.
//!
//! The producer (the rzip engine) appends bytes to one in-memory buffer per
//! stream.  A full buffer is handed to the next ring slot, whose worker
//! compresses it concurrently with the others, then writes it out strictly
//! in ring order: each worker holds its slot's buffer exclusively, waits for
//! the preceding slot's completion token before touching the file, patches
//! the previous Block Record's chain pointer, and finally posts its own
//! completion and free tokens.
//!
//! Two bounded(1) channels per slot play the role of semaphores: `free`
//! gates the producer handing out a new buffer, `completion` serializes the
//! seek-and-write section in ring order.  The file handle itself sits
//! behind a mutex, but ordering comes from the tokens, not the lock.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::codec::{compress_block, BackendParams, Codec};
use crate::config::{NUM_STREAMS, STREAM_BUFSIZE};
use crate::crypto::{self, KeyMaterial, SALT_LEN};
use crate::displaylevel;
use crate::error::{LrzError, Result};

use super::{next_head_offset, push_le, record_header_len};

struct Job {
    stream: usize,
    buf: Vec<u8>,
}

struct OutFile {
    file: File,
    initial_pos: u64,
    /// Write position relative to `initial_pos`.
    cur_pos: u64,
    /// Offset of the `next_head` field of the last record per stream.
    last_head: [u64; NUM_STREAMS],
}

struct Shared {
    out: Mutex<OutFile>,
    params: BackendParams,
    chunk_bytes: usize,
    key: Option<Arc<KeyMaterial>>,
    error: Mutex<Option<LrzError>>,
}

impl Shared {
    fn record_error(&self, e: LrzError) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(e);
        }
    }

    fn take_error(&self) -> Option<LrzError> {
        self.error.lock().unwrap().take()
    }

    /// Compress, order, and write one buffer.  Runs on a worker thread.
    fn process(&self, job: Job, comp_prev: &Receiver<()>, thread_id: usize) {
        let u_len = job.buf.len() as u64;
        let stream = job.stream;

        let compressed = compress_block(&self.params, job.buf);

        // Take the write token even on failure so the ring keeps moving.
        let _ = comp_prev.recv();

        if self.error.lock().unwrap().is_some() {
            return;
        }
        let (codec, mut data) = match compressed {
            Ok(r) => r,
            Err(e) => {
                self.record_error(e);
                return;
            }
        };
        if let Err(e) = self.write_record(stream, codec, &mut data, u_len, thread_id) {
            self.record_error(e);
        }
    }

    fn write_record(
        &self,
        stream: usize,
        codec: Codec,
        data: &mut Vec<u8>,
        u_len: u64,
        thread_id: usize,
    ) -> Result<()> {
        let w = self.chunk_bytes;
        let mut out = self.out.lock().unwrap();
        let pos = out.cur_pos;

        displaylevel!(
            4,
            "Writing {} bytes from thread {thread_id}, stream {stream} ({})\n",
            data.len(),
            codec.name()
        );

        // Chain the previous record of this stream to us.
        let head_field = out.initial_pos + out.last_head[stream];
        out.file
            .seek(SeekFrom::Start(head_field))
            .map_err(LrzError::io("seek to chain pointer"))?;
        let mut le = Vec::with_capacity(w);
        push_le(&mut le, pos, w);
        out.file
            .write_all(&le)
            .map_err(LrzError::io("patch chain pointer"))?;
        out.last_head[stream] = pos + next_head_offset(w) as u64;

        let record_start = out.initial_pos + pos;
        out.file
            .seek(SeekFrom::Start(record_start))
            .map_err(LrzError::io("seek to block record"))?;

        let mut header = Vec::with_capacity(record_header_len(w) + SALT_LEN);
        header.push(codec.to_byte());
        push_le(&mut header, data.len() as u64, w);
        push_le(&mut header, u_len, w);
        push_le(&mut header, 0, w);

        if let Some(key) = &self.key {
            let salt = crypto::random_block_salt();
            key.encrypt_block(&salt, data)?;
            header.extend_from_slice(&salt);
        }
        out.file
            .write_all(&header)
            .map_err(LrzError::io("write block record header"))?;
        out.file
            .write_all(data)
            .map_err(LrzError::io("write block record payload"))?;
        out.cur_pos = pos + header.len() as u64 + data.len() as u64;
        Ok(())
    }
}

/// One ring slot as seen by the producer.
struct Slot {
    job_tx: Sender<Job>,
    free_rx: Receiver<()>,
}

/// Buffered, multi-threaded writer for one chunk's stream area.
pub struct StreamWriter {
    shared: Arc<Shared>,
    bufs: Vec<Vec<u8>>,
    bufsize: usize,
    thread_no: usize,
    slots: Vec<Slot>,
    workers: Vec<JoinHandle<()>>,
}

impl StreamWriter {
    /// Open the stream area at the file's current position, write the two
    /// chain-head records, and start the worker ring.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        file: &File,
        params: BackendParams,
        chunk_bytes: usize,
        limit: u64,
        window: u32,
        threads: usize,
        key: Option<Arc<KeyMaterial>>,
    ) -> Result<StreamWriter> {
        let mut file = file.try_clone().map_err(LrzError::io("clone output handle"))?;
        let initial_pos = file
            .seek(SeekFrom::Current(0))
            .map_err(LrzError::io("locate stream area"))?;
        let threads = threads.max(1);
        let w = chunk_bytes;

        // Buffer sizing: no larger than the chunk itself, spread across the
        // ring, but never below the base buffer size.
        let mut bufsize = limit;
        if window > 0 {
            bufsize = bufsize.min(STREAM_BUFSIZE as u64 * 10 * u64::from(window));
        }
        let per_thread = (bufsize + threads as u64 - 1) / threads as u64;
        bufsize = bufsize.min(per_thread.max(STREAM_BUFSIZE as u64));
        let bufsize = usize::try_from(bufsize.max(1)).unwrap_or(STREAM_BUFSIZE);

        displaylevel!(
            4,
            "Using {threads} thread(s) to compress up to {bufsize} bytes each\n"
        );

        let mut out = OutFile {
            file,
            initial_pos,
            cur_pos: 0,
            last_head: [0; NUM_STREAMS],
        };

        // Chain-head records: empty, codec none, zero chain pointer.
        let mut heads = Vec::with_capacity(NUM_STREAMS * record_header_len(w));
        for stream in 0..NUM_STREAMS {
            out.last_head[stream] = out.cur_pos + next_head_offset(w) as u64;
            heads.push(Codec::None.to_byte());
            push_le(&mut heads, 0, w);
            push_le(&mut heads, 0, w);
            push_le(&mut heads, 0, w);
            out.cur_pos += record_header_len(w) as u64;
        }
        out.file
            .write_all(&heads)
            .map_err(LrzError::io("write stream head records"))?;

        let shared = Arc::new(Shared {
            out: Mutex::new(out),
            params,
            chunk_bytes,
            key,
            error: Mutex::new(None),
        });

        // Completion tokens form a ring: worker i consumes slot i-1's token
        // and posts its own.  Seed the ring so slot 0 may write first.
        let mut comp_txs = Vec::with_capacity(threads);
        let mut comp_rxs = Vec::with_capacity(threads);
        for _ in 0..threads {
            let (tx, rx) = bounded::<()>(1);
            comp_txs.push(tx);
            comp_rxs.push(Some(rx));
        }
        comp_txs[threads - 1].send(()).unwrap();

        let mut slots = Vec::with_capacity(threads);
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let (job_tx, job_rx) = bounded::<Job>(1);
            let (free_tx, free_rx) = bounded::<()>(1);
            free_tx.send(()).unwrap();
            slots.push(Slot { job_tx, free_rx });

            let comp_prev = comp_rxs[(i + threads - 1) % threads].take().unwrap();
            let comp_tx = comp_txs[i].clone();
            let shared = Arc::clone(&shared);
            workers.push(std::thread::spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    shared.process(job, &comp_prev, i);
                    let _ = comp_tx.send(());
                    let _ = free_tx.send(());
                }
            }));
        }

        Ok(StreamWriter {
            shared,
            bufs: vec![Vec::with_capacity(bufsize); NUM_STREAMS],
            bufsize,
            thread_no: 0,
            slots,
            workers,
        })
    }

    fn check_error(&self) -> Result<()> {
        if let Some(e) = self.shared.take_error() {
            return Err(e);
        }
        Ok(())
    }

    /// Hand the filled buffer of `stream` to the next ring slot.
    fn flush_buffer(&mut self, stream: usize) -> Result<()> {
        self.check_error()?;
        let i = self.thread_no;
        self.slots[i]
            .free_rx
            .recv()
            .map_err(|_| LrzError::Invariant("worker ring stopped early".into()))?;

        let buf = std::mem::replace(&mut self.bufs[stream], Vec::with_capacity(self.bufsize));
        displaylevel!(
            4,
            "Dispatching {} bytes from stream {stream} to thread {i}\n",
            buf.len()
        );
        self.slots[i]
            .job_tx
            .send(Job { stream, buf })
            .map_err(|_| LrzError::Invariant("worker ring stopped early".into()))?;

        self.thread_no = (self.thread_no + 1) % self.slots.len();
        Ok(())
    }

    /// Append bytes to a stream, flushing full buffers into the ring.
    pub fn write(&mut self, stream: usize, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let room = self.bufsize - self.bufs[stream].len();
            let n = room.min(data.len());
            self.bufs[stream].extend_from_slice(&data[..n]);
            data = &data[n..];
            if self.bufs[stream].len() == self.bufsize {
                self.flush_buffer(stream)?;
            }
        }
        Ok(())
    }

    pub fn write_u8(&mut self, stream: usize, b: u8) -> Result<()> {
        self.write(stream, &[b])
    }

    /// Flush remaining data, stop the ring, and leave the file positioned
    /// just past the stream area.  Returns the area's total byte size.
    pub fn close(mut self) -> Result<u64> {
        for stream in 0..NUM_STREAMS {
            if !self.bufs[stream].is_empty() {
                self.flush_buffer(stream)?;
            }
        }
        // Dropping the job senders lets each worker drain and exit.
        self.slots.clear();
        for worker in self.workers.drain(..) {
            worker
                .join()
                .map_err(|_| LrzError::Invariant("worker thread panicked".into()))?;
        }
        self.check_error()?;

        let mut out = self.shared.out.lock().unwrap();
        let end = out.initial_pos + out.cur_pos;
        out.file
            .seek(SeekFrom::Start(end))
            .map_err(LrzError::io("seek past stream area"))?;
        Ok(out.cur_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecKind;
    use crate::stream::StreamReader;
    use std::io::{Read, Seek};

    fn params() -> BackendParams {
        BackendParams {
            kind: CodecKind::Gzip,
            level: 6,
            threshold: 1.0,
        }
    }

    #[test]
    fn writes_chain_head_records() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(dir.path().join("out.bin"))
            .unwrap();
        let writer = StreamWriter::open(&file, params(), 2, 1 << 20, 0, 1, None).unwrap();
        let written = writer.close().unwrap();
        // Two empty head records at width 2.
        assert_eq!(written, 2 * record_header_len(2) as u64);

        let mut file = file;
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes.len() as u64, written);
        assert_eq!(bytes[0], Codec::None.to_byte());
    }

    #[test]
    fn round_trips_through_reader_multithreaded() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(dir.path().join("out.bin"))
            .unwrap();

        let control: Vec<u8> = b"control-records-".repeat(64);
        let literals: Vec<u8> = (0u32..50_000).map(|i| (i % 253) as u8).collect();

        let mut writer = StreamWriter::open(&file, params(), 3, 1 << 20, 0, 4, None).unwrap();
        writer.write(0, &control).unwrap();
        writer.write(1, &literals).unwrap();
        writer.close().unwrap();

        let handle = file.try_clone().unwrap();
        let mut h = handle;
        h.seek(SeekFrom::Start(0)).unwrap();
        let mut reader = StreamReader::open(h, 3, None, None).unwrap();
        let mut got_control = vec![0u8; control.len()];
        let mut got_literals = vec![0u8; literals.len()];
        assert_eq!(reader.read(0, &mut got_control).unwrap(), control.len());
        assert_eq!(reader.read(1, &mut got_literals).unwrap(), literals.len());
        assert_eq!(got_control, control);
        assert_eq!(got_literals, literals);
    }
}
