//! Byte-oriented binary arithmetic coder.
//!
//! A 32-bit range `[low, high]` is split at `mid = low + (high-low)*p/65536`
//! for each bit with probability `p` of being 1; matching leading bytes are
//! shifted out as they settle.  `low` is kept nonzero so four zero bytes can
//! never be emitted mid-stream, which lets end-of-stream be signaled by a
//! 1-bit coded at probability 0 followed by four explicit zero bytes.
//!
//! When the block header declares no model components, both sides fall back
//! to raw pass-through: sub-blocks of up to 64 KiB prefixed with a 4-byte
//! big-endian count.

use crate::error::{LrzError, Result};

use super::predictor::Predictor;
use super::ByteReader;

/// Raw-mode sub-block capacity.
const BUFSIZE: usize = 1 << 16;

// ───────────────────────────────────────────────────────────────────────────
// Encoder
// ───────────────────────────────────────────────────────────────────────────

/// Compresses one byte at a time into `out`.
pub struct Encoder {
    pub out: Vec<u8>,
    low: u32,
    high: u32,
    pub pr: Predictor,
    /// Pending raw bytes in pass-through mode; `low` doubles as its fill
    /// level there.
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new(pr: Predictor) -> Self {
        Encoder {
            out: Vec::new(),
            low: 1,
            high: 0xFFFF_FFFF,
            pr,
            buf: Vec::new(),
        }
    }

    /// Reset coder state and initialize the model for a new block.
    pub fn init(&mut self) -> Result<()> {
        self.low = 1;
        self.high = 0xFFFF_FFFF;
        self.pr.init()?;
        if !self.pr.is_modeled() {
            self.low = 0;
            self.buf = vec![0u8; BUFSIZE];
        }
        Ok(())
    }

    /// Code bit `y` with 16-bit probability `p` of being 1.
    fn encode(&mut self, y: i32, p: i32) {
        debug_assert!((0..65536).contains(&p));
        debug_assert!(self.high > self.low && self.low > 0);
        let mid = self.low + (((self.high - self.low) as u64 * p as u64) >> 16) as u32;
        debug_assert!(self.high > mid && mid >= self.low);
        if y != 0 {
            self.high = mid;
        } else {
            self.low = mid + 1;
        }
        while (self.high ^ self.low) < 0x100_0000 {
            self.out.push((self.high >> 24) as u8);
            self.high = self.high << 8 | 255;
            self.low <<= 8;
            self.low += u32::from(self.low == 0);
        }
    }

    /// Compress byte `c`, or finish the stream with `c == -1`.
    pub fn compress(&mut self, c: i32) -> Result<()> {
        if self.pr.is_modeled() {
            if c == -1 {
                self.encode(1, 0);
            } else {
                self.encode(0, 0);
                for i in (0..8).rev() {
                    let p = self.pr.predict() * 2 + 1;
                    let y = c >> i & 1;
                    self.encode(y, p);
                    self.pr.update(y)?;
                }
            }
        } else {
            if c < 0 || self.low as usize == self.buf.len() {
                self.out.extend_from_slice(&self.low.to_be_bytes());
                self.out.extend_from_slice(&self.buf[..self.low as usize]);
                self.low = 0;
            }
            if c >= 0 {
                self.buf[self.low as usize] = (c & 255) as u8;
                self.low += 1;
            }
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Decoder
// ───────────────────────────────────────────────────────────────────────────

/// Mirrors [`Encoder`], reading from an in-memory block payload.
pub struct Decoder<'a> {
    input: ByteReader<'a>,
    low: u32,
    high: u32,
    /// Last four stream bytes in modeled mode; remaining sub-block byte
    /// count in raw mode.
    curr: u32,
    pub pr: Predictor,
    buf: Vec<u8>,
    buf_lo: usize,
    buf_hi: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(pr: Predictor, input: ByteReader<'a>) -> Self {
        Decoder {
            input,
            low: 1,
            high: 0xFFFF_FFFF,
            curr: 0,
            pr,
            buf: Vec::new(),
            buf_lo: 0,
            buf_hi: 0,
        }
    }

    pub fn init(&mut self) -> Result<()> {
        self.pr.init()?;
        if self.pr.is_modeled() {
            self.low = 1;
            self.high = 0xFFFF_FFFF;
            self.curr = 0;
        } else {
            self.low = 0;
            self.high = 0;
            self.curr = 0;
            self.buf = vec![0u8; BUFSIZE];
            self.buf_lo = 0;
            self.buf_hi = 0;
        }
        Ok(())
    }

    fn get(&mut self) -> Result<u8> {
        self.input
            .get()
            .ok_or_else(|| LrzError::Codec("unexpected end of compressed block".into()))
    }

    /// Decode one bit with 16-bit probability `p` of being 1.
    fn decode(&mut self, p: i32) -> Result<i32> {
        debug_assert!((0..65536).contains(&p));
        if self.curr < self.low || self.curr > self.high {
            return Err(LrzError::Codec("archive corrupted".into()));
        }
        let mid = self.low + (((self.high - self.low) as u64 * p as u64) >> 16) as u32;
        let y = i32::from(self.curr <= mid);
        if y != 0 {
            self.high = mid;
        } else {
            self.low = mid + 1;
        }
        while (self.high ^ self.low) < 0x100_0000 {
            self.high = self.high << 8 | 255;
            self.low <<= 8;
            self.low += u32::from(self.low == 0);
            let c = self.get()?;
            self.curr = self.curr << 8 | u32::from(c);
        }
        Ok(y)
    }

    /// Refill the raw-mode buffer from the next sub-block.
    fn loadbuf(&mut self) -> Result<()> {
        if self.curr == 0 {
            let mut prefix = [0u8; 4];
            for b in &mut prefix {
                *b = self.get()?;
            }
            self.curr = u32::from_be_bytes(prefix);
        }
        let n = (self.buf.len() as u32).min(self.curr) as usize;
        self.buf_hi = self.input.read(&mut self.buf[..n]);
        self.curr -= self.buf_hi as u32;
        self.buf_lo = 0;
        Ok(())
    }

    /// Decompress one byte, or return -1 at end of stream.
    pub fn decompress(&mut self) -> Result<i32> {
        if self.pr.is_modeled() {
            if self.curr == 0 {
                for _ in 0..4 {
                    let c = self.get()?;
                    self.curr = self.curr << 8 | u32::from(c);
                }
            }
            if self.decode(0)? != 0 {
                if self.curr != 0 {
                    return Err(LrzError::Codec("end of stream not flushed".into()));
                }
                return Ok(-1);
            }
            let mut c = 1i32;
            while c < 256 {
                let p = self.pr.predict() * 2 + 1;
                let y = self.decode(p)?;
                c += c + y;
                self.pr.update(y)?;
            }
            Ok(c - 256)
        } else {
            if self.buf_lo == self.buf_hi {
                self.loadbuf()?;
            }
            if self.buf_lo == self.buf_hi {
                return Ok(-1);
            }
            let c = self.buf[self.buf_lo];
            self.buf_lo += 1;
            Ok(i32::from(c))
        }
    }

    /// Consume the trailing bytes of the data section (the four-zero flush)
    /// and return the first byte after it.
    pub fn segment_trailer(&mut self) -> Result<u8> {
        if self.pr.is_modeled() {
            // The EOS bit already pulled the flush bytes into curr; the next
            // input byte belongs to the trailer.
            self.get()
        } else {
            // Raw mode: skip any remaining sub-blocks to the zero count.
            while self.curr > 0 {
                let n = (self.buf.len() as u32).min(self.curr) as usize;
                let got = self.input.read(&mut self.buf[..n]);
                if got == 0 {
                    return Err(LrzError::Codec("unexpected end of compressed block".into()));
                }
                self.curr -= got as u32;
            }
            self.get()
        }
    }

    /// Give back the underlying reader position for trailer parsing.
    pub fn into_reader(self) -> ByteReader<'a> {
        self.input
    }
}
