//! Context-mixing block codec.
//!
//! A compressed block is a self-describing unit: a small header naming the
//! model, one segment of arithmetic-coded data whose first decoded byte
//! selects the postprocessing mode, and explicit end markers.  The encoder
//! always emits pass-through postprocessing; the decoder accepts either mode
//! so foreign blocks with a postprocessing program still decode.

pub mod coder;
pub mod models;
pub mod predictor;
pub mod vm;

use crate::error::{LrzError, Result};

use coder::{Decoder, Encoder};
use predictor::Predictor;
use vm::{PostProcessor, Zpaql};

/// Cursor over an in-memory block payload.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    #[inline]
    pub fn get(&mut self) -> Option<u8> {
        let b = self.buf.get(self.pos).copied();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    /// Bulk read; returns the number of bytes copied.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

/// Compress `input` into a fresh block using the model for `level`.
pub fn compress(input: &[u8], level: u32) -> Result<Vec<u8>> {
    let model = models::model_for_level(level);
    let mut z = Zpaql::new();
    z.read(&mut ByteReader::new(model))?;

    let mut enc = Encoder::new(Predictor::new(z));
    enc.out.extend_from_slice(b"zPQ");
    enc.out.push(1 + u8::from(model[6] == 0));
    enc.out.push(1);
    enc.out.extend_from_slice(model);
    // Segment: empty filename, empty comment, reserved byte.
    enc.out.extend_from_slice(&[1, 0, 0, 0]);

    enc.init()?;
    enc.compress(0)?; // pass-through postprocessing
    for &b in input {
        enc.compress(i32::from(b))?;
    }
    enc.compress(-1)?;
    enc.out.extend_from_slice(&[0, 0, 0, 0]);
    enc.out.push(254); // segment end, no checksum
    enc.out.push(255); // block end
    Ok(enc.out)
}

fn need(r: &mut ByteReader<'_>) -> Result<u8> {
    r.get()
        .ok_or_else(|| LrzError::Codec("unexpected end of compressed block".into()))
}

/// Decompress one block, verifying it reconstructs exactly `expected` bytes.
pub fn decompress(input: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut r = ByteReader::new(input);
    let tag = [need(&mut r)?, need(&mut r)?, need(&mut r)?];
    if &tag != b"zPQ" {
        return Err(LrzError::Codec("not a context-mixing block".into()));
    }
    let level = need(&mut r)?;
    if level < 1 || level > 2 {
        return Err(LrzError::Codec(format!("unsupported block level {level}")));
    }
    if need(&mut r)? != 1 {
        return Err(LrzError::Codec("bad block header".into()));
    }

    let mut z = Zpaql::new();
    z.read(&mut r)?;
    let (ph, pm) = (z.header[4], z.header[5]);

    if need(&mut r)? != 1 {
        return Err(LrzError::Codec("missing segment header".into()));
    }
    while need(&mut r)? != 0 {} // filename
    while need(&mut r)? != 0 {} // comment
    if need(&mut r)? != 0 {
        return Err(LrzError::Codec("bad segment header".into()));
    }

    let mut dec = Decoder::new(Predictor::new(z), r);
    dec.init()?;
    let mut pp = PostProcessor::new(ph, pm);
    let mut out: Vec<u8> = Vec::with_capacity(expected);
    loop {
        let c = dec.decompress()?;
        pp.write(c)?;
        if !pp.z.out.is_empty() {
            out.append(&mut pp.z.out);
            if out.len() > expected {
                return Err(LrzError::Codec(format!(
                    "inconsistent length after decompression: got more than {expected}"
                )));
            }
        }
        if c < 0 {
            break;
        }
    }

    match dec.segment_trailer()? {
        254 => {}
        253 => {
            // Embedded checksum; the container carries its own, skip it.
            let mut skip = [0u8; 20];
            let mut r = dec.into_reader();
            if r.read(&mut skip) != 20 || need(&mut r)? != 255 {
                return Err(LrzError::Codec("truncated segment trailer".into()));
            }
            if out.len() != expected {
                return Err(LrzError::Codec(format!(
                    "inconsistent length after decompression: got {} expected {expected}",
                    out.len()
                )));
            }
            return Ok(out);
        }
        _ => return Err(LrzError::Codec("missing end of segment marker".into())),
    }
    let mut r = dec.into_reader();
    if need(&mut r)? != 255 {
        return Err(LrzError::Codec("missing end of block marker".into()));
    }
    if out.len() != expected {
        return Err(LrzError::Codec(format!(
            "inconsistent length after decompression: got {} expected {expected}",
            out.len()
        )));
    }
    Ok(out)
}
