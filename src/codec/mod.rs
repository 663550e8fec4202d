//! Back-end block codecs and the per-block dispatcher.
//!
//! Each stream buffer is handed to one back end chosen by configuration.
//! Whatever the back end produces, a block that fails to shrink is stored
//! verbatim with the `none` tag, so decompression never depends on the
//! configured codec — only on the tag in each Block Record.
//!
//! The slow back ends (LZMA, bzip2, context mixing) are preceded by a cheap
//! LZO probe over a geometric sequence of sub-buffers: if even LZO cannot
//! shave a byte off any of them, the block is declared incompressible and
//! stored without invoking the expensive coder at all.

pub mod zpaq;

use std::io::{Read, Write};

use crate::config::STREAM_BUFSIZE;
use crate::error::{LrzError, Result};

/// Back end selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    None,
    Lzo,
    Gzip,
    Bzip2,
    Lzma,
    Zpaq,
}

/// On-disk codec tag of one Block Record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    None,
    Bzip2,
    Lzo,
    Lzma,
    Gzip,
    Zpaq,
}

impl Codec {
    pub fn to_byte(self) -> u8 {
        match self {
            Codec::None => 3,
            Codec::Bzip2 => 4,
            Codec::Lzo => 5,
            Codec::Lzma => 6,
            Codec::Gzip => 7,
            Codec::Zpaq => 8,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            3 => Codec::None,
            4 => Codec::Bzip2,
            5 => Codec::Lzo,
            6 => Codec::Lzma,
            7 => Codec::Gzip,
            8 => Codec::Zpaq,
            other => {
                return Err(LrzError::Format(format!("unknown block codec tag {other}")))
            }
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::None => "none",
            Codec::Bzip2 => "bzip2",
            Codec::Lzo => "lzo",
            Codec::Lzma => "lzma",
            Codec::Gzip => "gzip",
            Codec::Zpaq => "zpaq",
        }
    }
}

/// Immutable per-run parameters shared by all workers.
#[derive(Debug, Clone, Copy)]
pub struct BackendParams {
    pub kind: CodecKind,
    pub level: u32,
    /// Probe acceptance ratio; above 1.0 the probe always passes.
    pub threshold: f64,
}

/// Dictionary size recorded in the archive header for a given level.
fn lzma_dict_size(level: u32) -> u32 {
    // Matches the conventional preset ladder.
    const DICT: [u32; 10] = [
        1 << 18,
        1 << 20,
        1 << 21,
        1 << 22,
        1 << 22,
        1 << 23,
        1 << 23,
        1 << 24,
        1 << 25,
        1 << 26,
    ];
    DICT[level.min(9) as usize]
}

/// The five LZMA property bytes stored in the archive header: the packed
/// lc/lp/pb byte followed by the dictionary size.
pub fn lzma_properties(level: u32) -> [u8; 5] {
    let mut props = [0u8; 5];
    props[0] = 0x5d; // lc=3 lp=0 pb=2
    props[1..5].copy_from_slice(&lzma_dict_size(level).to_le_bytes());
    props
}

// ───────────────────────────────────────────────────────────────────────────
// Individual back ends
// ───────────────────────────────────────────────────────────────────────────

fn lzo_compress(buf: &[u8]) -> Result<Vec<u8>> {
    let mut lzo = minilzo_rs::LZO::init()
        .map_err(|e| LrzError::Codec(format!("lzo init failed: {e:?}")))?;
    lzo.compress(buf)
        .map_err(|e| LrzError::Codec(format!("lzo compression failed: {e:?}")))
}

fn lzo_decompress(buf: &[u8], u_len: usize) -> Result<Vec<u8>> {
    let lzo = minilzo_rs::LZO::init()
        .map_err(|e| LrzError::Codec(format!("lzo init failed: {e:?}")))?;
    lzo.decompress_safe(buf, u_len)
        .map_err(|e| LrzError::Codec(format!("lzo decompression failed: {e:?}")))
}

fn gzip_compress(buf: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut enc = flate2::write::ZlibEncoder::new(
        Vec::new(),
        flate2::Compression::new(level.min(9)),
    );
    enc.write_all(buf)
        .map_err(|e| LrzError::Codec(format!("deflate failed: {e}")))?;
    enc.finish()
        .map_err(|e| LrzError::Codec(format!("deflate failed: {e}")))
}

fn gzip_decompress(buf: &[u8], u_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(u_len);
    flate2::read::ZlibDecoder::new(buf)
        .read_to_end(&mut out)
        .map_err(|e| LrzError::Codec(format!("inflate failed: {e}")))?;
    Ok(out)
}

fn bzip2_compress(buf: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut enc = bzip2::write::BzEncoder::new(
        Vec::new(),
        bzip2::Compression::new(level.clamp(1, 9)),
    );
    enc.write_all(buf)
        .map_err(|e| LrzError::Codec(format!("bzip2 compression failed: {e}")))?;
    enc.finish()
        .map_err(|e| LrzError::Codec(format!("bzip2 compression failed: {e}")))
}

fn bzip2_decompress(buf: &[u8], u_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(u_len);
    bzip2::read::BzDecoder::new(buf)
        .read_to_end(&mut out)
        .map_err(|e| LrzError::Codec(format!("bzip2 decompression failed: {e}")))?;
    Ok(out)
}

fn lzma_compress(buf: &[u8], level: u32) -> Result<Vec<u8>> {
    use lzma_rust2::{Lzma2Options, Lzma2Writer};
    let mut options = Lzma2Options::with_preset(level.clamp(1, 9));
    options.lzma_options.dict_size = lzma_dict_size(level);
    let mut out = Vec::new();
    let mut enc = Lzma2Writer::new(&mut out, options);
    enc.write_all(buf)
        .map_err(|e| LrzError::Codec(format!("lzma compression failed: {e}")))?;
    enc.finish()
        .map_err(|e| LrzError::Codec(format!("lzma compression failed: {e}")))?;
    Ok(out)
}

fn lzma_decompress(buf: &[u8], u_len: usize, props: Option<[u8; 5]>) -> Result<Vec<u8>> {
    use lzma_rust2::Lzma2Reader;
    let dict_size = match props {
        Some(props) => u32::from_le_bytes(props[1..5].try_into().unwrap()),
        None => lzma_dict_size(6),
    };
    let mut out = Vec::with_capacity(u_len);
    Lzma2Reader::new(buf, dict_size, None)
        .read_to_end(&mut out)
        .map_err(|e| LrzError::Codec(format!("lzma decompression failed: {e}")))?;
    Ok(out)
}

// ───────────────────────────────────────────────────────────────────────────
// Compressibility probe
// ───────────────────────────────────────────────────────────────────────────

/// Quick LZO pass over growing sub-buffers.  Returns true as soon as any
/// probe compresses below `threshold` times its input; false means nothing
/// in the buffer looks compressible.
pub fn lzo_compresses(buf: &[u8], threshold: f64) -> bool {
    if threshold > 1.0 {
        return true;
    }
    if buf.is_empty() {
        return false;
    }
    let mut test_len = buf.len();
    let mut offset = 0usize;
    let mut buftest_size = if test_len > 5 * STREAM_BUFSIZE {
        STREAM_BUFSIZE
    } else {
        (STREAM_BUFSIZE / 4096).max(1)
    };
    let mut in_len = test_len.min(buftest_size);
    while test_len > 0 {
        let Ok(probe) = lzo_compress(&buf[offset..offset + in_len]) else {
            return false;
        };
        if (probe.len() as f64) < in_len as f64 * threshold {
            return true;
        }
        test_len -= in_len;
        if test_len > 0 {
            offset += in_len;
            if buftest_size < STREAM_BUFSIZE {
                buftest_size <<= 1;
            }
            in_len = test_len.min(buftest_size);
        }
    }
    false
}

// ───────────────────────────────────────────────────────────────────────────
// Dispatcher
// ───────────────────────────────────────────────────────────────────────────

/// Compress one stream buffer with the configured back end.
///
/// Returns the tag to record and the bytes to store.  Expansion, probe
/// failure, or a back end error on compression all fall back to storing the
/// input verbatim.
pub fn compress_block(params: &BackendParams, buf: Vec<u8>) -> Result<(Codec, Vec<u8>)> {
    if buf.is_empty() || params.kind == CodecKind::None {
        return Ok((Codec::None, buf));
    }

    let attempt: Option<(Codec, Vec<u8>)> = match params.kind {
        CodecKind::None => None,
        CodecKind::Lzo => Some((Codec::Lzo, lzo_compress(&buf)?)),
        CodecKind::Gzip => Some((Codec::Gzip, gzip_compress(&buf, params.level)?)),
        CodecKind::Bzip2 => {
            if lzo_compresses(&buf, params.threshold) {
                Some((Codec::Bzip2, bzip2_compress(&buf, params.level)?))
            } else {
                None
            }
        }
        CodecKind::Lzma => {
            if lzo_compresses(&buf, params.threshold) {
                Some((Codec::Lzma, lzma_compress(&buf, params.level)?))
            } else {
                None
            }
        }
        CodecKind::Zpaq => {
            if lzo_compresses(&buf, params.threshold) {
                Some((Codec::Zpaq, zpaq::compress(&buf, params.level)?))
            } else {
                None
            }
        }
    };

    match attempt {
        Some((codec, out)) if out.len() < buf.len() => Ok((codec, out)),
        _ => Ok((Codec::None, buf)),
    }
}

/// Decompress one Block Record payload according to its tag.
pub fn decompress_block(
    codec: Codec,
    data: &[u8],
    u_len: usize,
    lzma_props: Option<[u8; 5]>,
) -> Result<Vec<u8>> {
    let out = match codec {
        Codec::None => data.to_vec(),
        Codec::Lzo => lzo_decompress(data, u_len)?,
        Codec::Gzip => gzip_decompress(data, u_len)?,
        Codec::Bzip2 => bzip2_decompress(data, u_len)?,
        Codec::Lzma => lzma_decompress(data, u_len, lzma_props)?,
        Codec::Zpaq => zpaq::decompress(data, u_len)?,
    };
    if out.len() != u_len {
        return Err(LrzError::Codec(format!(
            "inconsistent length after decompression: got {} expected {u_len}",
            out.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compressible() -> Vec<u8> {
        b"long range redundancy eliminator ".repeat(400)
    }

    fn incompressible() -> Vec<u8> {
        // Simple xorshift noise; not compressible by any back end here.
        let mut state = 0x2545_f491_4f6c_dd1du64;
        (0..64 * 1024)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 32) as u8
            })
            .collect()
    }

    fn params(kind: CodecKind) -> BackendParams {
        BackendParams {
            kind,
            level: 5,
            threshold: 1.0,
        }
    }

    #[test]
    fn every_backend_round_trips() {
        let data = compressible();
        for kind in [
            CodecKind::Lzo,
            CodecKind::Gzip,
            CodecKind::Bzip2,
            CodecKind::Lzma,
            CodecKind::Zpaq,
        ] {
            let (codec, packed) = compress_block(&params(kind), data.clone()).unwrap();
            assert_ne!(codec, Codec::None, "{kind:?} should compress this");
            assert!(packed.len() < data.len());
            let restored = decompress_block(codec, &packed, data.len(), None).unwrap();
            assert_eq!(restored, data, "{kind:?}");
        }
    }

    #[test]
    fn incompressible_blocks_are_stored() {
        let data = incompressible();
        for kind in [CodecKind::Lzo, CodecKind::Lzma, CodecKind::Zpaq] {
            let (codec, packed) = compress_block(&params(kind), data.clone()).unwrap();
            assert_eq!(codec, Codec::None, "{kind:?} must store noise verbatim");
            assert_eq!(packed, data);
        }
    }

    #[test]
    fn probe_rejects_noise_and_accepts_text() {
        assert!(!lzo_compresses(&incompressible(), 1.0));
        assert!(lzo_compresses(&compressible(), 1.0));
        // Raising the threshold above 1 disables the probe entirely.
        assert!(lzo_compresses(&incompressible(), 2.0));
    }

    #[test]
    fn none_kind_is_identity() {
        let data = compressible();
        let (codec, out) = compress_block(&params(CodecKind::None), data.clone()).unwrap();
        assert_eq!(codec, Codec::None);
        assert_eq!(out, data);
    }

    #[test]
    fn codec_tags_round_trip() {
        for codec in [
            Codec::None,
            Codec::Bzip2,
            Codec::Lzo,
            Codec::Lzma,
            Codec::Gzip,
            Codec::Zpaq,
        ] {
            assert_eq!(Codec::from_byte(codec.to_byte()).unwrap(), codec);
        }
        assert!(Codec::from_byte(0).is_err());
        assert!(Codec::from_byte(9).is_err());
    }

    #[test]
    fn empty_buffer_is_stored() {
        let (codec, out) = compress_block(&params(CodecKind::Lzma), Vec::new()).unwrap();
        assert_eq!(codec, Codec::None);
        assert!(out.is_empty());
    }

    #[test]
    fn lzma_properties_record_dictionary() {
        let props = lzma_properties(7);
        assert_eq!(props[0], 0x5d);
        assert_eq!(u32::from_le_bytes(props[1..5].try_into().unwrap()), 1 << 24);
    }
}
