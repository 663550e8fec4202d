//! Long-range redundancy compressor.
//!
//! The pipeline runs in two stages: a rolling-hash match pass that rewrites
//! the input as literal runs and back-references over a window of hundreds
//! of megabytes, then a conventional block codec (LZO, deflate, bzip2,
//! LZMA, or a context-mixing arithmetic coder) over the resulting streams.
//! Archives are self-describing containers with per-chunk checksums, an
//! optional MD5 trailer, and optional AES-128 encryption under a
//! password-stretched key.
//!
//! Library use goes through a [`control::Control`] value:
//!
//! ```no_run
//! use std::path::Path;
//! use lrz::control::Control;
//!
//! let control = Control::new();
//! lrz::compress::compress_file(&control, Path::new("big.img"), Path::new("big.img.lrz"))?;
//! lrz::decompress::decompress_file(&control, Path::new("big.img.lrz"), Path::new("big.img"))?;
//! # Ok::<(), lrz::error::LrzError>(())
//! ```

pub mod cli;
pub mod codec;
pub mod compress;
pub mod config;
pub mod control;
pub mod crypto;
pub mod decompress;
pub mod display;
pub mod error;
pub mod magic;
pub mod rzip;
pub mod stream;
pub mod util;

pub use codec::{Codec, CodecKind};
pub use compress::{compress_file, CompressSummary};
pub use control::{Control, OpMode};
pub use decompress::{decompress_file, info_file, test_file, DecompressSummary};
pub use error::{LrzError, Result};
