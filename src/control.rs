//! Per-operation configuration.
//!
//! A [`Control`] value is built once (by the CLI or an embedding program) and
//! threaded by reference through every core entry point.  Subsystems only
//! read it; mutable working state lives in the compressor/decompressor
//! structs themselves.

use std::path::PathBuf;

use zeroize::Zeroizing;

use crate::codec::CodecKind;
use crate::config::{DEFAULT_LEVEL, DEFAULT_NICE, DEFAULT_SUFFIX};
use crate::util;

/// What the tool has been asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    Compress,
    Decompress,
    /// Decompress to a scratch file and verify, producing no output.
    Test,
    /// Walk and print the container structure without decoding payloads.
    Info,
}

/// Complete set of knobs for one compression or decompression run.
pub struct Control {
    pub op: OpMode,
    pub codec: CodecKind,
    /// Back-end compression level, 1..=9.
    pub level: u32,
    /// Redundancy window cap in 100 MB units; 0 derives it from RAM.
    pub window: u32,
    /// Ignore the RAM-derived window cap.
    pub unlimited_window: bool,
    /// Worker-thread count; defaults to the logical CPU count and is only
    /// ever lowered by configuration.
    pub threads: usize,
    pub nice: i32,
    pub encrypt: bool,
    /// Passphrase for encryption/decryption; wiped on drop.
    pub password: Option<Zeroizing<String>>,
    /// Print the MD5 of the processed data.
    pub show_hash: bool,
    /// After decompressing, re-read the output and compare its MD5 against
    /// the archive trailer.
    pub check_output: bool,
    /// Retain partial output when decompression fails.
    pub keep_broken: bool,
    /// Overwrite existing outputs without asking.
    pub force: bool,
    /// Remove the source file after success.
    pub delete_source: bool,
    pub suffix: String,
    pub outfile: Option<PathBuf>,
    pub outdir: Option<PathBuf>,
    pub to_stdout: bool,
    /// Append an MD5 trailer to archives (and verify it on decompression).
    pub compute_md5: bool,
    /// Compressibility-probe acceptance ratio; values above 1.0 effectively
    /// disable the probe.
    pub lzo_threshold: f64,
    /// Detected physical memory in bytes.
    pub ramsize: u64,
    /// Working-set budget (two thirds of physical memory).
    pub maxram: u64,
    pub tmpdir: PathBuf,
}

impl Control {
    /// Defaults matching the stock CLI: LZMA at level 7, auto window, all
    /// CPUs, MD5 trailer on.
    pub fn new() -> Self {
        let ramsize = util::physical_ram();
        Control {
            op: OpMode::Compress,
            codec: CodecKind::Lzma,
            level: DEFAULT_LEVEL,
            window: 0,
            unlimited_window: false,
            threads: num_cpus::get().max(1),
            nice: DEFAULT_NICE,
            encrypt: false,
            password: None,
            show_hash: false,
            check_output: false,
            keep_broken: false,
            force: false,
            delete_source: false,
            suffix: DEFAULT_SUFFIX.to_string(),
            outfile: None,
            outdir: None,
            to_stdout: false,
            compute_md5: true,
            lzo_threshold: 1.0,
            ramsize,
            maxram: ramsize / 3 * 2,
            tmpdir: util::scratch_dir(),
        }
    }

    /// Effective redundancy-window size in bytes for an input of `len`
    /// bytes.
    pub fn chunk_window(&self, len: u64) -> u64 {
        use crate::config::{CHUNK_MULTIPLE, MIN_CHUNK_BYTES};
        let cap = if self.window != 0 {
            u64::from(self.window) * CHUNK_MULTIPLE
        } else if self.unlimited_window {
            u64::MAX
        } else {
            self.maxram.max(MIN_CHUNK_BYTES)
        };
        cap.min(len).max(1)
    }
}

impl Default for Control {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_cap_applies() {
        let mut c = Control::new();
        c.window = 1;
        assert_eq!(c.chunk_window(u64::MAX), 100 * 1024 * 1024);
        assert_eq!(c.chunk_window(512), 512);
    }

    #[test]
    fn zero_length_input_still_gets_a_chunk() {
        let c = Control::new();
        assert_eq!(c.chunk_window(0), 1);
    }
}
