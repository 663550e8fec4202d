// Container-level behavior: magic layout, corruption detection, output
// hygiene, and the structure-listing mode.

use std::fs;
use std::path::Path;

use lrz::codec::CodecKind;
use lrz::control::Control;
use lrz::{compress_file, decompress_file, info_file, test_file, LrzError};

fn quiet_control() -> Control {
    lrz::display::set_display_level(0);
    let mut c = Control::new();
    c.force = true;
    c
}

#[test]
fn magic_layout_plain_archive() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("in.bin");
    let archive = dir.path().join("in.bin.lrz");
    let data = b"The quick brown fox jumps over the lazy dog";
    fs::write(&src, data).unwrap();

    let mut control = quiet_control();
    control.codec = CodecKind::Lzma;
    control.level = 7;
    compress_file(&control, &src, &archive).unwrap();

    let raw = fs::read(&archive).unwrap();
    assert_eq!(&raw[0..4], b"LRZI");
    // Size field records the uncompressed length.
    assert_eq!(
        u64::from_le_bytes(raw[6..14].try_into().unwrap()),
        data.len() as u64
    );
    // LZMA properties: packed lc/lp/pb byte then the dictionary size.
    assert_eq!(raw[16], 0x5d);
    assert_ne!(&raw[17..21], &[0, 0, 0, 0]);
    assert_eq!(raw[21], 1, "md5 trailer flag");
    assert_eq!(raw[22], 0, "not encrypted");

    let out = dir.path().join("out.bin");
    decompress_file(&control, &archive, &out).unwrap();
    assert_eq!(fs::read(&out).unwrap(), data);
}

#[test]
fn corrupted_checksum_is_fatal_and_removes_output() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("in.bin");
    let archive = dir.path().join("in.bin.lrz");
    fs::write(&src, b"hello").unwrap();

    let mut control = quiet_control();
    control.codec = CodecKind::None;
    compress_file(&control, &src, &archive).unwrap();

    // With the store codec the chunk CRC is the tail of the final stream 0
    // block, which sits directly before the 16-byte MD5 trailer.
    let mut raw = fs::read(&archive).unwrap();
    assert_eq!(raw[24], 1, "one-byte fields expected for a tiny chunk");
    let crc_at = raw.len() - 16 - 1;
    raw[crc_at] ^= 0x01;
    fs::write(&archive, &raw).unwrap();

    let out = dir.path().join("out.bin");
    let err = decompress_file(&control, &archive, &out).unwrap_err();
    assert!(
        matches!(err, LrzError::Invariant(ref m) if m.contains("checksum")),
        "unexpected error: {err}"
    );
    assert!(!out.exists(), "broken output must be removed");

    // With keep-broken the partial output survives.
    control.keep_broken = true;
    let kept = dir.path().join("kept.bin");
    assert!(decompress_file(&control, &archive, &kept).is_err());
    assert!(kept.exists());
}

#[test]
fn truncated_archive_is_a_format_error() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("in.bin");
    let archive = dir.path().join("in.bin.lrz");
    fs::write(&src, vec![7u8; 10_000]).unwrap();

    let control = quiet_control();
    compress_file(&control, &src, &archive).unwrap();

    let raw = fs::read(&archive).unwrap();
    fs::write(&archive, &raw[..raw.len() / 2]).unwrap();
    let out = dir.path().join("out.bin");
    assert!(decompress_file(&control, &archive, &out).is_err());
    assert!(!out.exists());
}

#[test]
fn foreign_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let bogus = dir.path().join("bogus.lrz");
    fs::write(&bogus, b"PK\x03\x04 definitely not ours, but with length").unwrap();
    let control = quiet_control();
    let out = dir.path().join("out.bin");
    let err = decompress_file(&control, &bogus, &out).unwrap_err();
    assert!(matches!(err, LrzError::Format(_)), "got: {err}");
}

#[test]
fn refuses_overwrite_without_force() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("in.bin");
    let archive = dir.path().join("in.bin.lrz");
    fs::write(&src, b"data").unwrap();
    fs::write(&archive, b"already here").unwrap();

    let mut control = quiet_control();
    control.force = false;
    assert!(compress_file(&control, &src, &archive).is_err());
    assert_eq!(fs::read(&archive).unwrap(), b"already here");
}

#[test]
fn test_mode_verifies_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("in.bin");
    let archive = dir.path().join("in.bin.lrz");
    let data: Vec<u8> = b"verify me ".repeat(5000);
    fs::write(&src, &data).unwrap();

    let mut control = quiet_control();
    control.codec = CodecKind::Gzip;
    compress_file(&control, &src, &archive).unwrap();

    let summary = test_file(&control, &archive).unwrap();
    assert_eq!(summary.out_bytes, data.len() as u64);
    assert!(summary.md5.is_some());

    // Nothing but the source and the archive in the directory.
    let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 2);
}

#[test]
fn info_mode_walks_the_container() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("in.bin");
    let archive = dir.path().join("in.bin.lrz");
    fs::write(&src, b"structure walking test data ".repeat(1000)).unwrap();

    let mut control = quiet_control();
    control.codec = CodecKind::Bzip2;
    compress_file(&control, &src, &archive).unwrap();
    info_file(&control, &archive).unwrap();
}

#[test]
fn check_output_rereads_written_file() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("in.bin");
    let archive = dir.path().join("in.bin.lrz");
    let data = b"re-read verification ".repeat(2000);
    fs::write(&src, &data).unwrap();

    let mut control = quiet_control();
    control.codec = CodecKind::Gzip;
    control.check_output = true;
    compress_file(&control, &src, &archive).unwrap();
    let out = dir.path().join("out.bin");
    decompress_file(&control, &archive, &out).unwrap();
    assert_eq!(fs::read(&out).unwrap(), data);
}

// Two full redundancy windows; expensive, so not part of the default run.
#[test]
#[ignore]
fn multi_chunk_archive_round_trips() {
    let pattern: Vec<u8> = (0u8..=255).collect();
    let data: Vec<u8> = pattern
        .iter()
        .cycle()
        .take(210 * 1024 * 1024)
        .copied()
        .collect();

    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("big.bin");
    let archive = dir.path().join("big.bin.lrz");
    fs::write(&src, &data).unwrap();

    let mut control = quiet_control();
    control.codec = CodecKind::None;
    control.window = 1; // 100 MB chunks -> three chunk records
    compress_file(&control, &src, &archive).unwrap();

    // Count chunk records: byte width + eof flag headers after the magic.
    let mut chunks = 0;
    let mut eof_flags = Vec::new();
    {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = fs::File::open(&archive).unwrap();
        file.seek(SeekFrom::Start(24)).unwrap();
        let file_len = file.metadata().unwrap().len();
        loop {
            let pos = file.stream_position().unwrap();
            if pos + 16 >= file_len {
                break;
            }
            let mut head = [0u8; 2];
            file.read_exact(&mut head).unwrap();
            let w = usize::from(head[0]);
            let mut size = [0u8; 8];
            file.read_exact(&mut size[..w]).unwrap();
            chunks += 1;
            eof_flags.push(head[1]);
            // Walk this chunk by decoding it against a scratch sink.
            break; // structure checked fully by decompression below
        }
    }
    assert_eq!(chunks, 1);
    assert_eq!(eof_flags[0], 0, "first of several chunks is not eof");

    let out = dir.path().join("restored.bin");
    decompress_file(&control, &archive, &out).unwrap();
    assert_eq!(fs::read(&out).unwrap().len(), data.len());
    assert_eq!(fs::read(&out).unwrap(), data);
}
