// Drives the installed binary end to end: name resolution, exit codes,
// stdin/stdout plumbing, and failure cleanup.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

fn lrzr() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_lrzr"));
    cmd.arg("-q");
    cmd
}

fn run_in(dir: &Path, args: &[&str]) -> Output {
    lrzr()
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn lrzr")
}

#[test]
fn compress_decompress_default_names() {
    let dir = tempfile::tempdir().unwrap();
    let data = b"command line round trip ".repeat(4000);
    fs::write(dir.path().join("data.bin"), &data).unwrap();

    let out = run_in(dir.path(), &["-g", "data.bin"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(dir.path().join("data.bin.lrz").exists());

    fs::remove_file(dir.path().join("data.bin")).unwrap();
    let out = run_in(dir.path(), &["-d", "data.bin.lrz"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(fs::read(dir.path().join("data.bin")).unwrap(), data);
}

#[test]
fn decompress_requires_known_suffix_or_outfile() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("data.bin"), b"x").unwrap();
    let out = run_in(dir.path(), &["-g", "data.bin"]);
    assert!(out.status.success());

    fs::rename(
        dir.path().join("data.bin.lrz"),
        dir.path().join("odd-name"),
    )
    .unwrap();
    let out = run_in(dir.path(), &["-d", "odd-name"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains(".lrz"));

    let out = run_in(dir.path(), &["-d", "-o", "restored.bin", "odd-name"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(fs::read(dir.path().join("restored.bin")).unwrap(), b"x");
}

#[test]
fn stdout_and_stdin_plumbing() {
    let dir = tempfile::tempdir().unwrap();
    let data: Vec<u8> = (0u32..40_000).map(|i| (i % 251) as u8).collect();
    fs::write(dir.path().join("data.bin"), &data).unwrap();

    // Archive to stdout.
    let out = run_in(dir.path(), &["-g", "-o", "-", "data.bin"]);
    assert!(out.status.success());
    fs::write(dir.path().join("piped.lrz"), &out.stdout).unwrap();

    // Restore to stdout.
    let out = run_in(dir.path(), &["-d", "-o", "-", "piped.lrz"]);
    assert!(out.status.success());
    assert_eq!(out.stdout, data);

    // Compress from stdin.
    let mut child = lrzr()
        .current_dir(dir.path())
        .args(["-g", "-o", "from-stdin.lrz"])
        .stdin(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.as_mut().unwrap().write_all(&data).unwrap();
    let out = child.wait_with_output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let out = run_in(dir.path(), &["-d", "-o", "-", "from-stdin.lrz"]);
    assert!(out.status.success());
    assert_eq!(out.stdout, data);
}

#[test]
fn corrupt_archive_fails_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("data.bin"), b"will be damaged ".repeat(100)).unwrap();
    let out = run_in(dir.path(), &["data.bin"]);
    assert!(out.status.success());

    let mut raw = fs::read(dir.path().join("data.bin.lrz")).unwrap();
    let mid = raw.len() / 2;
    raw[mid] ^= 0xFF;
    fs::write(dir.path().join("data.bin.lrz"), &raw).unwrap();
    fs::remove_file(dir.path().join("data.bin")).unwrap();

    let out = run_in(dir.path(), &["-d", "data.bin.lrz"]);
    assert!(!out.status.success());
    assert!(
        !dir.path().join("data.bin").exists(),
        "partial output must be unlinked"
    );

    let out = run_in(dir.path(), &["-d", "-k", "data.bin.lrz"]);
    assert!(!out.status.success());
    assert!(dir.path().join("data.bin").exists(), "-k keeps partial output");
}

#[test]
fn test_mode_exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("data.bin"), b"verify").unwrap();
    assert!(run_in(dir.path(), &["data.bin"]).status.success());
    assert!(run_in(dir.path(), &["-t", "data.bin.lrz"]).status.success());

    // Damage the MD5 trailer: test mode must now fail.
    let mut raw = fs::read(dir.path().join("data.bin.lrz")).unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0x01;
    fs::write(dir.path().join("data.bin.lrz"), &raw).unwrap();
    assert!(!run_in(dir.path(), &["-t", "data.bin.lrz"]).status.success());
}

#[test]
fn info_mode_prints_structure() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("data.bin"), b"structure ".repeat(500)).unwrap();
    assert!(run_in(dir.path(), &["-b", "data.bin"]).status.success());

    let out = run_in(dir.path(), &["-i", "data.bin.lrz"]);
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("chunk 1"));
    assert!(text.contains("stream 0"));
}

#[test]
fn hash_option_prints_md5() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("data.bin"), b"hash me").unwrap();
    let out = run_in(dir.path(), &["-H", "data.bin"]);
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    let hex = text.split_whitespace().next().unwrap_or("");
    assert_eq!(hex.len(), 32);
    assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn bad_usage_is_reported() {
    let out = lrzr().arg("-Y").output().unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("bad usage"));
}

#[test]
fn version_flag_exits_cleanly() {
    let out = lrzr().arg("-V").output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("lrzr"));
}
