//! Small host-facing helpers: memory detection, scheduling priority,
//! scratch-directory selection, metadata preservation, passphrase input, and
//! allocation with back-off.

use std::env;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use crate::error::{LrzError, Result};

/// Physical memory in bytes, via sysconf.  Falls back to 1 GB when the host
/// will not say.
pub fn physical_ram() -> u64 {
    // SAFETY: plain sysconf queries with no memory arguments.
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };
    if pages > 0 && page_size > 0 {
        pages as u64 * page_size as u64
    } else {
        1 << 30
    }
}

/// Lower (or raise, for negative values) the process priority.  Failure is
/// not fatal; compression proceeds at the inherited priority.
pub fn set_nice(nice: i32) -> bool {
    // SAFETY: setpriority on our own process id.
    unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) == 0 }
}

/// Scratch directory from the usual environment variables, `/tmp` otherwise.
pub fn scratch_dir() -> PathBuf {
    for var in ["TMPDIR", "TMP", "TEMPDIR", "TEMP"] {
        if let Some(dir) = env::var_os(var) {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
    }
    PathBuf::from("/tmp")
}

/// Copy permissions and modification time from `src` onto `dst`.  Both are
/// best-effort: a read-only target directory should not fail the whole run.
pub fn preserve_metadata(src: &Path, dst: &Path) {
    if let Ok(meta) = fs::metadata(src) {
        let _ = fs::set_permissions(dst, meta.permissions());
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        let _ = filetime::set_file_mtime(dst, mtime);
    }
}

/// Allocate a zeroed buffer of `want` bytes, shrinking by 10% steps when the
/// allocator refuses, but never below `floor`.
pub fn alloc_backoff(mut want: usize, floor: usize) -> Result<Vec<u8>> {
    loop {
        let mut buf = Vec::new();
        if buf.try_reserve_exact(want).is_ok() {
            buf.resize(want, 0);
            return Ok(buf);
        }
        if want <= floor {
            return Err(LrzError::Resource(format!(
                "cannot allocate {want} byte buffer"
            )));
        }
        want = (want / 10 * 9).max(floor);
    }
}

/// Read a passphrase from the controlling terminal with echo disabled.
///
/// Asks twice when `confirm` is set and insists the two entries agree.
pub fn read_password(prompt: &str, confirm: bool) -> Result<Zeroizing<String>> {
    let first = prompt_tty(prompt)?;
    if first.is_empty() {
        return Err(LrzError::Crypto("empty passphrase".into()));
    }
    if confirm {
        let second = prompt_tty("Re-enter passphrase: ")?;
        if *first != *second {
            return Err(LrzError::Crypto("passphrases do not match".into()));
        }
    }
    Ok(first)
}

fn prompt_tty(prompt: &str) -> Result<Zeroizing<String>> {
    let mut tty = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/tty")
        .map_err(LrzError::io("open /dev/tty"))?;
    tty.write_all(prompt.as_bytes())
        .map_err(LrzError::io("write passphrase prompt"))?;
    tty.flush().map_err(LrzError::io("flush passphrase prompt"))?;

    let echo = EchoGuard::disable(&tty)?;
    let mut line = Zeroizing::new(String::new());
    let mut byte = [0u8; 1];
    loop {
        match tty.read(&mut byte) {
            Ok(0) => break,
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => line.push(byte[0] as char),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                drop(echo);
                return Err(LrzError::io("read passphrase")(e));
            }
        }
    }
    drop(echo);
    let _ = tty.write_all(b"\n");
    Ok(line)
}

/// Restores terminal echo on drop, including on the error paths above.
struct EchoGuard {
    fd: i32,
    saved: libc::termios,
}

impl EchoGuard {
    fn disable(tty: &fs::File) -> Result<Self> {
        use std::os::unix::io::AsRawFd;
        let fd = tty.as_raw_fd();
        // SAFETY: termios is plain-old-data; fd is a live tty descriptor.
        unsafe {
            let mut saved: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut saved) != 0 {
                return Err(LrzError::Crypto("not a terminal".into()));
            }
            let mut raw = saved;
            raw.c_lflag &= !libc::ECHO;
            if libc::tcsetattr(fd, libc::TCSANOW, &raw) != 0 {
                return Err(LrzError::Crypto("cannot disable terminal echo".into()));
            }
            Ok(EchoGuard { fd, saved })
        }
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        // SAFETY: restoring the attributes captured in disable().
        unsafe {
            libc::tcsetattr(self.fd, libc::TCSANOW, &self.saved);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_detection_returns_something_plausible() {
        assert!(physical_ram() >= 1 << 20);
    }

    #[test]
    fn scratch_dir_prefers_tmpdir() {
        // Only checks the fallback path; mutating the environment would race
        // with parallel tests.
        assert!(!scratch_dir().as_os_str().is_empty());
    }

    #[test]
    fn alloc_backoff_floors_out() {
        let buf = alloc_backoff(4096, 16).unwrap();
        assert_eq!(buf.len(), 4096);
    }
}
