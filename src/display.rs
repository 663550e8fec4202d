//! Verbosity-gated diagnostics on stderr.
//!
//! A single process-wide notification level controls how chatty the tool is:
//! 0 = silent, 1 = errors only, 2 = results and warnings (default),
//! 3 = progress, 4 = everything.  Progress lines use `\r` rewrites and are
//! flushed eagerly at the highest level.

use std::sync::atomic::{AtomicI32, Ordering};

/// Process-wide notification level.
pub static DISPLAY_LEVEL: AtomicI32 = AtomicI32::new(2);

/// Set the notification level (clamped to 0..=4).
pub fn set_display_level(level: i32) {
    DISPLAY_LEVEL.store(level.clamp(0, 4), Ordering::Relaxed);
}

/// Current notification level.
pub fn display_level_now() -> i32 {
    DISPLAY_LEVEL.load(Ordering::Relaxed)
}

/// Write `msg` to stderr if the current notification level is at least
/// `level`.  Flushes when running at maximum verbosity so progress rewrites
/// appear promptly.
pub fn display_level(level: i32, msg: &str) {
    if DISPLAY_LEVEL.load(Ordering::Relaxed) >= level {
        eprint!("{msg}");
        if DISPLAY_LEVEL.load(Ordering::Relaxed) >= 4 {
            use std::io::Write;
            let _ = std::io::stderr().flush();
        }
    }
}

/// Formatting front-end for [`display_level`].
#[macro_export]
macro_rules! displaylevel {
    ($level:expr, $($arg:tt)*) => {
        $crate::display::display_level($level, &format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_is_clamped() {
        set_display_level(99);
        assert_eq!(display_level_now(), 4);
        set_display_level(-3);
        assert_eq!(display_level_now(), 0);
        set_display_level(2);
    }
}
