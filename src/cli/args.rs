//! Hand-rolled argument parsing.
//!
//! Short options may be aggregated (`-dvf`); options taking a value accept
//! it attached (`-L7`) or as the next argument.  A bare `--` ends option
//! processing.  Errors come back as `anyhow` messages prefixed with
//! `bad usage:` so the binary can print them and exit nonzero.
//!
//! [`parse_args_from`] takes an explicit argv slice so tests never touch
//! the process environment.

use anyhow::{anyhow, bail};

use crate::codec::CodecKind;
use crate::control::{Control, OpMode};

/// Everything the binary needs after parsing.
pub struct ParsedArgs {
    pub control: Control,
    pub files: Vec<String>,
    /// Help or version was printed; exit 0 without doing work.
    pub exit_early: bool,
    /// Requested verbosity delta (applied to the global display level).
    pub verbosity: i32,
}

pub fn parse_args(exe_name: &str) -> anyhow::Result<ParsedArgs> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    parse_args_from(exe_name, &argv)
}

pub fn parse_args_from(exe_name: &str, argv: &[String]) -> anyhow::Result<ParsedArgs> {
    let mut control = Control::new();
    let mut files = Vec::new();
    let mut exit_early = false;
    let mut verbosity = 0i32;
    let mut no_more_options = false;

    let mut idx = 0usize;
    while idx < argv.len() {
        let arg = &argv[idx];
        idx += 1;
        if arg.is_empty() {
            continue;
        }
        if no_more_options || !arg.starts_with('-') || arg == "-" {
            files.push(arg.clone());
            continue;
        }

        // Long options.
        if let Some(long) = arg.strip_prefix("--") {
            if long.is_empty() {
                no_more_options = true;
                continue;
            }
            let (name, inline_value) = match long.split_once('=') {
                Some((n, v)) => (n, Some(v.to_string())),
                None => (long, None),
            };
            fn long_value(
                argv: &[String],
                idx: &mut usize,
                inline: &Option<String>,
                name: &str,
                what: &str,
            ) -> anyhow::Result<String> {
                if let Some(v) = inline {
                    return Ok(v.clone());
                }
                let v = argv
                    .get(*idx)
                    .cloned()
                    .ok_or_else(|| anyhow!("bad usage: --{name} requires {what}"))?;
                *idx += 1;
                Ok(v)
            }
            match name {
                "help" => {
                    super::help::print_help(exe_name);
                    exit_early = true;
                }
                "version" => {
                    super::help::print_version();
                    exit_early = true;
                }
                "decompress" => control.op = OpMode::Decompress,
                "test" => control.op = OpMode::Test,
                "info" => control.op = OpMode::Info,
                "encrypt" => control.encrypt = true,
                "force" => control.force = true,
                "keep-broken" => control.keep_broken = true,
                "delete" => control.delete_source = true,
                "check" => control.check_output = true,
                "no-compress" => control.codec = CodecKind::None,
                "lzo" => control.codec = CodecKind::Lzo,
                "gzip" => control.codec = CodecKind::Gzip,
                "bzip2" => control.codec = CodecKind::Bzip2,
                "zpaq" => control.codec = CodecKind::Zpaq,
                "unlimited" => control.unlimited_window = true,
                "no-test" => control.lzo_threshold = 2.0,
                "hash" => control.show_hash = true,
                "quiet" => verbosity -= 1,
                "verbose" => verbosity += 1,
                "level" => {
                    let v = long_value(argv, &mut idx, &inline_value, name, "a level")?;
                    control.level = parse_level(&v)?;
                }
                "window" => {
                    let v = long_value(argv, &mut idx, &inline_value, name, "a window size")?;
                    control.window = v
                        .parse()
                        .map_err(|_| anyhow!("bad usage: invalid window '{v}'"))?;
                }
                "threads" => {
                    let v = long_value(argv, &mut idx, &inline_value, name, "a thread count")?;
                    control.threads = parse_threads(&v, control.threads)?;
                }
                "nice-level" => {
                    let v = long_value(argv, &mut idx, &inline_value, name, "a nice value")?;
                    control.nice = parse_nice(&v)?;
                }
                "suffix" => {
                    control.suffix =
                        long_value(argv, &mut idx, &inline_value, name, "a suffix")?;
                }
                "outfile" => {
                    let v = long_value(argv, &mut idx, &inline_value, name, "a file name")?;
                    set_outfile(&mut control, &v);
                }
                "outdir" => {
                    let v = long_value(argv, &mut idx, &inline_value, name, "a directory")?;
                    control.outdir = Some(v.into());
                }
                other => bail!("bad usage: unknown option --{other}"),
            }
            continue;
        }

        // Aggregated short options.
        let mut chars = arg[1..].chars();
        while let Some(opt) = chars.next() {
            // Value-taking options consume the rest of the argument or the
            // next one.
            let mut take_value = |what: &str| -> anyhow::Result<String> {
                let rest: String = chars.by_ref().collect();
                if !rest.is_empty() {
                    return Ok(rest);
                }
                let v = argv
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| anyhow!("bad usage: -{opt} requires {what}"))?;
                idx += 1;
                Ok(v)
            };
            match opt {
                'd' => control.op = OpMode::Decompress,
                't' => control.op = OpMode::Test,
                'i' => control.op = OpMode::Info,
                'n' => control.codec = CodecKind::None,
                'l' => control.codec = CodecKind::Lzo,
                'g' => control.codec = CodecKind::Gzip,
                'b' => control.codec = CodecKind::Bzip2,
                'z' => control.codec = CodecKind::Zpaq,
                'e' => control.encrypt = true,
                'D' => control.delete_source = true,
                'f' => control.force = true,
                'k' => control.keep_broken = true,
                'c' => control.check_output = true,
                'U' => control.unlimited_window = true,
                'T' => control.lzo_threshold = 2.0,
                'H' => control.show_hash = true,
                'v' => verbosity += 1,
                'q' => verbosity -= 1,
                'h' | '?' => {
                    super::help::print_help(exe_name);
                    exit_early = true;
                }
                'V' => {
                    super::help::print_version();
                    exit_early = true;
                }
                'L' => control.level = parse_level(&take_value("a level")?)?,
                'w' => {
                    let v = take_value("a window size")?;
                    control.window = v
                        .parse()
                        .map_err(|_| anyhow!("bad usage: invalid window '{v}'"))?;
                }
                'p' => {
                    let v = take_value("a thread count")?;
                    control.threads = parse_threads(&v, control.threads)?;
                }
                'N' => control.nice = parse_nice(&take_value("a nice value")?)?,
                'S' => control.suffix = take_value("a suffix")?,
                'o' => {
                    let v = take_value("a file name")?;
                    set_outfile(&mut control, &v);
                }
                'O' => control.outdir = Some(take_value("a directory")?.into()),
                other => bail!("bad usage: unknown option -{other}"),
            }
        }
    }

    if control.outfile.is_some() && control.outdir.is_some() {
        bail!("bad usage: -o and -O are mutually exclusive");
    }
    if control.outfile.is_some() && files.len() > 1 {
        bail!("bad usage: -o cannot name one output for multiple inputs");
    }

    Ok(ParsedArgs {
        control,
        files,
        exit_early,
        verbosity,
    })
}

fn set_outfile(control: &mut Control, value: &str) {
    if value == "-" {
        control.to_stdout = true;
    } else {
        control.outfile = Some(value.into());
    }
}

fn parse_level(v: &str) -> anyhow::Result<u32> {
    let level: u32 = v
        .parse()
        .map_err(|_| anyhow!("bad usage: invalid level '{v}'"))?;
    if !(1..=9).contains(&level) {
        bail!("bad usage: level must be within 1..9");
    }
    Ok(level)
}

fn parse_threads(v: &str, current: usize) -> anyhow::Result<usize> {
    let n: usize = v
        .parse()
        .map_err(|_| anyhow!("bad usage: invalid thread count '{v}'"))?;
    if n == 0 {
        bail!("bad usage: thread count must be at least 1");
    }
    // Configuration may lower the worker count, never raise it.
    Ok(n.min(current))
}

fn parse_nice(v: &str) -> anyhow::Result<i32> {
    let n: i32 = v
        .parse()
        .map_err(|_| anyhow!("bad usage: invalid nice value '{v}'"))?;
    if !(-20..=19).contains(&n) {
        bail!("bad usage: nice value must be within -20..19");
    }
    Ok(n)
}
