//! Binary entry point.
//!
//! Parses arguments, applies process-level settings (verbosity, nice
//! value), resolves input/output names, and dispatches each input file to
//! the requested operation.  Unseekable endpoints (stdin/stdout) are staged
//! through scratch files that are unlinked automatically.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context};

use lrz::cli::{parse_args, ParsedArgs};
use lrz::compress::compress_fd;
use lrz::config::MAGIC_LEN;
use lrz::control::{Control, OpMode};
use lrz::decompress::{decompress_fd, info_file, test_file};
use lrz::display::set_display_level;
use lrz::magic::read_magic;
use lrz::util;

const STDIN_MARK: &str = "-";

fn main() -> ExitCode {
    let exe = std::env::args()
        .next()
        .unwrap_or_else(|| "lrzr".to_string());
    let parsed = match parse_args(&exe) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{exe}: {e}");
            return ExitCode::FAILURE;
        }
    };
    if parsed.exit_early {
        return ExitCode::SUCCESS;
    }
    match run(&exe, parsed) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{exe}: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(exe: &str, parsed: ParsedArgs) -> anyhow::Result<bool> {
    let ParsedArgs {
        mut control,
        mut files,
        verbosity,
        ..
    } = parsed;

    set_display_level(2 + verbosity);
    if !util::set_nice(control.nice) {
        lrz::displaylevel!(3, "Warning: could not set nice value {}\n", control.nice);
    }

    if files.is_empty() {
        files.push(STDIN_MARK.to_string());
    }

    let mut all_ok = true;
    for file in &files {
        let result = match control.op {
            OpMode::Compress => do_compress(&mut control, file),
            OpMode::Decompress => do_decompress(&mut control, file),
            OpMode::Test => do_test(&mut control, file),
            OpMode::Info => info_file(&control, Path::new(file)).map_err(Into::into),
        };
        if let Err(e) = result {
            eprintln!("{exe}: {file}: {e}");
            all_ok = false;
        }
    }
    Ok(all_ok)
}

/// Output path for compression: explicit file, chosen directory, or the
/// input name plus the suffix.
fn compressed_name(control: &Control, input: &str) -> PathBuf {
    if let Some(out) = &control.outfile {
        return out.clone();
    }
    let name = format!("{input}{}", control.suffix);
    match &control.outdir {
        Some(dir) => {
            let base = Path::new(&name)
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(&name));
            dir.join(base)
        }
        None => PathBuf::from(name),
    }
}

/// Output path for decompression: explicit file, or the input name with
/// the suffix stripped (into the chosen directory).
fn decompressed_name(control: &Control, input: &str) -> anyhow::Result<PathBuf> {
    if let Some(out) = &control.outfile {
        return Ok(out.clone());
    }
    let stripped = input.strip_suffix(&control.suffix).ok_or_else(|| {
        anyhow!(
            "{input} does not end in {}; name the output with -o",
            control.suffix
        )
    })?;
    match &control.outdir {
        Some(dir) => {
            let base = Path::new(stripped)
                .file_name()
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("cannot derive an output name from {input}"))?;
            Ok(dir.join(base))
        }
        None => Ok(PathBuf::from(stripped)),
    }
}

/// Copy stdin into an unlinked scratch file so the pipeline can seek.
fn stage_stdin(control: &Control) -> anyhow::Result<(File, u64)> {
    let mut scratch =
        tempfile::tempfile_in(&control.tmpdir).context("create scratch file for stdin")?;
    let len = io::copy(&mut io::stdin().lock(), &mut scratch).context("stage stdin")?;
    scratch.seek(SeekFrom::Start(0)).context("rewind scratch")?;
    Ok((scratch, len))
}

fn prompt_password(control: &mut Control, confirm: bool) -> anyhow::Result<()> {
    if control.password.is_none() {
        control.password = Some(util::read_password("Enter passphrase: ", confirm)?);
    }
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn do_compress(control: &mut Control, input: &str) -> anyhow::Result<()> {
    if control.encrypt {
        prompt_password(control, true)?;
    }

    let (mut in_file, in_len, from_stdin) = if input == STDIN_MARK {
        let (file, len) = stage_stdin(control)?;
        (file, len, true)
    } else {
        let file = File::open(input).with_context(|| format!("open {input}"))?;
        let len = file.metadata().context("stat input")?.len();
        (file, len, false)
    };

    let summary;
    if control.to_stdout {
        let mut out = tempfile::tempfile_in(&control.tmpdir).context("create scratch output")?;
        summary = compress_fd(control, &mut in_file, &out, in_len)?;
        out.seek(SeekFrom::Start(0)).context("rewind scratch")?;
        io::copy(&mut out, &mut io::stdout().lock()).context("write archive to stdout")?;
    } else {
        let in_name = if from_stdin { "stdin" } else { input };
        let out_path = compressed_name(control, in_name);
        if out_path.exists() && !control.force {
            return Err(anyhow!(
                "{} already exists; use -f to overwrite",
                out_path.display()
            ));
        }
        let out_file = File::options()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&out_path)
            .with_context(|| format!("create {}", out_path.display()))?;
        summary = compress_fd(control, &mut in_file, &out_file, in_len)?;
        if !from_stdin {
            util::preserve_metadata(Path::new(input), &out_path);
        }
    }

    if control.show_hash {
        if let Some(md5) = summary.md5 {
            println!("{}  {input}", hex(&md5));
        }
    }
    if control.delete_source && !from_stdin {
        std::fs::remove_file(input).with_context(|| format!("remove {input}"))?;
    }
    Ok(())
}

/// Peek at the archive header to learn whether a passphrase is needed
/// before opening any output.
fn needs_password(input: &str) -> anyhow::Result<bool> {
    let mut file = File::open(input).with_context(|| format!("open {input}"))?;
    let mut raw = [0u8; MAGIC_LEN];
    file.read_exact(&mut raw).context("read archive header")?;
    Ok(read_magic(&raw)
        .map(|m| m.encrypted)
        .unwrap_or(false))
}

fn do_decompress(control: &mut Control, input: &str) -> anyhow::Result<()> {
    if input == STDIN_MARK {
        return Err(anyhow!("decompression needs a seekable archive file"));
    }
    if needs_password(input)? {
        prompt_password(control, false)?;
    }

    let summary;
    if control.to_stdout {
        let mut in_file = File::open(input).with_context(|| format!("open {input}"))?;
        let out = tempfile::tempfile_in(&control.tmpdir).context("create scratch output")?;
        let out2 = out.try_clone().context("clone scratch output")?;
        summary = decompress_fd(control, &mut in_file, out)?;
        let mut out = out2;
        out.seek(SeekFrom::Start(0)).context("rewind scratch")?;
        io::copy(&mut out, &mut io::stdout().lock()).context("write output to stdout")?;
        io::stdout().flush().context("flush stdout")?;
    } else {
        let out_path = decompressed_name(control, input)?;
        summary = lrz::decompress::decompress_file(control, Path::new(input), &out_path)?;
    }

    if control.show_hash {
        if let Some(md5) = summary.md5 {
            println!("{}  {input}", hex(&md5));
        }
    }
    if control.delete_source {
        std::fs::remove_file(input).with_context(|| format!("remove {input}"))?;
    }
    Ok(())
}

fn do_test(control: &mut Control, input: &str) -> anyhow::Result<()> {
    if needs_password(input)? {
        prompt_password(control, false)?;
    }
    let summary = test_file(control, Path::new(input))?;
    lrz::displaylevel!(
        2,
        "{input}: OK ({} bytes reconstructed)\n",
        summary.out_bytes
    );
    if control.show_hash {
        if let Some(md5) = summary.md5 {
            println!("{}  {input}", hex(&md5));
        }
    }
    Ok(())
}
