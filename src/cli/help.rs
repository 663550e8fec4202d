//! Usage and version text.

use crate::config::{LRZ_MAJOR_VERSION, LRZ_MINOR_VERSION};

pub fn version_string() -> String {
    format!("lrzr {LRZ_MAJOR_VERSION}.{LRZ_MINOR_VERSION}0")
}

pub fn print_version() {
    println!("{}", version_string());
}

pub fn print_help(exe: &str) {
    println!("{}", version_string());
    println!("Usage: {exe} [options] <file...>");
    println!();
    println!("General options:");
    println!("  -d           decompress");
    println!("  -t           test archive integrity, produce no output");
    println!("  -i           show archive structure information");
    println!("  -h, -?       show this help");
    println!("  -V           show version");
    println!("  -v[v]        increase verbosity");
    println!("  -q           show errors only");
    println!();
    println!("Compression options:");
    println!("  -n           no back-end compression (rzip pass only)");
    println!("  -l           LZO back end (ultra fast)");
    println!("  -g           deflate back end (fast)");
    println!("  -b           bzip2 back end");
    println!("  -z           context-mixing back end (best, slowest)");
    println!("               (default back end is LZMA)");
    println!("  -L n         compression level 1..9 (default 7)");
    println!("  -w n         maximum redundancy window in hundreds of MB");
    println!("  -U           unlimited window (ignore RAM-derived cap)");
    println!("  -T           disable the incompressibility probe");
    println!("  -e           encrypt with a password");
    println!("  -H           display the MD5 of the processed data");
    println!();
    println!("File handling:");
    println!("  -o file      write output to file ('-' for stdout)");
    println!("  -O dir       write output into dir");
    println!("  -S suf       use suffix suf instead of .lrz");
    println!("  -D           delete the source file on success");
    println!("  -f           overwrite existing output files");
    println!("  -k           keep broken or damaged output files");
    println!("  -c           verify written output against the archive MD5");
    println!();
    println!("Resources:");
    println!("  -p n         limit worker threads to n");
    println!("  -N n         nice value (-20..19, default 19)");
}
