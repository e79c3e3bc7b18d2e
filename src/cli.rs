// Command-line front-end for cbdpatch.
//
//   cbdpatch [OPTIONS] <SOURCE> <PATCH> <OUTPUT>
//   cbdpatch [OPTIONS] <PATCH> <OUTPUT>
//   cbdpatch --header <PATCH>
//
// Prints "Done." on success. Any failure is reported on stderr with exit
// status 1.

use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Parser, ValueHint};

use crate::apply::{ApplyOptions, ApplyReport};
use crate::format::header::{self, PatchHeader};
use crate::store::FileStore;

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Apply CBD binary patches.
#[derive(Parser, Debug)]
#[command(
    name = "cbdpatch",
    version,
    about = "Apply a CBD binary patch to a source file",
    arg_required_else_help = true
)]
struct Cli {
    /// [SOURCE] PATCH OUTPUT, or PATCH alone with --header.
    #[arg(
        value_name = "FILES",
        num_args = 1..=3,
        required = true,
        value_hint = ValueHint::FilePath
    )]
    files: Vec<PathBuf>,

    /// Treat the patch as a raw instruction stream without a header.
    #[arg(long)]
    no_header: bool,

    /// Skip the source file CRC check.
    #[arg(long)]
    no_source_crc: bool,

    /// Skip the instruction-section CRC check.
    #[arg(long)]
    no_patch_crc: bool,

    /// Known CRC-32 of the source file (hex), instead of computing it.
    #[arg(long, value_name = "HEX", value_parser = parse_hex_u32)]
    source_crc: Option<u32>,

    /// Minimum accepted source version.
    #[arg(long, value_name = "N")]
    min_source_version: Option<u16>,

    /// Minimum accepted target version.
    #[arg(long, value_name = "N")]
    min_target_version: Option<u16>,

    /// Print the patch header and exit.
    #[arg(long = "header", conflicts_with = "no_header")]
    print_header: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json")]
    json_output: bool,
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid CRC '{s}': {e}"))
}

// ---------------------------------------------------------------------------
// Resolved options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Apply {
        source: Option<PathBuf>,
        patch: PathBuf,
        output: PathBuf,
    },
    PrintHeader {
        patch: PathBuf,
    },
}

#[derive(Debug)]
struct Options {
    command: Command,
    apply: ApplyOptions,
    quiet: bool,
    verbose: u8,
    json_output: bool,
}

fn resolve_options(cli: Cli) -> Result<Options, String> {
    let command = match (cli.print_header, cli.files.as_slice()) {
        (true, [patch]) => Command::PrintHeader {
            patch: patch.clone(),
        },
        (true, files) => {
            return Err(format!(
                "--header takes a single patch file, got {} paths",
                files.len()
            ));
        }
        (false, [patch, output]) => Command::Apply {
            source: None,
            patch: patch.clone(),
            output: output.clone(),
        },
        (false, [source, patch, output]) => Command::Apply {
            source: Some(source.clone()),
            patch: patch.clone(),
            output: output.clone(),
        },
        (false, files) => {
            return Err(format!(
                "expected <SOURCE> <PATCH> <OUTPUT> or <PATCH> <OUTPUT>, got {} paths",
                files.len()
            ));
        }
    };

    let apply = ApplyOptions {
        patch_has_header: !cli.no_header,
        check_source_crc: !cli.no_source_crc,
        check_patch_crc: !cli.no_patch_crc,
        source_crc: cli.source_crc,
        min_source_version: cli.min_source_version,
        min_destination_version: cli.min_target_version,
    };

    Ok(Options {
        command,
        apply,
        quiet: cli.quiet,
        verbose: cli.verbose.min(2),
        json_output: cli.json_output,
    })
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("cbdpatch".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv) {
        let _ = resolve_options(cli);
    }
}

fn log_filter(quiet: bool, verbose: u8) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "debug",
        (false, _) => "trace",
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn report_json(report: &ApplyReport) -> serde_json::Value {
    serde_json::json!({
        "command": "apply",
        "output_size": report.dst_length,
        "output_crc32": format!("{:08X}", report.dst_crc32),
        "instructions": report.instructions,
        "header": report.header.is_some(),
    })
}

fn cmd_apply(opts: &Options, source: Option<&Path>, patch: &Path, output: &Path) -> i32 {
    match crate::io::apply_file(source, patch, output, opts.apply) {
        Ok(report) => {
            if opts.verbose > 0 && !opts.quiet {
                eprintln!(
                    "cbdpatch: output size: {}, crc32: {:08X}, instructions: {}",
                    report.dst_length, report.dst_crc32, report.instructions
                );
            }
            if opts.json_output {
                eprintln!("{:#}", report_json(&report));
            }
            if !opts.quiet {
                println!("Done.");
            }
            0
        }
        Err(e) => {
            eprintln!("cbdpatch: {e}");
            1
        }
    }
}

fn header_json(h: &PatchHeader) -> serde_json::Value {
    let flags: Vec<&str> = h.flags.iter_names().map(|(name, _)| name).collect();
    serde_json::json!({
        "command": "header",
        "magic_valid": h.magic_valid(),
        "version": header::version_string(h.version),
        "flags": flags,
        "source_length": h.src_length,
        "target_length": h.dst_length,
        "source_version": h.src_version,
        "target_version": h.dst_version,
        "instruction_count": h.instruction_count,
        "instruction_crc32": format!("{:08X}", h.instruction_crc32),
        "source_crc32": format!("{:08X}", h.src_crc32),
        "target_crc32": format!("{:08X}", h.dst_crc32),
        "header_crc_valid": h.header_crc_valid(),
    })
}

fn cmd_print_header(opts: &Options, patch: &Path) -> i32 {
    let header = FileStore::open(patch).and_then(|mut store| PatchHeader::read_from(&mut store));
    match header {
        Ok(h) => {
            println!("{h}");
            if opts.json_output {
                eprintln!("{:#}", header_json(&h));
            }
            0
        }
        Err(e) => {
            eprintln!("cbdpatch: {}: {e}", patch.display());
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches the command.
pub fn run() -> ! {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(cli.quiet, cli.verbose)),
    )
    .format_timestamp(None)
    .format_target(false)
    .init();

    let opts = match resolve_options(cli) {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("cbdpatch: {msg}");
            process::exit(1);
        }
    };

    let exit_code = match &opts.command {
        Command::Apply {
            source,
            patch,
            output,
        } => cmd_apply(&opts, source.as_deref(), patch, output),
        Command::PrintHeader { patch } => cmd_print_header(&opts, patch),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn try_parse(args: &[&str]) -> Result<Options, String> {
        let argv: Vec<String> = std::iter::once("cbdpatch".to_string())
            .chain(args.iter().map(|s| s.to_string()))
            .collect();
        let cli = Cli::try_parse_from(argv).map_err(|e| e.to_string())?;
        resolve_options(cli)
    }

    fn parse_opts(args: &[&str]) -> Options {
        try_parse(args).expect("cli parse failed")
    }

    #[test]
    fn three_paths_with_source() {
        let opts = parse_opts(&["old.bin", "fix.cbd", "new.bin"]);
        assert_eq!(
            opts.command,
            Command::Apply {
                source: Some(PathBuf::from("old.bin")),
                patch: PathBuf::from("fix.cbd"),
                output: PathBuf::from("new.bin"),
            }
        );
        assert_eq!(opts.apply, ApplyOptions::default());
    }

    #[test]
    fn two_paths_without_source() {
        let opts = parse_opts(&["fix.cbd", "new.bin"]);
        assert_eq!(
            opts.command,
            Command::Apply {
                source: None,
                patch: PathBuf::from("fix.cbd"),
                output: PathBuf::from("new.bin"),
            }
        );
    }

    #[test]
    fn one_path_needs_header_flag() {
        assert!(try_parse(&["fix.cbd"]).is_err());
        let opts = parse_opts(&["--header", "fix.cbd"]);
        assert_eq!(
            opts.command,
            Command::PrintHeader {
                patch: PathBuf::from("fix.cbd")
            }
        );
        assert!(try_parse(&["--header", "a", "b"]).is_err());
    }

    #[test]
    fn too_many_paths() {
        assert!(try_parse(&["a", "b", "c", "d"]).is_err());
    }

    #[test]
    fn check_flags_map_to_options() {
        let opts = parse_opts(&[
            "--no-source-crc",
            "--no-patch-crc",
            "--min-source-version",
            "3",
            "--min-target-version",
            "7",
            "a",
            "b",
            "c",
        ]);
        assert!(!opts.apply.check_source_crc);
        assert!(!opts.apply.check_patch_crc);
        assert!(opts.apply.patch_has_header);
        assert_eq!(opts.apply.min_source_version, Some(3));
        assert_eq!(opts.apply.min_destination_version, Some(7));
    }

    #[test]
    fn raw_stream_flag() {
        let opts = parse_opts(&["--no-header", "a", "b"]);
        assert!(!opts.apply.patch_has_header);
        assert!(try_parse(&["--no-header", "--header", "a"]).is_err());
    }

    #[test]
    fn source_crc_is_hex() {
        let opts = parse_opts(&["--source-crc", "cbf43926", "a", "b", "c"]);
        assert_eq!(opts.apply.source_crc, Some(0xCBF4_3926));
        let opts = parse_opts(&["--source-crc", "0xDEADBEEF", "a", "b", "c"]);
        assert_eq!(opts.apply.source_crc, Some(0xDEAD_BEEF));
        assert!(try_parse(&["--source-crc", "xyz", "a", "b", "c"]).is_err());
    }

    #[test]
    fn verbose_is_capped() {
        let opts = parse_opts(&["-v", "-v", "-v", "a", "b"]);
        assert_eq!(opts.verbose, 2);
        assert!(try_parse(&["-q", "-v", "a", "b"]).is_err());
    }

    #[test]
    fn log_filter_levels() {
        assert_eq!(log_filter(false, 0), "warn");
        assert_eq!(log_filter(false, 1), "debug");
        assert_eq!(log_filter(false, 2), "trace");
        assert_eq!(log_filter(true, 0), "error");
    }

    #[test]
    fn json_report_fields() {
        let report = ApplyReport {
            dst_crc32: 0xAB,
            dst_length: 9,
            header: None,
            instructions: 2,
        };
        let json = report_json(&report);
        assert_eq!(json["output_size"], 9);
        assert_eq!(json["output_crc32"], "000000AB");
        assert_eq!(json["header"], false);
    }

    #[test]
    fn fuzz_parse_does_not_panic() {
        fuzz_try_parse_args(&["--header".into()]);
        fuzz_try_parse_args(&["--bogus".into(), "x".into()]);
    }
}
