//! Command-line front end for the coverage index.
//!
//! One subcommand per facade operation: ingest a trace file, query the
//! reverse maps, dump stats, or listen for live trace streams. Results go
//! to stdout as JSON; logs go to stderr so output stays pipeable.

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use covmap::{CoverageIndex, FrameworkId, IndexConfig};
use covmap_error::CovmapError;
use covmap_protocol::{SocketTraceListener, TraceFileReader, TraceSource};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7932";
const DEFAULT_POLL_MS: u64 = 50;

#[derive(Debug)]
enum Command {
    Ingest {
        root: PathBuf,
        trace: PathBuf,
    },
    Query {
        root: PathBuf,
        target: QueryTarget,
    },
    Files {
        root: PathBuf,
        class: String,
        method: String,
        framework: FrameworkId,
    },
    Stats {
        root: PathBuf,
    },
    Listen {
        root: PathBuf,
        addr: String,
        poll_interval: Duration,
    },
}

#[derive(Debug)]
enum QueryTarget {
    Method {
        class: String,
        method: String,
        framework: FrameworkId,
    },
    File {
        path: String,
    },
}

enum CliError {
    Usage(String),
    Index(CovmapError),
}

impl From<CovmapError> for CliError {
    fn from(err: CovmapError) -> Self {
        Self::Index(err)
    }
}

fn print_help() {
    let help = "\
covmap — persistent reverse test-coverage index

USAGE:
    covmap <COMMAND> [OPTIONS]

COMMANDS:
    ingest    Apply every record from a trace file to the index
    query     List tests covering a method, or tests that touched a file
    files     List file paths a test's last recorded run touched
    stats     Print name-table and log sizes for an index root
    listen    Accept live trace streams over a socket

OPTIONS:
    --root <DIR>           Index root directory (required by every command)
    --trace <FILE>         Trace file to ingest (ingest)
    --class <FQN>          Production class (query) or test class (files)
    --method <NAME>        Production method (query) or test method (files)
    --file <PATH>          Query by touched file instead of class/method (query)
    --framework <NAME|N>   junit, testng, or a raw framework byte (default junit)
    --addr <ADDR>          Listen address (listen, default 127.0.0.1:7932)
    --poll-ms <N>          Accept-poll sleep in milliseconds (listen, default 50)
    -h, --help             Show this help
";
    println!("{help}");
}

#[derive(Debug, Default)]
struct Flags {
    root: Option<PathBuf>,
    trace: Option<PathBuf>,
    class: Option<String>,
    method: Option<String>,
    file: Option<String>,
    framework: Option<FrameworkId>,
    addr: Option<String>,
    poll_ms: Option<u64>,
}

fn take_value<'a>(args: &'a [String], index: &mut usize, flag: &str) -> Result<&'a str, String> {
    *index += 1;
    args.get(*index)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_framework(value: &str) -> Option<FrameworkId> {
    match value.to_ascii_lowercase().as_str() {
        "junit" => Some(FrameworkId::JUNIT),
        "testng" => Some(FrameworkId::TESTNG),
        other => other.parse::<u8>().ok().map(FrameworkId),
    }
}

fn parse_flags(args: &[String]) -> Result<Flags, String> {
    let mut flags = Flags::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--root" => flags.root = Some(PathBuf::from(take_value(args, &mut index, "--root")?)),
            "--trace" => {
                flags.trace = Some(PathBuf::from(take_value(args, &mut index, "--trace")?));
            }
            "--class" => flags.class = Some(take_value(args, &mut index, "--class")?.to_owned()),
            "--method" => {
                flags.method = Some(take_value(args, &mut index, "--method")?.to_owned());
            }
            "--file" => flags.file = Some(take_value(args, &mut index, "--file")?.to_owned()),
            "--framework" => {
                let value = take_value(args, &mut index, "--framework")?;
                flags.framework = Some(parse_framework(value).ok_or_else(|| {
                    format!("invalid --framework value: {value} (expected junit|testng|0-255)")
                })?);
            }
            "--addr" => flags.addr = Some(take_value(args, &mut index, "--addr")?.to_owned()),
            "--poll-ms" => {
                let value = take_value(args, &mut index, "--poll-ms")?;
                flags.poll_ms = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| format!("invalid --poll-ms value: {value}"))?,
                );
            }
            "-h" | "--help" => {
                print_help();
                return Err(String::new());
            }
            unknown => return Err(format!("unknown option: {unknown}")),
        }
        index += 1;
    }
    Ok(flags)
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let Some((name, rest)) = args.split_first() else {
        print_help();
        return Err(String::new());
    };
    if name == "-h" || name == "--help" {
        print_help();
        return Err(String::new());
    }

    let flags = parse_flags(rest)?;
    match name.as_str() {
        "ingest" => Ok(Command::Ingest {
            root: flags.root.ok_or_else(|| "--root is required".to_owned())?,
            trace: flags.trace.ok_or_else(|| "--trace is required".to_owned())?,
        }),
        "query" => {
            let root = flags.root.ok_or_else(|| "--root is required".to_owned())?;
            let target = match (flags.class, flags.method, flags.file) {
                (Some(class), Some(method), None) => QueryTarget::Method {
                    class,
                    method,
                    framework: flags.framework.unwrap_or(FrameworkId::JUNIT),
                },
                (None, None, Some(path)) => QueryTarget::File { path },
                _ => {
                    return Err("query needs either --class and --method, or --file".to_owned());
                }
            };
            Ok(Command::Query { root, target })
        }
        "files" => Ok(Command::Files {
            root: flags.root.ok_or_else(|| "--root is required".to_owned())?,
            class: flags.class.ok_or_else(|| "--class is required".to_owned())?,
            method: flags
                .method
                .ok_or_else(|| "--method is required".to_owned())?,
            framework: flags.framework.unwrap_or(FrameworkId::JUNIT),
        }),
        "stats" => Ok(Command::Stats {
            root: flags.root.ok_or_else(|| "--root is required".to_owned())?,
        }),
        "listen" => Ok(Command::Listen {
            root: flags.root.ok_or_else(|| "--root is required".to_owned())?,
            addr: flags.addr.unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_owned()),
            poll_interval: Duration::from_millis(flags.poll_ms.unwrap_or(DEFAULT_POLL_MS)),
        }),
        unknown => Err(format!("unknown command: {unknown}")),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let payload = serde_json::to_string_pretty(value).map_err(|err| {
        CliError::Index(CovmapError::internal(format!(
            "output serialization failed: {err}"
        )))
    })?;
    println!("{payload}");
    Ok(())
}

fn cmd_ingest(root: PathBuf, trace: &Path) -> Result<(), CliError> {
    let index = CoverageIndex::new(IndexConfig::new(root))?;
    let mut reader = TraceFileReader::open(trace)?;
    let mut ingested = 0_u64;
    let mut dropped = 0_u64;
    while let Some(record) = reader.next_record()? {
        if index.update_from_trace(&record) {
            ingested += 1;
        } else {
            dropped += 1;
            warn!(test = %record.test, "record dropped, index unavailable");
        }
    }
    index.dispose();
    print_json(&serde_json::json!({ "ingested": ingested, "dropped": dropped }))
}

fn cmd_query(root: PathBuf, target: &QueryTarget) -> Result<(), CliError> {
    let index = CoverageIndex::new(IndexConfig::new(root))?;
    let tests = match target {
        QueryTarget::Method {
            class,
            method,
            framework,
        } => index.covering_tests(class, method, *framework),
        QueryTarget::File { path } => index.covering_tests_by_file(path),
    };
    index.dispose();
    print_json(&tests)
}

fn cmd_files(
    root: PathBuf,
    class: &str,
    method: &str,
    framework: FrameworkId,
) -> Result<(), CliError> {
    let index = CoverageIndex::new(IndexConfig::new(root))?;
    let files = index.affected_files(class, method, framework);
    index.dispose();
    print_json(&files)
}

fn cmd_stats(root: PathBuf) -> Result<(), CliError> {
    let index = CoverageIndex::new(IndexConfig::new(root))?;
    let stats = index.stats();
    index.dispose();
    match stats {
        Some(stats) => print_json(&stats),
        None => Err(CliError::Index(CovmapError::internal(
            "coverage index unavailable",
        ))),
    }
}

fn cmd_listen(root: PathBuf, addr: &str, poll_interval: Duration) -> Result<(), CliError> {
    let index = CoverageIndex::new(IndexConfig::new(root))?;
    let listener = SocketTraceListener::bind(addr, poll_interval)?;
    info!(addr = %listener.local_addr()?, "listening for trace connections");
    listener.serve(|record| {
        if index.update_from_trace(&record) {
            info!(test = %record.test, "recorded trace");
        } else {
            warn!(test = %record.test, "record dropped, index unavailable");
        }
        Ok(())
    })?;
    index.dispose();
    Ok(())
}

fn run(args: &[String]) -> Result<(), CliError> {
    let command = parse_args(args).map_err(CliError::Usage)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match command {
        Command::Ingest { root, trace } => cmd_ingest(root, &trace),
        Command::Query { root, target } => cmd_query(root, &target),
        Command::Files {
            root,
            class,
            method,
            framework,
        } => cmd_files(root, &class, &method, framework),
        Command::Stats { root } => cmd_stats(root),
        Command::Listen {
            root,
            addr,
            poll_interval,
        } => cmd_listen(root, &addr, poll_interval),
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage(message)) if message.is_empty() => ExitCode::SUCCESS,
        Err(CliError::Usage(message)) => {
            eprintln!("error: {message}");
            eprintln!("run `covmap --help` for usage");
            ExitCode::from(1)
        }
        Err(CliError::Index(err)) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}
