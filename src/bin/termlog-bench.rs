//! Purpose: Developer-only throughput benchmark for the term appender.
//! Exports: None (binary entry point only).
//! Role: Runs producer threads against one anonymous log per scenario and reports rates.
//! Invariants: Each scenario fills one term until it trips, then validates the term layout.
//! Invariants: JSON goes to stdout, the table to stderr.
use std::io::{self, Write};
use std::thread;
use std::time::Instant;

use clap::Parser;
use serde::Serialize;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use termlog::core::appender::TermAppender;
use termlog::core::claim::BufferClaim;
use termlog::core::error::{Error, ErrorKind, to_exit_code};
use termlog::core::frame::DataHeader;
use termlog::core::header::HeaderWriter;
use termlog::core::log::LogBuffers;
use termlog::core::supplier::DefaultReservedValue;
use termlog::core::validate::scan_term;

const TERM_ID: i32 = 0;

#[derive(Parser)]
#[command(
    name = "termlog-bench",
    version,
    about = "Developer-only append throughput benchmark",
    long_about = None
)]
struct BenchCli {
    #[arg(long = "term-length", default_value = "16M", help = "Term length (bytes or K/M/G)")]
    term_length: String,
    #[arg(long = "payload-bytes", help = "Repeatable payload size in bytes (default: 32,256,1024)")]
    payload_bytes: Vec<usize>,
    #[arg(long, help = "Repeatable producer thread counts (default: 1,2,4)")]
    writers: Vec<usize>,
    #[arg(long, help = "Encode through buffer claims instead of copying")]
    claim: bool,
    #[arg(long, default_value = "both", help = "Output format: json|table|both")]
    format: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum BenchFormat {
    Json,
    Table,
    Both,
}

impl BenchFormat {
    fn parse(input: &str) -> Result<Self, Error> {
        match input.trim() {
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            "both" => Ok(Self::Both),
            _ => Err(Error::new(ErrorKind::Usage)
                .with_message("invalid --format (use json|table|both)")),
        }
    }
}

#[derive(Debug, Serialize)]
struct ScenarioResult {
    bench: &'static str,
    term_length: usize,
    payload_bytes: usize,
    writers: usize,
    messages: u64,
    elapsed_ms: f64,
    ns_per_msg: f64,
    mib_per_sec: f64,
    padding_bytes: usize,
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("termlog-bench: {err}");
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<(), Error> {
    let cli = BenchCli::parse();
    let term_length = parse_size(&cli.term_length)?;
    let format = BenchFormat::parse(&cli.format)?;
    let payload_sizes = or_default(cli.payload_bytes, &[32, 256, 1024]);
    let writer_counts = or_default(cli.writers, &[1, 2, 4]);

    let mut results = Vec::new();
    for payload_bytes in &payload_sizes {
        for writers in &writer_counts {
            let result = run_scenario(term_length, *payload_bytes, (*writers).max(1), cli.claim)?;
            tracing::info!(
                payload_bytes = result.payload_bytes,
                writers = result.writers,
                ns_per_msg = result.ns_per_msg,
                "scenario complete"
            );
            results.push(result);
        }
    }

    let output = json!({
        "name": "termlog",
        "version": env!("CARGO_PKG_VERSION"),
        "ts": rfc3339_now(),
        "system": system_json(),
        "params": {
            "term_length": term_length,
            "payload_sizes": payload_sizes,
            "writers": writer_counts,
            "claim": cli.claim,
            "debug_build": cfg!(debug_assertions),
        },
        "results": results,
    });
    emit_bench_output(&output, &results, format)
}

fn run_scenario(
    term_length: usize,
    payload_bytes: usize,
    writers: usize,
    use_claim: bool,
) -> Result<ScenarioResult, Error> {
    let log = LogBuffers::anonymous(term_length, TERM_ID)?;
    let appender = log.appender(0)?;
    let header = HeaderWriter::new(&DataHeader::template(1, 1, TERM_ID));
    let header = &header;

    let start = Instant::now();
    let counts = thread::scope(|scope| {
        let handles: Vec<_> = (0..writers)
            .map(|_| {
                let appender = appender.clone();
                scope.spawn(move || produce(&appender, header, payload_bytes, use_claim))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    Err(Error::new(ErrorKind::Internal).with_message("producer thread panicked"))
                })
            })
            .collect::<Result<Vec<u64>, Error>>()
    })?;
    let elapsed = start.elapsed();

    let summary = scan_term(log.term_buffer(0), appender.tail_offset(), TERM_ID)?;
    let messages: u64 = counts.iter().sum();
    let elapsed_ns = elapsed.as_nanos().max(1) as f64;
    let bytes = (messages as f64) * payload_bytes as f64;

    Ok(ScenarioResult {
        bench: if use_claim { "claim" } else { "append" },
        term_length,
        payload_bytes,
        writers,
        messages,
        elapsed_ms: elapsed_ns / 1e6,
        ns_per_msg: elapsed_ns / (messages.max(1) as f64),
        mib_per_sec: bytes / (1024.0 * 1024.0) / (elapsed_ns / 1e9),
        padding_bytes: summary.padding_bytes,
    })
}

fn produce(
    appender: &TermAppender,
    header: &HeaderWriter,
    payload_bytes: usize,
    use_claim: bool,
) -> Result<u64, Error> {
    let payload = vec![0x5Au8; payload_bytes];
    let mut claim = BufferClaim::new();
    let mut count = 0u64;
    loop {
        let result = if use_claim {
            let result = appender.claim(header, payload_bytes, &mut claim);
            if claim.is_active() {
                claim.put_bytes(0, &payload)?;
                claim.commit();
            }
            result
        } else {
            appender.append_message(header, &payload, &DefaultReservedValue)?
        };
        if !result.is_appended() {
            return Ok(count);
        }
        count += 1;
    }
}

fn emit_bench_output(value: &Value, results: &[ScenarioResult], format: BenchFormat) -> Result<(), Error> {
    if matches!(format, BenchFormat::Json | BenchFormat::Both) {
        let text = serde_json::to_string_pretty(value).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode bench output")
                .with_source(err)
        })?;
        println!("{text}");
    }
    if matches!(format, BenchFormat::Table | BenchFormat::Both) {
        emit_table(results)?;
    }
    Ok(())
}

fn emit_table(results: &[ScenarioResult]) -> Result<(), Error> {
    let mut stderr = io::stderr().lock();
    let io_err = |err: io::Error| {
        Error::new(ErrorKind::Io)
            .with_message("failed to write bench table")
            .with_source(err)
    };
    writeln!(
        stderr,
        "{:>7}  {:>8}  {:>7}  {:>10}  {:>9}  {:>9}",
        "bench", "payload", "writers", "msgs", "ns/msg", "MiB/s"
    )
    .map_err(io_err)?;
    for result in results {
        writeln!(
            stderr,
            "{:>7}  {:>8}  {:>7}  {:>10}  {:>9.1}  {:>9.1}",
            result.bench,
            result.payload_bytes,
            result.writers,
            result.messages,
            result.ns_per_msg,
            result.mib_per_sec
        )
        .map_err(io_err)?;
    }
    Ok(())
}

fn or_default(values: Vec<usize>, defaults: &[usize]) -> Vec<usize> {
    if values.is_empty() {
        defaults.to_vec()
    } else {
        values
    }
}

fn parse_size(input: &str) -> Result<usize, Error> {
    let trimmed = input.trim();
    let (value_str, multiplier) = match trimmed.chars().last() {
        Some('k') | Some('K') => (&trimmed[..trimmed.len() - 1], 1024usize),
        Some('m') | Some('M') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('g') | Some('G') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        _ => (trimmed, 1),
    };
    let base = value_str.trim().parse::<usize>().map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid size {input:?} (use bytes or a K/M/G suffix)"))
            .with_source(err)
    })?;
    base.checked_mul(multiplier)
        .ok_or_else(|| Error::new(ErrorKind::Usage).with_message("size overflow"))
}

fn system_json() -> Value {
    let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    json!({
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "cpus": cpus,
    })
}

fn rfc3339_now() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
