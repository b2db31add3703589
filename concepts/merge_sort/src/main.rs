use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use mapreduce::{merge_sort, KeyValue, SortOutcome};
use std::time::Instant;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    /// One decimal integer per line
    Int,
    /// Escaped text per line
    Text,
    /// `key\tvalue` with a text key and an integer value
    Kv,
}

#[derive(Parser, Debug)]
struct Args {
    /// Input file, records delimited by '\r'
    #[arg(long)]
    input: String,
    /// Output file path
    #[arg(long)]
    output: String,
    /// Records held in memory per run
    #[arg(long, default_value_t = mapreduce::constants::DEFAULT_SORT_MAX_LINES)]
    max_lines: usize,
    #[arg(long, value_enum, default_value_t = Kind::Int)]
    kind: Kind,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let t0 = Instant::now();
    let outcome: SortOutcome = match args.kind {
        Kind::Int => merge_sort::<i64>(&args.input, &args.output, args.max_lines),
        Kind::Text => merge_sort::<String>(&args.input, &args.output, args.max_lines),
        Kind::Kv => merge_sort::<KeyValue<String, i64>>(&args.input, &args.output, args.max_lines),
    }
    .with_context(|| format!("sort {} into {}", args.input, args.output))?;

    eprintln!(
        "merge_sort: lines={} runs={} strategy={:?} split_ms={} merge_ms={} total_ms={}",
        outcome.lines_in,
        outcome.runs,
        outcome.strategy,
        outcome.split_ms,
        outcome.merge_ms,
        t0.elapsed().as_millis()
    );
    Ok(())
}
