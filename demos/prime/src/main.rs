use anyhow::Result;
use clap::Parser;
use mapreduce::{CpuParallel, DataSource, Job, MapTask, ReduceTask, SchedulePolicy, Sequential, Specification};

#[derive(Parser, Debug)]
struct Args {
    /// Largest number tested
    #[arg(long, default_value_t = 10_000)]
    limit: i64,
    /// Map workers (0 = one per pool thread)
    #[arg(long, default_value_t = 0)]
    map_tasks: usize,
    /// Reduce partitions; also the number of ranges the input is cut into
    #[arg(long, default_value_t = 10)]
    reduce_tasks: usize,
    /// Run every phase on the calling thread
    #[arg(long)]
    sequential: bool,
    /// Print job statistics as JSON to stderr
    #[arg(long)]
    stats: bool,
    /// Only print the summary line
    #[arg(long)]
    quiet: bool,
}

/// Hands out consecutive ranges `[first + k*step, first + (k+1)*step - 1]` up to `last`.
struct NumberSource {
    sequence: i64,
    first: i64,
    last: i64,
    step: i64,
}

impl DataSource for NumberSource {
    type Key = i64;
    type Value = (i64, i64);

    fn setup_key(&mut self) -> Option<i64> {
        let key = self.sequence;
        if self.first + key * self.step > self.last {
            return None;
        }
        self.sequence += 1;
        Some(key)
    }

    fn get_data(&mut self, key: &i64) -> Result<(i64, i64)> {
        let start = self.first + key * self.step;
        Ok((start, (start + self.step - 1).min(self.last)))
    }
}

fn is_prime(n: i64) -> bool {
    if n < 2 {
        return false;
    }
    let mut i = 2;
    while i * i <= n {
        if n % i == 0 {
            return false;
        }
        i += 1;
    }
    true
}

/// Emits every number of the range under its primality.
struct PrimeMap;

impl MapTask for PrimeMap {
    type Key = i64;
    type Value = (i64, i64);
    type IntermediateKey = bool;
    type IntermediateValue = i64;

    fn map<F>(&self, _key: &i64, range: &(i64, i64), emit: &mut F)
    where
        F: FnMut(bool, i64),
    {
        for n in range.0..=range.1 {
            emit(is_prime(n), n);
        }
    }
}

/// Passes the `true` group through; the `false` group is skipped.
struct PrimeReduce;

impl ReduceTask for PrimeReduce {
    type Key = bool;
    type Value = i64;
    type OutputKey = bool;
    type OutputValue = i64;

    fn reduce<I, F>(&self, key: &bool, values: I, emit: &mut F)
    where
        I: Iterator<Item = i64>,
        F: FnMut(bool, i64),
    {
        if *key {
            for n in values {
                emit(true, n);
            }
        }
    }
}

fn run<P: SchedulePolicy>(args: &Args, policy: &P) -> Result<()> {
    let partitions = args.reduce_tasks.max(1);
    let step = (args.limit / partitions as i64).max(1);
    let source = NumberSource { sequence: 0, first: 0, last: args.limit, step };
    let spec = Specification::from_env()
        .with_map_tasks(args.map_tasks)
        .with_reduce_tasks(partitions);

    let mut job = Job::new(source, PrimeMap, PrimeReduce, spec);
    let results = job.run(policy)?;

    println!(
        "MapReduce finished in {:.3}s with {} results",
        results.job_runtime().as_secs_f64(),
        results.len()
    );
    if !args.quiet {
        let mut primes: Vec<i64> = results.iter().map(|(_, n)| *n).collect();
        primes.sort_unstable();
        let line: Vec<String> = primes.iter().map(|n| n.to_string()).collect();
        println!("{}", line.join(" "));
    }
    if args.stats {
        eprintln!("{}", serde_json::to_string_pretty(results.stats())?);
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();
    if args.sequential {
        run(&args, &Sequential)
    } else {
        run(&args, &CpuParallel::new()?)
    }
}
