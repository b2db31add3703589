use anyhow::{Context, Result};
use clap::Parser;
use mapreduce::io::list_files_recursive;
use mapreduce::{Combiner, CpuParallel, DataSource, Job, MapTask, ReduceTask, SchedulePolicy, Sequential, Specification};
use regex::Regex;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    /// Input directory
    #[arg(long)]
    input: String,
    /// Output TSV file
    #[arg(long)]
    output: String,
    /// Reduce partitions (defaults to MAPREDUCE_REDUCE_TASKS or the core count)
    #[arg(long)]
    reduce_tasks: Option<usize>,
    /// Skip the map-side combiner
    #[arg(long)]
    no_combine: bool,
    #[arg(long)]
    sequential: bool,
}

/// One work unit per file under the input directory.
struct FileSource {
    files: Vec<PathBuf>,
    next: usize,
}

impl DataSource for FileSource {
    type Key = PathBuf;
    type Value = String;

    fn setup_key(&mut self) -> Option<PathBuf> {
        let file = self.files.get(self.next)?.clone();
        self.next += 1;
        Some(file)
    }

    fn get_data(&mut self, key: &PathBuf) -> Result<String> {
        fs::read_to_string(key).with_context(|| format!("read {}", key.display()))
    }
}

struct WordcountMap {
    word_re: Regex,
}

impl MapTask for WordcountMap {
    type Key = PathBuf;
    type Value = String;
    type IntermediateKey = String;
    type IntermediateValue = u64;

    fn map<F>(&self, _path: &PathBuf, text: &String, emit: &mut F)
    where
        F: FnMut(String, u64),
    {
        for cap in self.word_re.find_iter(text) {
            emit(cap.as_str().to_lowercase(), 1);
        }
    }
}

struct SumCombiner;

impl Combiner<String, u64> for SumCombiner {
    fn combine<F>(&self, _key: &String, values: Vec<u64>, emit: &mut F)
    where
        F: FnMut(u64),
    {
        emit(values.into_iter().sum());
    }
}

struct WordcountReduce;

impl ReduceTask for WordcountReduce {
    type Key = String;
    type Value = u64;
    type OutputKey = String;
    type OutputValue = u64;

    fn reduce<I, F>(&self, key: &String, values: I, emit: &mut F)
    where
        I: Iterator<Item = u64>,
        F: FnMut(String, u64),
    {
        emit(key.clone(), values.sum());
    }
}

fn run<P: SchedulePolicy>(args: &Args, policy: &P) -> Result<()> {
    let files = list_files_recursive(&args.input)?;
    info!(files = files.len(), input = %args.input, "wordcount input");

    let mut spec = Specification::from_env();
    if let Some(n) = args.reduce_tasks {
        spec = spec.with_reduce_tasks(n);
    }
    let source = FileSource { files, next: 0 };
    let map = WordcountMap { word_re: Regex::new(r"[A-Za-z0-9_']+")? };

    let mut counts: Vec<(String, u64)> = if args.no_combine {
        let mut job = Job::new(source, map, WordcountReduce, spec);
        job.run(policy)?.iter().cloned().collect()
    } else {
        let mut job = Job::new(source, map, WordcountReduce, spec).with_combiner(SumCombiner);
        job.run(policy)?.iter().cloned().collect()
    };
    counts.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let out = fs::File::create(&args.output).with_context(|| format!("create {}", args.output))?;
    let mut w = std::io::BufWriter::new(out);
    for (word, n) in &counts {
        writeln!(w, "\"{}\"\t{}", word, n)?;
    }
    w.flush()?;
    info!(words = counts.len(), output = %args.output, "wordcount written");
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
