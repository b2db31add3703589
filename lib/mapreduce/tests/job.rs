use anyhow::{bail, Result};
use mapreduce::{
    Combiner, CpuParallel, DataSource, Job, MapTask, ReduceTask, SchedulePolicy, Sequential, Specification,
};
use std::fs;
use std::path::Path;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------- number range source and prime tasks ----------

struct NumberSource {
    sequence: i64,
    first: i64,
    last: i64,
    step: i64,
}

impl NumberSource {
    fn new(first: i64, last: i64, step: i64) -> Self {
        Self { sequence: 0, first, last, step }
    }
}

impl DataSource for NumberSource {
    type Key = i64;
    type Value = (i64, i64);

    fn setup_key(&mut self) -> Option<i64> {
        let key = self.sequence;
        self.sequence += 1;
        (key * self.step <= self.last).then_some(key)
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

struct PrimeMap;

impl MapTask for PrimeMap {
    type Key = i64;
    type Value = (i64, i64);
    type IntermediateKey = bool;
    type IntermediateValue = i64;

    fn map<F>(&self, _key: &i64, value: &(i64, i64), emit: &mut F)
    where
        F: FnMut(bool, i64),
    {
        for n in value.0..=value.1 {
            emit(is_prime(n), n);
        }
    }
}

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
            for v in values {
                emit(true, v);
            }
        }
    }
}

// ---------- line source and word count tasks ----------

struct LineSource {
    lines: Vec<String>,
    next: usize,
    fail_at: Option<usize>,
}

impl LineSource {
    fn new(lines: Vec<String>) -> Self {
        Self { lines, next: 0, fail_at: None }
    }
}

impl DataSource for LineSource {
    type Key = usize;
    type Value = String;

    fn setup_key(&mut self) -> Option<usize> {
        let key = self.next;
        self.next += 1;
        (key < self.lines.len()).then_some(key)
    }

    fn get_data(&mut self, key: &usize) -> Result<String> {
        if self.fail_at == Some(*key) {
            bail!("line {} is unavailable", key);
        }
        Ok(self.lines[*key].clone())
    }
}

struct WordMap;

impl MapTask for WordMap {
    type Key = usize;
    type Value = String;
    type IntermediateKey = String;
    type IntermediateValue = u64;

    fn map<F>(&self, _key: &usize, line: &String, emit: &mut F)
    where
        F: FnMut(String, u64),
    {
        for word in line.split_whitespace() {
            emit(word.to_lowercase(), 1);
        }
    }
}

struct WordSum;

impl ReduceTask for WordSum {
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

struct SumCombiner;

impl Combiner<String, u64> for SumCombiner {
    fn combine<F>(&self, _key: &String, values: Vec<u64>, emit: &mut F)
    where
        F: FnMut(u64),
    {
        emit(values.into_iter().sum());
    }
}

fn corpus() -> Vec<String> {
    let words = ["alpha", "beta", "gamma", "delta", "Alpha", "back\\slash", "epsilon", "zeta"];
    (0..200)
        .map(|i| (0..(i % 7) + 3).map(|j| words[(i * 3 + j * 5) % words.len()]).collect::<Vec<_>>().join(" "))
        .collect()
}

fn word_spec(scratch: &Path) -> Specification {
    Specification::new().with_reduce_tasks(4).with_sort_max_lines(16).with_scratch_dir(scratch)
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).unwrap().next().is_none()
}

// ---------- tests ----------

#[test]
fn prime_range_yields_ten_units_and_one_partition() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let spec = Specification::new().with_reduce_tasks(1).with_scratch_dir(scratch.path());
    let mut job = Job::new(NumberSource::new(0, 999, 100), PrimeMap, PrimeReduce, spec);

    let results = job.run(&Sequential).unwrap();
    let stats = results.stats();
    assert_eq!(stats.policy, "sequential");
    assert_eq!(stats.map.units, 10);
    assert_eq!(stats.sort.partitions, 1);
    assert_eq!(stats.sort.total_lines, 1000);
    assert_eq!(stats.reduce.total_groups, 2);

    let primes: Vec<i64> = results.iter().map(|(_, n)| *n).collect();
    assert_eq!(primes.len(), 168);
    assert_eq!(&primes[..5], &[2, 3, 5, 7, 11]);
    assert_eq!(*primes.last().unwrap(), 997);
    assert!(primes.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn sequential_and_parallel_produce_identical_results() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();

    let mut sequential = Job::new(LineSource::new(corpus()), WordMap, WordSum, word_spec(scratch.path()));
    let expected = sequential.run(&Sequential).unwrap().iter().cloned().collect::<Vec<_>>();
    assert!(sequential.results().unwrap().stats().sort.total_runs > 4);

    let policy = CpuParallel::with_threads(4).unwrap();
    let mut parallel = Job::new(LineSource::new(corpus()), WordMap, WordSum, word_spec(scratch.path()));
    let actual = parallel.run(&policy).unwrap();
    assert_eq!(actual.stats().policy, "cpu_parallel");
    assert_eq!(actual.stats().map.units, 200);
    assert_eq!(actual.iter().cloned().collect::<Vec<_>>(), expected);

    let total: u64 = expected.iter().map(|(_, n)| n).sum();
    let words: u64 = corpus().iter().map(|l| l.split_whitespace().count() as u64).sum();
    assert_eq!(total, words);
    assert!(expected.iter().any(|(w, _)| w == "back\\slash"));
    assert_eq!(expected.iter().filter(|(w, _)| w == "alpha").count(), 1);
}

#[test]
fn combiner_shrinks_spill_without_changing_results() {
    let scratch = tempfile::tempdir().unwrap();
    let policy = CpuParallel::with_threads(3).unwrap();

    let mut plain = Job::new(LineSource::new(corpus()), WordMap, WordSum, word_spec(scratch.path()));
    let plain_results = plain.run(&policy).unwrap();
    let plain_records: Vec<(String, u64)> = plain_results.iter().cloned().collect();
    let plain_spilled = plain_results.stats().map.total_spilled;

    let mut combined = Job::new(LineSource::new(corpus()), WordMap, WordSum, word_spec(scratch.path()))
        .with_combiner(SumCombiner);
    let combined_results = combined.run(&policy).unwrap();

    assert_eq!(combined_results.iter().cloned().collect::<Vec<_>>(), plain_records);
    assert_eq!(combined_results.stats().map.total_emits, plain_spilled);
    assert!(combined_results.stats().map.total_spilled < plain_spilled);
}

#[test]
fn reduce_sees_values_in_ascending_order() {
    struct Scatter;

    impl MapTask for Scatter {
        type Key = i64;
        type Value = (i64, i64);
        type IntermediateKey = u32;
        type IntermediateValue = i64;

        fn map<F: FnMut(u32, i64)>(&self, _key: &i64, value: &(i64, i64), emit: &mut F) {
            for n in (value.0..=value.1).rev() {
                emit((n % 3) as u32, n);
            }
        }
    }

    struct CheckOrder;

    impl ReduceTask for CheckOrder {
        type Key = u32;
        type Value = i64;
        type OutputKey = u32;
        type OutputValue = usize;

        fn reduce<I: Iterator<Item = i64>, F: FnMut(u32, usize)>(&self, key: &u32, values: I, emit: &mut F) {
            let values: Vec<i64> = values.collect();
            assert!(values.windows(2).all(|w| w[0] <= w[1]), "values out of order for key {}", key);
            emit(*key, values.len());
        }
    }

    let scratch = tempfile::tempdir().unwrap();
    let spec = Specification::new().with_reduce_tasks(2).with_sort_max_lines(5).with_scratch_dir(scratch.path());
    let mut job = Job::new(NumberSource::new(0, 89, 10), Scatter, CheckOrder, spec);
    let results = job.run(&Sequential).unwrap();
    let mut counts: Vec<(u32, usize)> = results.iter().cloned().collect();
    counts.sort();
    assert_eq!(counts, vec![(0, 30), (1, 30), (2, 30)]);
}

#[test]
fn scratch_directory_is_removed_after_run() {
    let scratch = tempfile::tempdir().unwrap();
    let mut job = Job::new(LineSource::new(corpus()), WordMap, WordSum, word_spec(scratch.path()));
    let results = job.run(&Sequential).unwrap();
    assert!(results.intermediates().is_none());
    assert!(results.job_runtime() > std::time::Duration::ZERO);
    assert!(is_empty_dir(scratch.path()));
}

#[test]
fn intermediates_are_kept_on_request() {
    let scratch = tempfile::tempdir().unwrap();
    let spec = word_spec(scratch.path()).with_reduce_tasks(2).keep_intermediates(true);
    let mut job = Job::new(LineSource::new(corpus()), WordMap, WordSum, spec);
    let results = job.run(&Sequential).unwrap();

    let kept = results.intermediates().expect("scratch directory kept").to_path_buf();
    assert!(kept.starts_with(scratch.path()));
    assert!(kept.join("reduce_in_part0.sorted").exists());
    assert!(kept.join("reduce_in_part1.sorted").exists());
    assert!(kept.join("map0_part1.spill").exists());
    let leftover_runs = fs::read_dir(&kept)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".run"))
        .count();
    assert_eq!(leftover_runs, 0);

    drop(job);
    assert!(kept.join("reduce_in_part0.sorted").exists());
}

#[test]
fn fetch_failure_aborts_the_job_and_cleans_up() {
    let scratch = tempfile::tempdir().unwrap();
    let mut source = LineSource::new(corpus());
    source.fail_at = Some(17);
    let mut job = Job::new(source, WordMap, WordSum, word_spec(scratch.path()));

    let policy = CpuParallel::with_threads(2).unwrap();
    let err = job.run(&policy).unwrap_err();
    assert!(format!("{:#}", err).contains("line 17 is unavailable"));
    assert!(job.results().is_none());
    assert!(is_empty_dir(scratch.path()));
}

#[test]
fn zero_reduce_tasks_is_rejected_before_any_work() {
    let scratch = tempfile::tempdir().unwrap();
    let spec = word_spec(scratch.path()).with_reduce_tasks(0);
    let mut job = Job::new(LineSource::new(corpus()), WordMap, WordSum, spec);
    assert!(job.run(&Sequential).is_err());
    assert!(is_empty_dir(scratch.path()));
}

#[test]
fn results_are_absent_until_a_run_completes() {
    let job = Job::new(LineSource::new(Vec::new()), WordMap, WordSum, Specification::new());
    assert!(job.results().is_none());
    assert_eq!(job.specification().map_tasks, 0);
}

#[test]
fn empty_source_produces_empty_results() {
    let scratch = tempfile::tempdir().unwrap();
    let mut job = Job::new(LineSource::new(Vec::new()), WordMap, WordSum, word_spec(scratch.path()));
    let policy = CpuParallel::with_threads(2).unwrap();
    let results = job.run(&policy).unwrap();
    assert!(results.is_empty());
    assert_eq!(results.stats().map.units, 0);
    assert_eq!(results.stats().sort.total_runs, 0);
    assert_eq!(policy.name(), "cpu_parallel");
}

#[test]
fn many_partitions_and_workers_keep_few_files_open() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn open_fds() -> usize {
        fs::read_dir("/proc/self/fd").map(|d| d.count()).unwrap_or(0)
    }

    struct SlowWordMap {
        peak_fds: Arc<AtomicUsize>,
    }

    impl MapTask for SlowWordMap {
        type Key = usize;
        type Value = String;
        type IntermediateKey = String;
        type IntermediateValue = u64;

        fn map<F: FnMut(String, u64)>(&self, _key: &usize, line: &String, emit: &mut F) {
            for word in line.split_whitespace() {
                emit(word.to_string(), 1);
            }
            std::thread::sleep(Duration::from_millis(2));
            self.peak_fds.fetch_max(open_fds(), Ordering::Relaxed);
        }
    }

    let lines: Vec<String> =
        (0..400).map(|i| format!("k{} k{} k{}", i % 257, (i * 7) % 311, i % 13)).collect();
    let workers = 16;
    let partitions = 128;
    let scratch = tempfile::tempdir().unwrap();
    let spec = Specification::new()
        .with_map_tasks(workers)
        .with_reduce_tasks(partitions)
        .with_sort_max_lines(64)
        .with_spill_buffer_bytes(256)
        .with_scratch_dir(scratch.path());

    let peak_fds = Arc::new(AtomicUsize::new(0));
    let policy = CpuParallel::with_threads(workers).unwrap();
    let map = SlowWordMap { peak_fds: Arc::clone(&peak_fds) };
    let mut parallel = Job::new(LineSource::new(lines.clone()), map, WordSum, spec.clone());
    let results = parallel.run(&policy).unwrap();
    assert_eq!(results.stats().map.workers, workers);
    assert_eq!(results.stats().map.total_spilled, 1200);
    let actual: Vec<(String, u64)> = results.iter().cloned().collect();

    // every worker holding every partition open would need workers * partitions descriptors
    if cfg!(target_os = "linux") {
        assert!(peak_fds.load(Ordering::Relaxed) < workers * partitions / 2);
    }

    let map = SlowWordMap { peak_fds: Arc::new(AtomicUsize::new(0)) };
    let mut sequential = Job::new(LineSource::new(lines), map, WordSum, spec);
    let expected: Vec<(String, u64)> = sequential.run(&Sequential).unwrap().iter().cloned().collect();
    assert_eq!(actual, expected);
    assert_eq!(expected.iter().map(|(_, n)| n).sum::<u64>(), 1200);
    assert!(is_empty_dir(scratch.path()));
}

#[test]
fn skewed_key_group_streams_through_reduce() {
    struct Skewed;

    impl MapTask for Skewed {
        type Key = i64;
        type Value = (i64, i64);
        type IntermediateKey = String;
        type IntermediateValue = i64;

        fn map<F: FnMut(String, i64)>(&self, _key: &i64, value: &(i64, i64), emit: &mut F) {
            for n in value.0..=value.1 {
                if n % 10 == 0 {
                    emit(format!("cold{}", n), n);
                } else {
                    emit("hot".to_string(), n);
                }
            }
        }
    }

    /// Reads only the first three values of each group.
    struct Head;

    impl ReduceTask for Head {
        type Key = String;
        type Value = i64;
        type OutputKey = String;
        type OutputValue = Vec<i64>;

        fn reduce<I: Iterator<Item = i64>, F: FnMut(String, Vec<i64>)>(&self, key: &String, values: I, emit: &mut F) {
            emit(key.clone(), values.take(3).collect());
        }
    }

    let scratch = tempfile::tempdir().unwrap();
    let spec = Specification::new().with_reduce_tasks(3).with_sort_max_lines(50).with_scratch_dir(scratch.path());
    let mut job = Job::new(NumberSource::new(0, 999, 100), Skewed, Head, spec);
    let policy = CpuParallel::with_threads(3).unwrap();
    let results = job.run(&policy).unwrap();

    let stats = results.stats();
    assert!(stats.sort.total_runs >= 20);
    assert_eq!(stats.reduce.total_lines, 1000);
    assert_eq!(stats.reduce.total_groups, 101);

    let mut groups: Vec<(String, Vec<i64>)> = results.iter().cloned().collect();
    groups.sort();
    assert_eq!(groups.len(), 101);
    let hot = groups.iter().find(|(k, _)| k == "hot").unwrap();
    assert_eq!(hot.1, vec![1, 2, 3]);
    for (key, values) in groups.iter().filter(|(k, _)| k != "hot") {
        let n: i64 = key.trim_start_matches("cold").parse().unwrap();
        assert_eq!(values, &vec![n]);
    }
}
