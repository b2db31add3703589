use crate::api::{Combiner, DataSource, MapTask, NullCombiner, ReduceTask};
use crate::constants::SCRATCH_PREFIX;
use crate::record::KeyValue;
use crate::schedule::SchedulePolicy;
use crate::shuffle::{partition_spill_paths, sorted_partition_path, KeyGroups, SpillWriter};
use crate::sort::MergeSorter;
use crate::specification::Specification;
use crate::stats::{JobStats, MapTaskStats, ReduceTaskStats, SortTaskStats};
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Reduce output of a finished job, in partition order and key order within a partition.
#[derive(Debug)]
pub struct Results<K, V> {
    records: Vec<(K, V)>,
    job_runtime: Duration,
    stats: JobStats,
    intermediates: Option<PathBuf>,
}

impl<K, V> Results<K, V> {
    pub fn iter(&self) -> std::slice::Iter<'_, (K, V)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn job_runtime(&self) -> Duration {
        self.job_runtime
    }

    pub fn stats(&self) -> &JobStats {
        &self.stats
    }

    /// Scratch directory left on disk when the job kept its intermediates.
    pub fn intermediates(&self) -> Option<&Path> {
        self.intermediates.as_deref()
    }

    pub fn into_records(self) -> Vec<(K, V)> {
        self.records
    }
}

impl<'a, K, V> IntoIterator for &'a Results<K, V> {
    type Item = &'a (K, V);
    type IntoIter = std::slice::Iter<'a, (K, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

type JobResults<R> = Results<<R as ReduceTask>::OutputKey, <R as ReduceTask>::OutputValue>;

/// A data source, map task, combiner and reduce task bound to one specification.
pub struct Job<D, M, R, C = NullCombiner>
where
    R: ReduceTask,
{
    datasource: Mutex<D>,
    map_task: M,
    reduce_task: R,
    combiner: C,
    spec: Specification,
    results: Option<JobResults<R>>,
}

impl<D, M, R> Job<D, M, R, NullCombiner>
where
    R: ReduceTask,
{
    pub fn new(datasource: D, map_task: M, reduce_task: R, spec: Specification) -> Self {
        Self { datasource: Mutex::new(datasource), map_task, reduce_task, combiner: NullCombiner, spec, results: None }
    }
}

impl<D, M, R, C> Job<D, M, R, C>
where
    D: DataSource,
    M: MapTask<Key = D::Key, Value = D::Value>,
    R: ReduceTask<Key = M::IntermediateKey, Value = M::IntermediateValue>,
    C: Combiner<M::IntermediateKey, M::IntermediateValue>,
{
    pub fn with_combiner<C2>(self, combiner: C2) -> Job<D, M, R, C2>
    where
        C2: Combiner<M::IntermediateKey, M::IntermediateValue>,
    {
        Job {
            datasource: self.datasource,
            map_task: self.map_task,
            reduce_task: self.reduce_task,
            combiner,
            spec: self.spec,
            results: self.results,
        }
    }

    pub fn specification(&self) -> &Specification {
        &self.spec
    }

    /// Results of the last successful run; `None` before any run has completed.
    pub fn results(&self) -> Option<&JobResults<R>> {
        self.results.as_ref()
    }

    /// Runs map, sort and reduce under `policy`, each phase finishing before the next starts.
    pub fn run<P: SchedulePolicy>(&mut self, policy: &P) -> Result<&JobResults<R>> {
        self.spec.validate()?;
        self.results = None;
        let job_start = Instant::now();

        let scratch_root = self.spec.scratch_root();
        crate::io::ensure_dir(&scratch_root)?;
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&scratch_root)
            .with_context(|| format!("create scratch directory in {}", scratch_root.display()))?;

        let partitions = self.spec.reduce_tasks;
        let workers = self.spec.map_workers(policy.concurrency());
        info!(
            policy = policy.name(),
            map_workers = workers,
            reduce_tasks = partitions,
            scratch = %scratch.path().display(),
            "MapReduce job starting"
        );

        let phases = Phases {
            datasource: &self.datasource,
            map_task: &self.map_task,
            reduce_task: &self.reduce_task,
            combiner: &self.combiner,
            spec: &self.spec,
            scratch: scratch.path(),
        };
        let mut stats = JobStats::new(policy.name());

        // Map phase
        let map_start = Instant::now();
        let map_stats = policy.execute(workers, |w| phases.map_worker(w))?;
        stats.record_map(&map_stats, map_start.elapsed().as_millis() as u64);
        info!(phase = "map",
              workers = stats.map.workers, units = stats.map.units,
              total_emits = stats.map.total_emits, total_spilled = stats.map.total_spilled,
              min_task_ms = stats.map.min_task_ms, max_task_ms = stats.map.max_task_ms,
              wall_ms = stats.map.wall_ms,
              "Map phase complete");

        // Sort/shuffle
        let sort_start = Instant::now();
        let sort_stats = policy.execute(partitions, |p| phases.sort_partition(p))?;
        stats.record_sort(&sort_stats, sort_start.elapsed().as_millis() as u64);
        info!(phase = "sort",
              partitions = stats.sort.partitions, input_files = stats.sort.input_files,
              total_lines = stats.sort.total_lines, total_runs = stats.sort.total_runs,
              min_partition_ms = stats.sort.min_partition_ms, max_partition_ms = stats.sort.max_partition_ms,
              wall_ms = stats.sort.wall_ms,
              "Sort phase complete");

        // Reduce phase
        let reduce_start = Instant::now();
        let reduced = policy.execute(partitions, |p| phases.reduce_partition(p))?;
        let mut records = Vec::new();
        let mut reduce_stats = Vec::with_capacity(reduced.len());
        for (mut part_records, part_stats) in reduced {
            records.append(&mut part_records);
            reduce_stats.push(part_stats);
        }
        stats.record_reduce(&reduce_stats, reduce_start.elapsed().as_millis() as u64);
        info!(phase = "reduce",
              partitions = stats.reduce.partitions, total_lines = stats.reduce.total_lines,
              total_groups = stats.reduce.total_groups, total_emitted = stats.reduce.total_emitted,
              min_partition_ms = stats.reduce.min_partition_ms, max_partition_ms = stats.reduce.max_partition_ms,
              wall_ms = stats.reduce.wall_ms,
              "Reduce phase complete");

        let intermediates = if self.spec.keep_intermediates {
            let kept = scratch.keep();
            info!(path = %kept.display(), "keeping intermediate files");
            Some(kept)
        } else {
            scratch.close().context("remove scratch directory")?;
            None
        };

        let job_runtime = job_start.elapsed();
        info!(results = records.len(), runtime_ms = job_runtime.as_millis() as u64, "MapReduce job finished");
        Ok(self.results.insert(Results { records, job_runtime, stats, intermediates }))
    }
}

/// Borrowed view of a job shared by the tasks of every phase.
struct Phases<'a, D, M, R, C> {
    datasource: &'a Mutex<D>,
    map_task: &'a M,
    reduce_task: &'a R,
    combiner: &'a C,
    spec: &'a Specification,
    scratch: &'a Path,
}

impl<'a, D, M, R, C> Phases<'a, D, M, R, C>
where
    D: DataSource,
    M: MapTask<Key = D::Key, Value = D::Value>,
    R: ReduceTask<Key = M::IntermediateKey, Value = M::IntermediateValue>,
    C: Combiner<M::IntermediateKey, M::IntermediateValue>,
{
    /// Pulls work units until the data source is exhausted, spilling everything emitted.
    fn map_worker(&self, worker: usize) -> Result<MapTaskStats> {
        let start = Instant::now();
        debug!(worker, "map worker starting");
        let mut spill = SpillWriter::<M::IntermediateKey, M::IntermediateValue, C>::create(
            self.scratch,
            worker,
            self.spec.reduce_tasks,
            self.combiner,
            self.spec.combine_buffer,
            self.spec.spill_buffer_bytes,
        )?;

        let mut units = 0u64;
        loop {
            let (key, value) = {
                let mut source = self.datasource.lock().map_err(|_| anyhow!("data source lock poisoned"))?;
                match source.setup_key() {
                    Some(key) => {
                        let value = source
                            .get_data(&key)
                            .with_context(|| format!("map worker {}: fetch work unit", worker))?;
                        (key, value)
                    }
                    None => break,
                }
            };
            self.map_task.map(&key, &value, &mut |k, v| spill.emit(k, v));
            spill.take_error().with_context(|| format!("map worker {}", worker))?;
            units += 1;
        }

        let summary = spill.finish().with_context(|| format!("map worker {}", worker))?;
        let task = MapTaskStats {
            worker,
            units,
            emits: summary.emits,
            spilled: summary.spilled,
            wall_ms: start.elapsed().as_millis() as u64,
        };
        debug!(worker = task.worker, units, emits = task.emits, spilled = task.spilled,
               flushes = summary.flushes, wall_ms = task.wall_ms, "map worker finished");
        Ok(task)
    }

    fn sort_partition(&self, partition: usize) -> Result<SortTaskStats> {
        let start = Instant::now();
        let inputs = partition_spill_paths(self.scratch, partition)?;
        let output = sorted_partition_path(self.scratch, partition);
        let outcome = MergeSorter::new(self.scratch)
            .max_lines(self.spec.sort_max_lines)
            .sort_files::<KeyValue<M::IntermediateKey, M::IntermediateValue>, _>(&inputs, &output)
            .with_context(|| format!("sort partition {}", partition))?;
        let task = SortTaskStats {
            partition,
            input_files: inputs.len(),
            lines_in: outcome.lines_in,
            runs: outcome.runs,
            wall_ms: start.elapsed().as_millis() as u64,
        };
        debug!(partition = task.partition, input_files = task.input_files, lines_in = task.lines_in,
               runs = task.runs, strategy = ?outcome.strategy, wall_ms = task.wall_ms, "partition sorted");
        Ok(task)
    }

    fn reduce_partition(&self, partition: usize) -> Result<(Vec<(R::OutputKey, R::OutputValue)>, ReduceTaskStats)> {
        let start = Instant::now();
        let path = sorted_partition_path(self.scratch, partition);
        let mut groups = KeyGroups::<R::Key, R::Value>::open(&path)?;
        let mut out = Vec::new();
        let mut num_groups = 0u64;
        while let Some((key, first)) = groups.next_key().with_context(|| format!("reduce partition {}", partition))? {
            self.reduce_task.reduce(&key, groups.values(&key, first), &mut |k, v| out.push((k, v)));
            num_groups += 1;
        }
        let task = ReduceTaskStats {
            partition,
            lines_in: groups.lines_in(),
            groups: num_groups,
            emitted: out.len() as u64,
            wall_ms: start.elapsed().as_millis() as u64,
        };
        debug!(partition = task.partition, lines_in = task.lines_in, groups = task.groups,
               emitted = task.emitted, wall_ms = task.wall_ms, "partition reduced");
        Ok((out, task))
    }
}
