//! Scheduling policies: how the tasks of one phase are executed.
//!
//! A phase is a set of indexed tasks. `execute` returns only after every task of
//! the phase has finished, with results in task-index order, so the job sees the
//! same outputs whichever policy ran it.

use crate::constants::ENV_THREADS;
use crate::utils::{env_parse, host_parallelism};
use anyhow::{Context, Result};
use rayon::prelude::*;

pub trait SchedulePolicy: Sync {
    fn name(&self) -> &'static str;

    /// Tasks of one phase that may run at the same time.
    fn concurrency(&self) -> usize;

    fn execute<T, F>(&self, tasks: usize, task: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Send + Sync;
}

/// Every task in order on the calling thread; stops at the first failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sequential;

impl SchedulePolicy for Sequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn concurrency(&self) -> usize {
        1
    }

    fn execute<T, F>(&self, tasks: usize, task: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Send + Sync,
    {
        (0..tasks).map(task).collect()
    }
}

/// Tasks spread over a dedicated rayon pool, one thread per core unless configured.
pub struct CpuParallel {
    pool: rayon::ThreadPool,
}

impl CpuParallel {
    /// Sized from `MAPREDUCE_THREADS`, falling back to the host core count.
    pub fn new() -> Result<Self> {
        let threads = env_parse::<usize>(ENV_THREADS).filter(|n| *n > 0).unwrap_or_else(host_parallelism);
        Self::with_threads(threads)
    }

    pub fn with_threads(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("mapreduce-worker-{}", i))
            .build()
            .context("build worker pool")?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl SchedulePolicy for CpuParallel {
    fn name(&self) -> &'static str {
        "cpu_parallel"
    }

    fn concurrency(&self) -> usize {
        self.threads()
    }

    fn execute<T, F>(&self, tasks: usize, task: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Send + Sync,
    {
        self.pool.install(|| (0..tasks).into_par_iter().map(&task).collect())
    }
}
