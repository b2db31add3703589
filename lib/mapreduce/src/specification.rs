use crate::constants::*;
use crate::utils::{env_parse, env_var_truthy, host_parallelism};
use anyhow::{ensure, Result};
use std::path::PathBuf;

/// Configuration of one job run.
#[derive(Clone, Debug)]
pub struct Specification {
    /// Map workers pulling from the data source. 0 picks the policy's concurrency.
    pub map_tasks: usize,
    /// Number of partitions, one reduce task each. Must be at least 1.
    pub reduce_tasks: usize,
    /// Records per sorted run during the shuffle sort.
    pub sort_max_lines: usize,
    /// Pairs a map worker buffers before running the combiner over them.
    pub combine_buffer: usize,
    /// Spill bytes one map worker buffers in memory across all partitions.
    pub spill_buffer_bytes: usize,
    /// Parent of the per-job scratch directory; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    /// Keep spill and sorted partition files after the run.
    pub keep_intermediates: bool,
}

impl Default for Specification {
    fn default() -> Self {
        Self {
            map_tasks: 0,
            reduce_tasks: host_parallelism(),
            sort_max_lines: DEFAULT_SORT_MAX_LINES,
            combine_buffer: DEFAULT_COMBINE_BUFFER,
            spill_buffer_bytes: DEFAULT_SPILL_BUFFER_BYTES,
            scratch_dir: None,
            keep_intermediates: false,
        }
    }
}

impl Specification {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `MAPREDUCE_*` environment variables.
    pub fn from_env() -> Self {
        let mut spec = Self::default();
        if let Some(n) = env_parse(ENV_MAP_TASKS) {
            spec.map_tasks = n;
        }
        if let Some(n) = env_parse(ENV_REDUCE_TASKS) {
            spec.reduce_tasks = n;
        }
        if let Some(n) = env_parse(ENV_SORT_MAX_LINES) {
            spec.sort_max_lines = n;
        }
        if let Some(n) = env_parse(ENV_COMBINE_BUFFER) {
            spec.combine_buffer = n;
        }
        if let Some(n) = env_parse(ENV_SPILL_BUFFER_BYTES) {
            spec.spill_buffer_bytes = n;
        }
        if let Ok(dir) = std::env::var(ENV_SCRATCH_DIR) {
            if !dir.is_empty() {
                spec.scratch_dir = Some(PathBuf::from(dir));
            }
        }
        spec.keep_intermediates = env_var_truthy(ENV_KEEP_INTERMEDIATES);
        spec
    }

    pub fn with_map_tasks(mut self, n: usize) -> Self {
        self.map_tasks = n;
        self
    }

    pub fn with_reduce_tasks(mut self, n: usize) -> Self {
        self.reduce_tasks = n;
        self
    }

    pub fn with_sort_max_lines(mut self, n: usize) -> Self {
        self.sort_max_lines = n;
        self
    }

    pub fn with_combine_buffer(mut self, n: usize) -> Self {
        self.combine_buffer = n;
        self
    }

    pub fn with_spill_buffer_bytes(mut self, n: usize) -> Self {
        self.spill_buffer_bytes = n;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn keep_intermediates(mut self, keep: bool) -> Self {
        self.keep_intermediates = keep;
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.reduce_tasks >= 1, "reduce_tasks must be at least 1");
        ensure!(self.sort_max_lines >= 1, "sort_max_lines must be at least 1");
        ensure!(self.combine_buffer >= 1, "combine_buffer must be at least 1");
        ensure!(self.spill_buffer_bytes >= 1, "spill_buffer_bytes must be at least 1");
        Ok(())
    }

    pub(crate) fn map_workers(&self, concurrency: usize) -> usize {
        let concurrency = concurrency.max(1);
        if self.map_tasks == 0 {
            concurrency
        } else {
            self.map_tasks.min(concurrency)
        }
    }

    pub(crate) fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_every_core_for_reduce() {
        let spec = Specification::default();
        assert_eq!(spec.reduce_tasks, host_parallelism());
        assert_eq!(spec.sort_max_lines, DEFAULT_SORT_MAX_LINES);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn zero_reduce_tasks_is_rejected() {
        let err = Specification::new().with_reduce_tasks(0).validate().unwrap_err();
        assert!(err.to_string().contains("reduce_tasks"));
        assert!(Specification::new().with_sort_max_lines(0).validate().is_err());
        assert!(Specification::new().with_spill_buffer_bytes(0).validate().is_err());
    }

    #[test]
    fn map_workers_are_capped_by_concurrency() {
        let auto = Specification::new();
        assert_eq!(auto.map_workers(4), 4);
        assert_eq!(auto.map_workers(0), 1);
        let fixed = Specification::new().with_map_tasks(8);
        assert_eq!(fixed.map_workers(1), 1);
        assert_eq!(fixed.map_workers(16), 8);
    }

    #[test]
    fn environment_overrides_defaults() {
        std::env::set_var(ENV_REDUCE_TASKS, "3");
        std::env::set_var(ENV_SORT_MAX_LINES, "500");
        std::env::set_var(ENV_KEEP_INTERMEDIATES, "on");
        let spec = Specification::from_env();
        std::env::remove_var(ENV_REDUCE_TASKS);
        std::env::remove_var(ENV_SORT_MAX_LINES);
        std::env::remove_var(ENV_KEEP_INTERMEDIATES);
        assert_eq!(spec.reduce_tasks, 3);
        assert_eq!(spec.sort_max_lines, 500);
        assert!(spec.keep_intermediates);
    }
}
