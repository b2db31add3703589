//! Centralized environment variable names and default values for job tuning.

// Environment variable names
pub const ENV_MAP_TASKS: &str = "MAPREDUCE_MAP_TASKS";
pub const ENV_REDUCE_TASKS: &str = "MAPREDUCE_REDUCE_TASKS";
pub const ENV_THREADS: &str = "MAPREDUCE_THREADS";
pub const ENV_SORT_MAX_LINES: &str = "MAPREDUCE_SORT_MAX_LINES";
pub const ENV_COMBINE_BUFFER: &str = "MAPREDUCE_COMBINE_BUFFER";
pub const ENV_SPILL_BUFFER_BYTES: &str = "MAPREDUCE_SPILL_BUFFER_BYTES";
pub const ENV_SCRATCH_DIR: &str = "MAPREDUCE_SCRATCH_DIR";
pub const ENV_KEEP_INTERMEDIATES: &str = "MAPREDUCE_KEEP_INTERMEDIATES";

// Defaults
/// Records held in memory per sorted run before it is flushed to disk.
pub const DEFAULT_SORT_MAX_LINES: usize = 10_000_000;
/// Pairs a map worker buffers per flush when a combiner is active.
pub const DEFAULT_COMBINE_BUFFER: usize = 65_536;
pub const SORT_WRITE_BUFFER_BYTES: usize = 1024 * 1024; // 1 MiB
/// Spill bytes a map worker holds across all partitions before appending the largest buffer to disk.
pub const DEFAULT_SPILL_BUFFER_BYTES: usize = 4 * 1024 * 1024; // 4 MiB per worker

// File naming inside a job's scratch directory
pub const SCRATCH_PREFIX: &str = "mapreduce-";
pub const RUN_PREFIX: &str = "run-";
pub const RUN_SUFFIX: &str = ".run";
pub const SPILL_SUFFIX: &str = ".spill";
pub const SORTED_SUFFIX: &str = ".sorted";
