//! Single-machine MapReduce with a disk-backed shuffle.
//!
//! Map output is spilled per partition, externally merge-sorted by (key, value)
//! and handed to the reduce task one key group at a time. Jobs run under a
//! [`SchedulePolicy`]: [`Sequential`] on the calling thread or [`CpuParallel`]
//! on a rayon pool, with identical results.

pub mod api;
pub mod constants;
pub mod io;
pub mod record;
pub mod runtime;
pub mod schedule;
mod shuffle;
pub mod sort;
pub mod specification;
pub mod stats;
pub mod temp;
pub mod utils;

pub use api::{Combiner, DataSource, MapTask, NullCombiner, ReduceTask};
pub use record::{KeyValue, Record, RecordError};
pub use runtime::{Job, Results};
pub use schedule::{CpuParallel, SchedulePolicy, Sequential};
pub use sort::{merge_sort, MergeSorter, SortError, SortOutcome, SortStrategy};
pub use specification::Specification;
pub use stats::JobStats;
pub use temp::TempFileManager;
