use serde::Serialize;

#[derive(Clone, Debug)]
pub(crate) struct MapTaskStats {
    pub worker: usize,
    pub units: u64,
    pub emits: u64,
    pub spilled: u64,
    pub wall_ms: u64,
}

#[derive(Clone, Debug)]
pub(crate) struct SortTaskStats {
    pub partition: usize,
    pub input_files: usize,
    pub lines_in: u64,
    pub runs: usize,
    pub wall_ms: u64,
}

#[derive(Clone, Debug)]
pub(crate) struct ReduceTaskStats {
    pub partition: usize,
    pub lines_in: u64,
    pub groups: u64,
    pub emitted: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct MapStats {
    pub workers: usize,
    pub units: u64,
    pub total_emits: u64,
    pub total_spilled: u64,
    pub min_task_ms: u64,
    pub max_task_ms: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct SortStatsAgg {
    pub partitions: usize,
    pub input_files: usize,
    pub total_lines: u64,
    pub total_runs: usize,
    pub min_partition_ms: u64,
    pub max_partition_ms: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct ReduceStatsAgg {
    pub partitions: usize,
    pub total_lines: u64,
    pub total_groups: u64,
    pub total_emitted: u64,
    pub min_partition_ms: u64,
    pub max_partition_ms: u64,
    pub wall_ms: u64,
}

/// Per-phase aggregates of one job run.
#[derive(Default, Clone, Debug, Serialize)]
pub struct JobStats {
    pub policy: String,
    pub map: MapStats,
    pub sort: SortStatsAgg,
    pub reduce: ReduceStatsAgg,
}

impl JobStats {
    pub(crate) fn new(policy: &str) -> Self {
        Self { policy: policy.to_string(), ..Self::default() }
    }

    pub(crate) fn record_map(&mut self, per_task: &[MapTaskStats], wall_ms: u64) {
        self.map = MapStats {
            workers: per_task.len(),
            units: per_task.iter().map(|t| t.units).sum(),
            total_emits: per_task.iter().map(|t| t.emits).sum(),
            total_spilled: per_task.iter().map(|t| t.spilled).sum(),
            min_task_ms: per_task.iter().map(|t| t.wall_ms).min().unwrap_or(0),
            max_task_ms: per_task.iter().map(|t| t.wall_ms).max().unwrap_or(0),
            wall_ms,
        };
    }

    pub(crate) fn record_sort(&mut self, per_partition: &[SortTaskStats], wall_ms: u64) {
        self.sort = SortStatsAgg {
            partitions: per_partition.len(),
            input_files: per_partition.iter().map(|t| t.input_files).sum(),
            total_lines: per_partition.iter().map(|t| t.lines_in).sum(),
            total_runs: per_partition.iter().map(|t| t.runs).sum(),
            min_partition_ms: per_partition.iter().map(|t| t.wall_ms).min().unwrap_or(0),
            max_partition_ms: per_partition.iter().map(|t| t.wall_ms).max().unwrap_or(0),
            wall_ms,
        };
    }

    pub(crate) fn record_reduce(&mut self, per_partition: &[ReduceTaskStats], wall_ms: u64) {
        self.reduce = ReduceStatsAgg {
            partitions: per_partition.len(),
            total_lines: per_partition.iter().map(|t| t.lines_in).sum(),
            total_groups: per_partition.iter().map(|t| t.groups).sum(),
            total_emitted: per_partition.iter().map(|t| t.emitted).sum(),
            min_partition_ms: per_partition.iter().map(|t| t.wall_ms).min().unwrap_or(0),
            max_partition_ms: per_partition.iter().map(|t| t.wall_ms).max().unwrap_or(0),
            wall_ms,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_aggregates_sum_and_bound() {
        let mut stats = JobStats::new("sequential");
        stats.record_map(
            &[
                MapTaskStats { worker: 0, units: 3, emits: 10, spilled: 4, wall_ms: 5 },
                MapTaskStats { worker: 1, units: 2, emits: 6, spilled: 6, wall_ms: 9 },
            ],
            12,
        );
        assert_eq!(stats.map.workers, 2);
        assert_eq!(stats.map.units, 5);
        assert_eq!(stats.map.total_emits, 16);
        assert_eq!(stats.map.total_spilled, 10);
        assert_eq!((stats.map.min_task_ms, stats.map.max_task_ms), (5, 9));
    }

    #[test]
    fn empty_phase_reports_zeroes() {
        let mut stats = JobStats::new("cpu_parallel");
        stats.record_reduce(&[], 0);
        assert_eq!(stats.reduce.partitions, 0);
        assert_eq!(stats.reduce.min_partition_ms, 0);
        assert_eq!(stats.policy, "cpu_parallel");
    }
}
