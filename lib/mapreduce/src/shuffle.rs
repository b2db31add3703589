//! Map-side spill files and reduce-side key grouping.
//!
//! Every map worker owns one spill file per partition, named
//! `map{worker}_part{partition}.spill` inside the job scratch directory. A pair is
//! routed by hashing the serialized key. After the sort phase each partition is a
//! single file ordered by (key, value), which [`KeyGroups`] walks one key at a time.

use crate::api::Combiner;
use crate::constants::{SORTED_SUFFIX, SPILL_SUFFIX};
use crate::io::{hash_to_partition, open_append, open_reader, read_record_line};
use crate::record::{encode_pair, KeyValue, Record, FIELD_SEPARATOR, RECORD_DELIMITER};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

pub(crate) fn spill_path(scratch: &Path, worker: usize, partition: usize) -> PathBuf {
    scratch.join(format!("map{}_part{}{}", worker, partition, SPILL_SUFFIX))
}

pub(crate) fn sorted_partition_path(scratch: &Path, partition: usize) -> PathBuf {
    scratch.join(format!("reduce_in_part{}{}", partition, SORTED_SUFFIX))
}

/// All spill files written for `partition`, in a stable order.
pub(crate) fn partition_spill_paths(scratch: &Path, partition: usize) -> Result<Vec<PathBuf>> {
    let dir = glob::Pattern::escape(&scratch.to_string_lossy());
    let pattern = format!("{}/map*_part{}{}", dir, partition, SPILL_SUFFIX);
    let mut paths = glob::glob(&pattern)
        .with_context(|| format!("glob {}", pattern))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("list spill files for partition {}", partition))?;
    paths.sort();
    Ok(paths)
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SpillSummary {
    pub emits: u64,
    pub spilled: u64,
    pub flushes: u64,
}

/// Routes one map worker's emitted pairs into its per-partition spill files,
/// through the combiner when one is active.
///
/// Encoded lines are buffered per partition in memory. Once the buffers together
/// reach `spill_buffer` bytes the largest one is appended to its file, which is
/// opened for that write only. A worker therefore holds at most one spill file
/// open, whatever the partition count.
///
/// `emit` cannot fail from the map task's point of view; the first write error is
/// kept and reported by [`SpillWriter::take_error`] or [`SpillWriter::finish`].
pub(crate) struct SpillWriter<'c, K, V, C> {
    buffers: Vec<Vec<u8>>,
    paths: Vec<PathBuf>,
    buffered: usize,
    spill_buffer: usize,
    combiner: &'c C,
    pending: BTreeMap<K, Vec<V>>,
    pending_len: usize,
    combine_buffer: usize,
    line: Vec<u8>,
    summary: SpillSummary,
    error: Option<anyhow::Error>,
}

impl<'c, K, V, C> SpillWriter<'c, K, V, C>
where
    K: Record,
    V: Record,
    C: Combiner<K, V>,
{
    /// Creates (or truncates) this worker's spill file for every partition.
    pub(crate) fn create(
        scratch: &Path,
        worker: usize,
        partitions: usize,
        combiner: &'c C,
        combine_buffer: usize,
        spill_buffer: usize,
    ) -> Result<Self> {
        let mut paths = Vec::with_capacity(partitions);
        for part in 0..partitions {
            let path = spill_path(scratch, worker, part);
            File::create(&path).with_context(|| format!("create spill {}", path.display()))?;
            paths.push(path);
        }
        Ok(Self {
            buffers: vec![Vec::new(); partitions],
            paths,
            buffered: 0,
            spill_buffer: spill_buffer.max(1),
            combiner,
            pending: BTreeMap::new(),
            pending_len: 0,
            combine_buffer,
            line: Vec::with_capacity(256),
            summary: SpillSummary::default(),
            error: None,
        })
    }

    pub(crate) fn emit(&mut self, key: K, value: V) {
        if self.error.is_some() {
            return;
        }
        self.summary.emits += 1;
        if self.combiner.is_pass_through() {
            if let Err(e) = self.write_pair(&key, &value) {
                self.error = Some(e);
            }
            return;
        }
        self.pending.entry(key).or_default().push(value);
        self.pending_len += 1;
        if self.pending_len >= self.combine_buffer {
            if let Err(e) = self.flush_pending() {
                self.error = Some(e);
            }
        }
    }

    /// Surfaces a write error recorded during `emit`.
    pub(crate) fn take_error(&mut self) -> Result<()> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Bytes encoded but not yet on disk.
    #[cfg(test)]
    pub(crate) fn buffered_bytes(&self) -> usize {
        self.buffered
    }

    pub(crate) fn finish(mut self) -> Result<SpillSummary> {
        self.take_error()?;
        self.flush_pending()?;
        for part in 0..self.buffers.len() {
            self.flush_partition(part)?;
        }
        Ok(self.summary)
    }

    fn flush_pending(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        self.pending_len = 0;
        let combiner = self.combiner;
        for (key, values) in pending {
            let mut failed = None;
            combiner.combine(&key, values, &mut |v| {
                if failed.is_none() {
                    if let Err(e) = self.write_pair(&key, &v) {
                        failed = Some(e);
                    }
                }
            });
            if let Some(e) = failed {
                return Err(e);
            }
        }
        Ok(())
    }

    fn write_pair(&mut self, key: &K, value: &V) -> Result<()> {
        self.line.clear();
        encode_pair(key, value, &mut self.line);
        let key_len = memchr::memchr(FIELD_SEPARATOR, &self.line).unwrap_or(self.line.len());
        let part = hash_to_partition(&self.line[..key_len], self.buffers.len());
        self.line.push(RECORD_DELIMITER);
        self.buffers[part].extend_from_slice(&self.line);
        self.buffered += self.line.len();
        self.summary.spilled += 1;
        while self.buffered >= self.spill_buffer {
            self.flush_largest()?;
        }
        Ok(())
    }

    fn flush_largest(&mut self) -> Result<()> {
        let largest = self
            .buffers
            .iter()
            .enumerate()
            .max_by_key(|(_, buf)| buf.len())
            .map(|(part, _)| part);
        match largest {
            Some(part) => self.flush_partition(part),
            None => Ok(()),
        }
    }

    fn flush_partition(&mut self, part: usize) -> Result<()> {
        let buf = &mut self.buffers[part];
        if buf.is_empty() {
            return Ok(());
        }
        let path = &self.paths[part];
        let mut file = open_append(path).with_context(|| format!("open spill {}", path.display()))?;
        file.write_all(buf).with_context(|| format!("write spill {}", path.display()))?;
        self.buffered -= buf.len();
        buf.clear();
        self.summary.flushes += 1;
        Ok(())
    }
}

/// Walks a sorted partition file one distinct key at a time.
///
/// [`KeyGroups::next_key`] yields a key with its first value; [`KeyGroups::values`]
/// then streams the remaining values of that key straight from the file, so a
/// group is never held in memory as a whole.
pub(crate) struct KeyGroups<K, V> {
    path: PathBuf,
    reader: BufReader<File>,
    line: Vec<u8>,
    line_no: u64,
    peeked: Option<KeyValue<K, V>>,
    lines_in: u64,
    error: Option<anyhow::Error>,
}

impl<K: Record, V: Record> KeyGroups<K, V> {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let reader = open_reader(path).with_context(|| format!("open {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            line: Vec::new(),
            line_no: 0,
            peeked: None,
            lines_in: 0,
            error: None,
        })
    }

    pub(crate) fn lines_in(&self) -> u64 {
        self.lines_in
    }

    fn next_record(&mut self) -> Result<Option<KeyValue<K, V>>> {
        loop {
            let more = read_record_line(&mut self.reader, &mut self.line)
                .with_context(|| format!("read {}", self.path.display()))?;
            if !more {
                return Ok(None);
            }
            self.line_no += 1;
            if self.line.is_empty() {
                continue;
            }
            let kv = KeyValue::decode(&self.line)
                .with_context(|| format!("{}: line {}", self.path.display(), self.line_no))?;
            self.lines_in += 1;
            return Ok(Some(kv));
        }
    }

    /// Starts the next group. Also reports a read error hit while streaming the previous one.
    pub(crate) fn next_key(&mut self) -> Result<Option<(K, V)>> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let first = match self.peeked.take() {
            Some(kv) => kv,
            None => match self.next_record()? {
                Some(kv) => kv,
                None => return Ok(None),
            },
        };
        Ok(Some(first.into_parts()))
    }

    /// Values of the group `key` that [`KeyGroups::next_key`] just returned, starting with `first`.
    pub(crate) fn values<'g>(&'g mut self, key: &'g K, first: V) -> GroupValues<'g, K, V> {
        GroupValues { groups: self, key, first: Some(first), done: false }
    }
}

/// Lazily reads one key's values. Dropping it skips whatever was left unread,
/// so the next group always starts at its own first line.
pub(crate) struct GroupValues<'g, K: Record, V: Record> {
    groups: &'g mut KeyGroups<K, V>,
    key: &'g K,
    first: Option<V>,
    done: bool,
}

impl<K: Record, V: Record> Iterator for GroupValues<'_, K, V> {
    type Item = V;

    fn next(&mut self) -> Option<V> {
        if let Some(v) = self.first.take() {
            return Some(v);
        }
        if self.done {
            return None;
        }
        match self.groups.next_record() {
            Ok(Some(kv)) if kv.key == *self.key => Some(kv.value),
            Ok(Some(kv)) => {
                self.groups.peeked = Some(kv);
                self.done = true;
                None
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.groups.error = Some(e);
                self.done = true;
                None
            }
        }
    }
}

impl<K: Record, V: Record> Drop for GroupValues<'_, K, V> {
    fn drop(&mut self) {
        self.first = None;
        while self.next().is_some() {}
    }
}
