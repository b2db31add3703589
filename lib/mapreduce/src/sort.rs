//! External merge sort over `\r`-delimited record files.
//!
//! The input is consumed in chunks of at most `max_lines` records. Each chunk is
//! collected into a `BTreeMap` that counts duplicates, then flushed as one sorted
//! run file. A single run is renamed onto the output; several runs are k-way merged.
//! All run files belong to a [`TempFileManager`], so they disappear on every exit path.

use crate::constants::{DEFAULT_SORT_MAX_LINES, RUN_PREFIX, RUN_SUFFIX, SORT_WRITE_BUFFER_BYTES};
use crate::io::{create_temp_file, open_reader, open_writer, read_record_line, remove_if_exists};
use crate::record::{Record, RecordError, RECORD_DELIMITER};
use crate::temp::TempFileManager;
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SortError {
    #[error("unable to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: line {line}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        line: u64,
        #[source]
        source: RecordError,
    },
}

impl SortError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> SortError + '_ {
        move |source| SortError::Io { path: path.to_path_buf(), source }
    }
}

/// How the output file came to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SortStrategy {
    /// No records: the output was created empty.
    Empty,
    /// One run: moved onto the output without a merge pass.
    Promoted,
    /// Several runs: k-way merged into the output.
    Merged,
}

#[derive(Clone, Debug, Serialize)]
pub struct SortOutcome {
    pub lines_in: u64,
    pub runs: usize,
    pub strategy: SortStrategy,
    pub split_ms: u64,
    pub merge_ms: u64,
}

#[derive(Clone, Debug)]
pub struct MergeSorter {
    max_lines: usize,
    scratch_dir: PathBuf,
}

impl MergeSorter {
    /// Run files are created in `scratch_dir`.
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self { max_lines: DEFAULT_SORT_MAX_LINES, scratch_dir: scratch_dir.into() }
    }

    /// Records per run. Zero is treated as one.
    pub fn max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines.max(1);
        self
    }

    pub fn sort_file<R: Record>(&self, input: &Path, output: &Path) -> Result<SortOutcome, SortError> {
        self.sort_files::<R, _>(&[input], output)
    }

    /// Sorts the concatenation of `inputs` into `output`.
    pub fn sort_files<R, P>(&self, inputs: &[P], output: &Path) -> Result<SortOutcome, SortError>
    where
        R: Record,
        P: AsRef<Path>,
    {
        let split_start = Instant::now();
        let runs = self.split_runs::<R, P>(inputs)?;
        let split_ms = split_start.elapsed().as_millis() as u64;
        let (lines_in, num_runs) = (runs.lines_in, runs.files.len());

        let merge_start = Instant::now();
        let strategy = runs.finish(output)?;
        let merge_ms = merge_start.elapsed().as_millis() as u64;

        debug!(output = %output.display(), lines_in, runs = num_runs, ?strategy, split_ms, merge_ms, "sort complete");
        Ok(SortOutcome { lines_in, runs: num_runs, strategy, split_ms, merge_ms })
    }

    /// Reads every input once, writing one sorted run per `max_lines` records.
    pub(crate) fn split_runs<R, P>(&self, inputs: &[P]) -> Result<SortedRuns<R>, SortError>
    where
        R: Record,
        P: AsRef<Path>,
    {
        let mut runs = SortedRuns::new();
        let mut chunk: BTreeMap<R, u64> = BTreeMap::new();
        let mut chunk_lines = 0usize;
        let mut line = Vec::new();

        for input in inputs {
            let path = input.as_ref();
            let mut reader =
                open_reader(path).map_err(|source| SortError::Open { path: path.to_path_buf(), source })?;
            let mut line_no = 0u64;
            while read_record_line(&mut reader, &mut line).map_err(SortError::io(path))? {
                line_no += 1;
                if line.is_empty() {
                    continue;
                }
                let record = R::decode(&line).map_err(|source| SortError::Malformed {
                    path: path.to_path_buf(),
                    line: line_no,
                    source,
                })?;
                *chunk.entry(record).or_insert(0) += 1;
                chunk_lines += 1;
                runs.lines_in += 1;
                if chunk_lines == self.max_lines {
                    self.flush_run(&mut runs, std::mem::take(&mut chunk))?;
                    chunk_lines = 0;
                }
            }
        }
        if !chunk.is_empty() {
            self.flush_run(&mut runs, chunk)?;
        }
        Ok(runs)
    }

    fn flush_run<R: Record>(&self, runs: &mut SortedRuns<R>, chunk: BTreeMap<R, u64>) -> Result<(), SortError> {
        let (file, path) =
            create_temp_file(&self.scratch_dir, RUN_PREFIX, RUN_SUFFIX).map_err(SortError::io(&self.scratch_dir))?;
        // owned before the first write so a failed write still gets cleaned up
        runs.files.track(path.clone());

        let mut writer = BufWriter::with_capacity(SORT_WRITE_BUFFER_BYTES, file);
        let mut buf = Vec::new();
        for (record, count) in &chunk {
            buf.clear();
            record.encode(&mut buf);
            buf.push(RECORD_DELIMITER);
            for _ in 0..*count {
                writer.write_all(&buf).map_err(SortError::io(&path))?;
            }
        }
        writer.flush().map_err(SortError::io(&path))?;
        debug!(run = %path.display(), distinct = chunk.len(), "flushed sorted run");
        Ok(())
    }
}

/// Sorts `input` into `output`, keeping run files next to the output.
pub fn merge_sort<R: Record>(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    max_lines: usize,
) -> Result<SortOutcome, SortError> {
    let output = output.as_ref();
    let scratch = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    MergeSorter::new(scratch).max_lines(max_lines).sort_file::<R>(input.as_ref(), output)
}

/// The run files of one sort invocation. `finish` consumes it, so the merge pass
/// cannot be entered twice.
pub(crate) struct SortedRuns<R> {
    pub(crate) files: TempFileManager,
    pub(crate) lines_in: u64,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> SortedRuns<R> {
    fn new() -> Self {
        Self { files: TempFileManager::new(), lines_in: 0, _record: PhantomData }
    }

    pub(crate) fn finish(mut self, output: &Path) -> Result<SortStrategy, SortError> {
        match self.files.len() {
            0 => {
                File::create(output).map_err(SortError::io(output))?;
                Ok(SortStrategy::Empty)
            }
            1 => {
                let run = self.files.paths()[0].clone();
                remove_if_exists(output).map_err(SortError::io(output))?;
                match fs::rename(&run, output) {
                    Ok(()) => {
                        self.files.release(&run);
                    }
                    Err(e) => {
                        // rename fails across filesystems; copy instead and let the manager drop the run
                        debug!(run = %run.display(), error = %e, "rename failed, copying run into place");
                        fs::copy(&run, output).map_err(SortError::io(output))?;
                    }
                }
                Ok(SortStrategy::Promoted)
            }
            _ => {
                merge_runs::<R>(self.files.paths(), output)?;
                Ok(SortStrategy::Merged)
            }
        }
    }
}

struct Head<R> {
    record: R,
    line: Vec<u8>,
    run: usize,
}

impl<R: Ord> Ord for Head<R> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.record.cmp(&other.record).then(self.run.cmp(&other.run))
    }
}

impl<R: Ord> PartialOrd for Head<R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<R: Ord> PartialEq for Head<R> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<R: Ord> Eq for Head<R> {}

struct RunReader {
    path: PathBuf,
    reader: BufReader<File>,
    line_no: u64,
}

impl RunReader {
    /// Next head of this run, skipping blank lines.
    fn next_head<R: Record>(&mut self, run: usize) -> Result<Option<Head<R>>, SortError> {
        let mut line = Vec::new();
        loop {
            if !read_record_line(&mut self.reader, &mut line).map_err(SortError::io(&self.path))? {
                return Ok(None);
            }
            self.line_no += 1;
            if line.is_empty() {
                continue;
            }
            let record = R::decode(&line).map_err(|source| SortError::Malformed {
                path: self.path.clone(),
                line: self.line_no,
                source,
            })?;
            return Ok(Some(Head { record, line, run }));
        }
    }
}

/// Merges sorted runs by record order. Lines are copied verbatim; equal records
/// come out in run order.
fn merge_runs<R: Record>(runs: &[PathBuf], output: &Path) -> Result<(), SortError> {
    let mut readers = Vec::with_capacity(runs.len());
    for path in runs {
        let reader = open_reader(path).map_err(|source| SortError::Open { path: path.clone(), source })?;
        readers.push(RunReader { path: path.clone(), reader, line_no: 0 });
    }

    let mut heap = BinaryHeap::with_capacity(readers.len());
    for (run, reader) in readers.iter_mut().enumerate() {
        if let Some(head) = reader.next_head::<R>(run)? {
            heap.push(Reverse(head));
        }
    }

    let mut out = open_writer(output, SORT_WRITE_BUFFER_BYTES).map_err(SortError::io(output))?;
    while let Some(Reverse(head)) = heap.pop() {
        out.write_all(&head.line).map_err(SortError::io(output))?;
        out.write_all(&[RECORD_DELIMITER]).map_err(SortError::io(output))?;
        if let Some(next) = readers[head.run].next_head::<R>(head.run)? {
            heap.push(Reverse(next));
        }
    }
    out.flush().map_err(SortError::io(output))?;
    Ok(())
}
