use crate::record::RECORD_DELIMITER;
use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::Hasher;
use std::io::{self, BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};

pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    fs::create_dir_all(path.as_ref()).with_context(|| format!("create_dir_all {}", path.as_ref().display()))
}

pub fn list_files_recursive(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.path().to_path_buf());
        }
    }
    Ok(files)
}

/// Reads one `\r`-terminated line into `buf`, without the delimiter.
/// Returns `false` at end of stream. A final line with no delimiter is still returned.
pub fn read_record_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<bool> {
    buf.clear();
    if reader.read_until(RECORD_DELIMITER, buf)? == 0 {
        return Ok(false);
    }
    if buf.last() == Some(&RECORD_DELIMITER) {
        buf.pop();
    }
    Ok(true)
}

/// Maps the serialized form of a key onto one of `num_partitions` partitions.
/// Depends only on the bytes, so every worker and every policy agrees on the routing.
pub fn hash_to_partition(key_bytes: &[u8], num_partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    hasher.write(key_bytes);
    (hasher.finish() as usize) % num_partitions.max(1)
}

/// Creates a uniquely named file in `dir` and hands back both the open file and its path.
/// The file is not deleted automatically; the caller takes ownership of the path.
pub fn create_temp_file(dir: &Path, prefix: &str, suffix: &str) -> io::Result<(File, PathBuf)> {
    tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)?
        .keep()
        .map_err(|e| e.error)
}

/// Removes a file; a path that is already gone counts as removed.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

pub fn open_writer(path: impl AsRef<Path>, capacity: usize) -> io::Result<BufWriter<File>> {
    let file = File::create(path)?;
    Ok(BufWriter::with_capacity(capacity, file))
}

/// Opens `path` for appending, creating it when missing.
pub fn open_append(path: impl AsRef<Path>) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

pub fn open_reader(path: impl AsRef<Path>) -> io::Result<BufReader<File>> {
    let file = File::open(path)?;
    Ok(BufReader::new(file))
}
