//! Append-only JSON Lines log.
//!
//! Records are appended one per line with file locking. Batches are
//! written atomically by copying the log to a temp file, appending the
//! batch, syncing, and renaming over the original.

use crate::Result;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// JSONL log with file locking
#[derive(Clone, Debug)]
pub struct JsonlLog {
    path: PathBuf,
}

impl JsonlLog {
    /// Create a log handle for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure the parent directory exists
    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Append a single record as one JSON line
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let line = serde_json::to_string(record)?;
        let mut writer = std::io::BufWriter::new(&file);
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;

        tracing::debug!("Appended record to {:?}", self.path);
        Ok(())
    }

    /// Append a batch so that either every record lands or none do
    pub fn append_batch<T: Serialize>(&self, records: &[T]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.ensure_parent_dir()?;

        // Serialize everything up front so a bad record aborts before any IO
        let mut batch = Vec::new();
        for record in records {
            serde_json::to_writer(&mut batch, record)?;
            batch.push(b'\n');
        }

        let dir = self.path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "log path missing parent")
        })?;
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.as_file().lock_exclusive()?;

        if self.path.exists() {
            let existing = File::open(&self.path)?;
            existing.lock_shared()?;
            let mut reader = BufReader::new(&existing);
            std::io::copy(&mut reader, temp.as_file_mut())?;
            existing.unlock()?;

            // A torn final line must not swallow the first batch record
            let len = temp.as_file().metadata()?.len();
            if len > 0 && !ends_with_newline(&self.path)? {
                temp.write_all(b"\n")?;
            }
        }

        temp.write_all(&batch)?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        temp.persist(&self.path)
            .map_err(|e| crate::Error::Io(e.error))?;

        tracing::debug!("Appended batch of {} records to {:?}", records.len(), self.path);
        Ok(())
    }

    /// Read every decodable record; undecodable lines are skipped
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        file.lock_shared()?;

        let reader = BufReader::new(&file);
        let mut records = Vec::new();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<T>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse record at {:?} line {}: {}",
                        self.path,
                        line_num + 1,
                        e
                    );
                }
            }
        }

        file.unlock()?;
        tracing::debug!("Read {} records from {:?}", records.len(), self.path);
        Ok(records)
    }
}

fn ends_with_newline(path: &Path) -> Result<bool> {
    use std::io::{Read, Seek, SeekFrom};

    let mut file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
