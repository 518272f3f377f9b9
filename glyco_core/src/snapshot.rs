//! Whole-document JSON persistence with file locking.
//!
//! Used for small tables that are rewritten on every change (cycles).
//! Writes go to a temp file in the same directory, are synced, then
//! renamed over the original so readers never observe a partial file.

use crate::{Error, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A JSON document stored at a fixed path
#[derive(Clone, Debug)]
pub struct Snapshot {
    path: PathBuf,
}

impl Snapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document with shared locking
    ///
    /// Returns the default value if the file doesn't exist. A file that
    /// exists but cannot be decoded is a `Storage` error, never defaults.
    pub fn load<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        if !self.path.exists() {
            tracing::debug!("No snapshot at {:?}, starting empty", self.path);
            return Ok(T::default());
        }

        let file = File::open(&self.path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        read?;

        if contents.trim().is_empty() {
            return Ok(T::default());
        }

        serde_json::from_str::<T>(&contents).map_err(|e| {
            tracing::warn!("Failed to parse snapshot {:?}: {}", self.path, e);
            Error::Storage(format!("unreadable snapshot {:?}: {}", self.path, e))
        })
    }

    /// Save the document atomically
    ///
    /// 1. Write to a temp file in the same directory
    /// 2. Sync to disk
    /// 3. Rename over the original
    pub fn save<T: Serialize>(&self, value: &T) -> Result<()> {
        let parent = self.path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "snapshot path missing parent")
        })?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(value)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved snapshot to {:?}", self.path);
        Ok(())
    }

    /// Load, modify, and save back
    pub fn update<T, R, F>(&self, f: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> Result<R>,
    {
        let mut value = self.load::<T>()?;
        let out = f(&mut value)?;
        self.save(&value)?;
        Ok(out)
    }
}
