//! Storage handle for a Glyco data directory.
//!
//! A [`Database`] is opened on a directory, passed by reference to the
//! cycle manager and entry store, and closed explicitly. It owns:
//! - `cycles.json`: the cycles table, rewritten atomically
//! - `entries.jsonl`: the entries log
//! - `glyco.lock`: advisory lock serializing writers against readers
//! - a broadcast channel announcing every change to subscribers

use crate::snapshot::Snapshot;
use crate::wal::JsonlLog;
use crate::{CycleManager, EntryStore, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use uuid::Uuid;

pub const CYCLES_FILE: &str = "cycles.json";
pub const ENTRIES_FILE: &str = "entries.jsonl";
const LOCK_FILE: &str = "glyco.lock";
const EVENT_CAPACITY: usize = 256;

/// Change notification published after a successful write
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    CycleStarted { cycle_id: Uuid },
    CycleClosed { cycle_id: Uuid },
    EntryAdded { cycle_id: Uuid, entry_id: Uuid },
    EntriesAdded { cycle_id: Uuid, count: usize },
}

/// Held advisory lock; released on drop
pub(crate) struct StoreLock(File);

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = self.0.unlock() {
            tracing::warn!("Failed to release store lock: {}", e);
        }
    }
}

/// Handle to one data directory
pub struct Database {
    root: PathBuf,
    cycles: Snapshot,
    entries: JsonlLog,
    events: broadcast::Sender<StoreEvent>,
}

impl Database {
    /// Open (creating if needed) the data directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        tracing::debug!("Opened store at {:?}", root);
        Ok(Self {
            cycles: Snapshot::new(root.join(CYCLES_FILE)),
            entries: JsonlLog::new(root.join(ENTRIES_FILE)),
            root,
            events,
        })
    }

    /// Close the handle. Subscribers observe the channel closing.
    pub fn close(self) {
        tracing::debug!("Closed store at {:?}", self.root);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cycle lifecycle operations on this store
    pub fn cycles(&self) -> CycleManager<'_> {
        CycleManager::new(self)
    }

    /// Entry operations on this store
    pub fn entries(&self) -> EntryStore<'_> {
        EntryStore::new(self)
    }

    /// Receive every change made through this handle from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: StoreEvent) {
        // No receivers is not an error
        let _ = self.events.send(event);
    }

    pub(crate) fn cycle_table(&self) -> &Snapshot {
        &self.cycles
    }

    pub(crate) fn entry_log(&self) -> &JsonlLog {
        &self.entries
    }

    fn lock_file(&self) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.root.join(LOCK_FILE))?)
    }

    /// Shared lock for readers
    pub(crate) fn read_lock(&self) -> Result<StoreLock> {
        let file = self.lock_file()?;
        file.lock_shared()?;
        Ok(StoreLock(file))
    }

    /// Exclusive lock for writers
    pub(crate) fn write_lock(&self) -> Result<StoreLock> {
        let file = self.lock_file()?;
        file.lock_exclusive()?;
        Ok(StoreLock(file))
    }
}
