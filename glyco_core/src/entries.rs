//! Entry storage: glucose readings and meals attributed to a cycle.
//!
//! Entries reference an existing cycle at creation time. The store does
//! not check that the cycle is still active; callers decide whether
//! logging into a closed or expired cycle is allowed.

use crate::store::{Database, StoreEvent};
use crate::{
    Cycle, Entry, EntryContent, EntryMetadata, EntrySource, EntryType, Error, GlucoseUnit,
    NewEntry, NormalizedRecord, Result,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Outcome of importing parsed sensor records into a cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportSummary {
    /// Records handed to the import
    pub total: usize,
    /// Records inside the cycle window that were stored
    pub imported: usize,
}

/// Entry operations against a store
pub struct EntryStore<'a> {
    db: &'a Database,
}

impl<'a> EntryStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Add a single entry to a cycle.
    ///
    /// `timestamp` defaults to now. Fails with `NotFound` if the cycle does
    /// not exist.
    pub fn add_entry(
        &self,
        cycle_id: Uuid,
        entry_type: EntryType,
        content: EntryContent,
        metadata: Option<EntryMetadata>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Uuid> {
        let new_entry = NewEntry {
            cycle_id,
            timestamp: timestamp.unwrap_or_else(Utc::now),
            entry_type,
            content,
            metadata,
        };
        new_entry.validate()?;

        let entry = new_entry.into_entry(Uuid::new_v4());
        {
            let _lock = self.db.write_lock()?;
            self.ensure_cycles_exist(std::iter::once(cycle_id))?;
            self.db.entry_log().append(&entry)?;
        }

        tracing::debug!(
            "Added {} entry {} to cycle {}",
            entry.entry_type,
            entry.id,
            cycle_id
        );
        self.db.publish(StoreEvent::EntryAdded {
            cycle_id,
            entry_id: entry.id,
        });
        Ok(entry.id)
    }

    /// All entries of a cycle, oldest first
    pub fn get_entries_for_cycle(&self, cycle_id: Uuid) -> Result<Vec<Entry>> {
        self.query(|e| e.cycle_id == cycle_id)
    }

    /// Entries of one type in a cycle, oldest first
    pub fn get_entries_by_type(&self, cycle_id: Uuid, entry_type: EntryType) -> Result<Vec<Entry>> {
        self.query(|e| e.cycle_id == cycle_id && e.entry_type == entry_type)
    }

    /// Insert a batch atomically: every entry is stored or none is.
    ///
    /// The whole batch is validated first; one bad record (unknown cycle,
    /// mismatched shape) rejects the batch without writing anything.
    pub fn bulk_add(&self, entries: Vec<NewEntry>) -> Result<Vec<Uuid>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        for entry in &entries {
            entry.validate()?;
        }

        let stored: Vec<Entry> = entries
            .into_iter()
            .map(|e| e.into_entry(Uuid::new_v4()))
            .collect();

        {
            let _lock = self.db.write_lock()?;
            self.ensure_cycles_exist(stored.iter().map(|e| e.cycle_id))?;
            self.db.entry_log().append_batch(&stored)?;
        }

        let mut per_cycle: BTreeMap<Uuid, usize> = BTreeMap::new();
        for entry in &stored {
            *per_cycle.entry(entry.cycle_id).or_default() += 1;
        }
        for (cycle_id, count) in per_cycle {
            tracing::info!("Stored {} entries in cycle {}", count, cycle_id);
            self.db.publish(StoreEvent::EntriesAdded { cycle_id, count });
        }

        Ok(stored.iter().map(|e| e.id).collect())
    }

    /// Store parsed sensor records as glucose readings in `cycle`.
    ///
    /// Only records inside the cycle window `[start, start + 14d)` are
    /// kept; they are written in one atomic batch.
    pub fn import_readings(
        &self,
        cycle: &Cycle,
        records: &[NormalizedRecord],
    ) -> Result<ImportSummary> {
        let batch: Vec<NewEntry> = records
            .iter()
            .filter(|r| cycle.contains(r.timestamp))
            .map(|r| {
                NewEntry::glucose(
                    cycle.id,
                    r.timestamp,
                    r.value,
                    GlucoseUnit::MgDl,
                    EntrySource::Import,
                )
            })
            .collect();

        let imported = batch.len();
        if imported < records.len() {
            tracing::info!(
                "Skipping {} records outside cycle {} window",
                records.len() - imported,
                cycle.id
            );
        }
        self.bulk_add(batch)?;

        Ok(ImportSummary {
            total: records.len(),
            imported,
        })
    }

    /// Change notifications for this store
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.db.subscribe()
    }

    fn query<F>(&self, keep: F) -> Result<Vec<Entry>>
    where
        F: Fn(&Entry) -> bool,
    {
        let mut entries: Vec<Entry> = {
            let _lock = self.db.read_lock()?;
            self.db.entry_log().read_all()?
        };
        entries.retain(|e| keep(e));
        // Stable: equal timestamps keep insertion order
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    /// Caller must hold the write lock
    fn ensure_cycles_exist(&self, ids: impl Iterator<Item = Uuid>) -> Result<()> {
        let known: HashSet<Uuid> = self
            .db
            .cycle_table()
            .load::<Vec<Cycle>>()?
            .into_iter()
            .map(|c| c.id)
            .collect();

        for id in ids {
            if !known.contains(&id) {
                return Err(Error::NotFound(id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn open_db() -> (tempfile::TempDir, Database) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = Database::open(temp_dir.path()).unwrap();
        (temp_dir, db)
    }

    fn at_ms(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn test_add_entry_linked_to_cycle() {
        let (_dir, db) = open_db();
        let cycle_id = db.cycles().start_cycle(Utc::now()).unwrap();

        let entry_id = db
            .entries()
            .add_entry(cycle_id, EntryType::Bg, EntryContent::Value(100.0), None, None)
            .unwrap();

        let entries = db.entries().get_entries_for_cycle(cycle_id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, entry_id);
        assert_eq!(entries[0].cycle_id, cycle_id);
        assert_eq!(entries[0].entry_type, EntryType::Bg);
        assert_eq!(entries[0].content, EntryContent::Value(100.0));
    }

    #[test]
    fn test_add_entry_unknown_cycle_fails() {
        let (_dir, db) = open_db();
        let missing = Uuid::new_v4();

        let result = db.entries().add_entry(
            missing,
            EntryType::Bg,
            EntryContent::Value(100.0),
            None,
            None,
        );
        assert!(matches!(result, Err(Error::NotFound(id)) if id == missing));
        assert!(!db.root().join(crate::store::ENTRIES_FILE).exists());
    }

    #[test]
    fn test_add_entry_to_closed_cycle_allowed() {
        let (_dir, db) = open_db();
        let cycle_id = db.cycles().start_cycle(Utc::now()).unwrap();
        db.cycles().close_cycle(cycle_id).unwrap();

        db.entries()
            .add_entry(cycle_id, EntryType::Bg, EntryContent::Value(90.0), None, None)
            .unwrap();
        assert_eq!(db.entries().get_entries_for_cycle(cycle_id).unwrap().len(), 1);
    }

    #[test]
    fn test_entries_sorted_by_timestamp() {
        let (_dir, db) = open_db();
        let cycle_id = db.cycles().start_cycle(Utc::now()).unwrap();
        let store = db.entries();

        store
            .add_entry(cycle_id, EntryType::Bg, EntryContent::Value(100.0), None, Some(at_ms(1000)))
            .unwrap();
        store
            .add_entry(
                cycle_id,
                EntryType::Meal,
                EntryContent::Label("Lunch".into()),
                None,
                Some(at_ms(2000)),
            )
            .unwrap();
        store
            .add_entry(cycle_id, EntryType::Bg, EntryContent::Value(120.0), None, Some(at_ms(500)))
            .unwrap();

        let entries = store.get_entries_for_cycle(cycle_id).unwrap();
        let times: Vec<i64> = entries.iter().map(|e| e.timestamp.timestamp_millis()).collect();
        assert_eq!(times, vec![500, 1000, 2000]);
    }

    #[test]
    fn test_filter_by_type_and_cycle() {
        let (_dir, db) = open_db();
        let store = db.entries();
        let old_cycle = db.cycles().start_cycle(Utc::now()).unwrap();
        store
            .add_entry(old_cycle, EntryType::Bg, EntryContent::Value(140.0), None, None)
            .unwrap();

        let cycle_id = db.cycles().start_cycle(Utc::now()).unwrap();
        store
            .add_entry(cycle_id, EntryType::Bg, EntryContent::Value(100.0), None, None)
            .unwrap();
        store
            .add_entry(cycle_id, EntryType::Meal, EntryContent::Label("Lunch".into()), None, None)
            .unwrap();
        store
            .add_entry(cycle_id, EntryType::Bg, EntryContent::Value(110.0), None, None)
            .unwrap();

        let bg = store.get_entries_by_type(cycle_id, EntryType::Bg).unwrap();
        assert_eq!(bg.len(), 2);
        assert!(bg
            .iter()
            .all(|e| e.entry_type == EntryType::Bg && e.cycle_id == cycle_id));

        let meals = store.get_entries_by_type(cycle_id, EntryType::Meal).unwrap();
        assert_eq!(meals.len(), 1);
    }

    #[test]
    fn test_meal_metadata_roundtrip() {
        let (_dir, db) = open_db();
        let cycle_id = db.cycles().start_cycle(Utc::now()).unwrap();
        let metadata = EntryMetadata::Meal {
            calories: 450.0,
            carbs: 40.0,
            protein: 35.0,
            fat: 12.0,
            original_description: "Grilled chicken with quinoa".into(),
        };

        db.entries()
            .add_entry(
                cycle_id,
                EntryType::Meal,
                EntryContent::Label("Chicken bowl".into()),
                Some(metadata.clone()),
                None,
            )
            .unwrap();

        let meals = db.entries().get_entries_by_type(cycle_id, EntryType::Meal).unwrap();
        assert_eq!(meals[0].metadata, Some(metadata));
    }

    #[test]
    fn test_add_entry_rejects_mismatched_content() {
        let (_dir, db) = open_db();
        let cycle_id = db.cycles().start_cycle(Utc::now()).unwrap();

        let result = db.entries().add_entry(
            cycle_id,
            EntryType::Bg,
            EntryContent::Label("high".into()),
            None,
            None,
        );
        assert!(matches!(result, Err(Error::InvalidEntry(_))));
    }

    #[test]
    fn test_bulk_add_all_or_nothing() {
        let (_dir, db) = open_db();
        let cycle_id = db.cycles().start_cycle(Utc::now()).unwrap();
        let store = db.entries();

        store
            .add_entry(cycle_id, EntryType::Bg, EntryContent::Value(95.0), None, None)
            .unwrap();

        let now = Utc::now();
        let batch = vec![
            NewEntry::glucose(cycle_id, now, 101.0, GlucoseUnit::MgDl, EntrySource::Import),
            NewEntry::glucose(Uuid::new_v4(), now, 102.0, GlucoseUnit::MgDl, EntrySource::Import),
        ];
        assert!(matches!(store.bulk_add(batch), Err(Error::NotFound(_))));
        assert_eq!(store.get_entries_for_cycle(cycle_id).unwrap().len(), 1);

        let batch = vec![
            NewEntry::glucose(cycle_id, now, 101.0, GlucoseUnit::MgDl, EntrySource::Import),
            NewEntry::glucose(cycle_id, now, 102.0, GlucoseUnit::MgDl, EntrySource::Import),
        ];
        let ids = store.bulk_add(batch).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(store.get_entries_for_cycle(cycle_id).unwrap().len(), 3);
    }

    #[test]
    fn test_import_filters_to_cycle_window() {
        let (_dir, db) = open_db();
        let start = Utc::now() - Duration::days(3);
        let cycle_id = db.cycles().start_cycle(start).unwrap();
        let cycle = db.cycles().get_cycle(cycle_id).unwrap().unwrap();

        let records = vec![
            NormalizedRecord { timestamp: start - Duration::hours(1), value: 80.0 },
            NormalizedRecord { timestamp: start, value: 100.0 },
            NormalizedRecord { timestamp: start + Duration::days(1), value: 105.0 },
            NormalizedRecord { timestamp: start + Duration::days(14), value: 110.0 },
        ];

        let summary = db.entries().import_readings(&cycle, &records).unwrap();
        assert_eq!(summary, ImportSummary { total: 4, imported: 2 });

        let stored = db.entries().get_entries_by_type(cycle_id, EntryType::Bg).unwrap();
        let values: Vec<EntryContent> = stored.iter().map(|e| e.content.clone()).collect();
        assert_eq!(values, vec![EntryContent::Value(100.0), EntryContent::Value(105.0)]);
        assert!(stored.iter().all(|e| e.metadata
            == Some(EntryMetadata::Bg {
                unit: GlucoseUnit::MgDl,
                source: EntrySource::Import,
            })));
    }

    #[test]
    fn test_entry_events() {
        let (_dir, db) = open_db();
        let cycle_id = db.cycles().start_cycle(Utc::now()).unwrap();
        let store = db.entries();
        let mut rx = store.subscribe();

        let entry_id = store
            .add_entry(cycle_id, EntryType::Bg, EntryContent::Value(100.0), None, None)
            .unwrap();
        store
            .bulk_add(vec![
                NewEntry::glucose(cycle_id, Utc::now(), 1.0, GlucoseUnit::MgDl, EntrySource::Import),
                NewEntry::glucose(cycle_id, Utc::now(), 2.0, GlucoseUnit::MgDl, EntrySource::Import),
            ])
            .unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::EntryAdded { cycle_id, entry_id }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::EntriesAdded { cycle_id, count: 2 }
        );
    }
}
