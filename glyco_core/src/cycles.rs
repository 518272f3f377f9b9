//! Cycle lifecycle: start, close, and the 14-day validity window.
//!
//! At most one cycle is active. Starting a new cycle closes every active
//! cycle and records the new one in a single locked write.

use crate::store::{Database, StoreEvent};
use crate::{Cycle, CycleStatus, Result};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Length of a monitoring cycle
pub const CYCLE_DURATION_DAYS: i64 = 14;

const ONE_DAY_MS: i64 = 24 * 60 * 60 * 1000;

impl Cycle {
    /// First instant outside the cycle window
    pub fn window_end(&self) -> DateTime<Utc> {
        self.start_date + Duration::days(CYCLE_DURATION_DAYS)
    }

    /// Whether `ts` falls inside `[start, start + 14d)`
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start_date && ts < self.window_end()
    }

    /// Active and strictly less than 14 days old at `now`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if self.status != CycleStatus::Active {
            return false;
        }
        now - self.start_date < Duration::days(CYCLE_DURATION_DAYS)
    }

    /// Whole days left in the window, rounded up; 0 once expired or closed.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        if self.status != CycleStatus::Active {
            return 0;
        }

        let remaining_ms = (self.window_end() - now).num_milliseconds();
        if remaining_ms <= 0 {
            return 0;
        }
        (remaining_ms + ONE_DAY_MS - 1) / ONE_DAY_MS
    }
}

/// Snapshot of the active cycle as a dashboard would show it
#[derive(Clone, Debug, PartialEq)]
pub struct CycleOverview {
    pub active: Option<Cycle>,
    /// Active and inside the window
    pub is_active: bool,
    /// Active but past the window
    pub is_expired: bool,
    pub days_remaining: i64,
}

/// Cycle operations against a store
pub struct CycleManager<'a> {
    db: &'a Database,
}

impl<'a> CycleManager<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Close every active cycle and create a new active one.
    ///
    /// Both happen in one locked write. Returns the new cycle's identifier.
    pub fn start_cycle(&self, start: DateTime<Utc>) -> Result<Uuid> {
        let now = Utc::now();
        let cycle = Cycle {
            id: Uuid::new_v4(),
            start_date: start,
            end_date: None,
            name: Some(format!("Cycle from {}", start.format("%Y-%m-%d"))),
            status: CycleStatus::Active,
        };
        let id = cycle.id;

        let closed = {
            let _lock = self.db.write_lock()?;
            self.db.cycle_table().update(|cycles: &mut Vec<Cycle>| {
                let mut closed = Vec::new();
                for active in cycles.iter_mut().filter(|c| c.status == CycleStatus::Active) {
                    active.status = CycleStatus::Closed;
                    active.end_date = Some(now);
                    closed.push(active.id);
                }
                cycles.push(cycle);
                Ok(closed)
            })?
        };

        for cycle_id in closed {
            tracing::info!("Closed cycle {}", cycle_id);
            self.db.publish(StoreEvent::CycleClosed { cycle_id });
        }
        tracing::info!("Started cycle {} at {}", id, start);
        self.db.publish(StoreEvent::CycleStarted { cycle_id: id });
        Ok(id)
    }

    /// The single active cycle, if any
    pub fn get_active_cycle(&self) -> Result<Option<Cycle>> {
        Ok(self
            .load()?
            .into_iter()
            .find(|c| c.status == CycleStatus::Active))
    }

    /// Close a cycle, stamping `end_date` with the current time.
    ///
    /// Closing an already-closed cycle keeps its original `end_date`.
    /// An unknown id is logged and ignored.
    pub fn close_cycle(&self, id: Uuid) -> Result<()> {
        let now = Utc::now();

        let closed = {
            let _lock = self.db.write_lock()?;
            self.db
                .cycle_table()
                .update(|cycles: &mut Vec<Cycle>| match cycles.iter_mut().find(|c| c.id == id) {
                    Some(cycle) if cycle.status == CycleStatus::Active => {
                        cycle.status = CycleStatus::Closed;
                        cycle.end_date = Some(now);
                        Ok(true)
                    }
                    Some(_) => {
                        tracing::debug!("Cycle {} already closed", id);
                        Ok(false)
                    }
                    None => {
                        tracing::warn!("Cannot close unknown cycle {}", id);
                        Ok(false)
                    }
                })?
        };

        if closed {
            tracing::info!("Closed cycle {}", id);
            self.db.publish(StoreEvent::CycleClosed { cycle_id: id });
        }
        Ok(())
    }

    pub fn get_cycle(&self, id: Uuid) -> Result<Option<Cycle>> {
        Ok(self.load()?.into_iter().find(|c| c.id == id))
    }

    /// All cycles, oldest start first
    pub fn list_cycles(&self) -> Result<Vec<Cycle>> {
        let mut cycles = self.load()?;
        cycles.sort_by(|a, b| a.start_date.cmp(&b.start_date));
        Ok(cycles)
    }

    /// Derived view of the active cycle at `now`
    pub fn overview(&self, now: DateTime<Utc>) -> Result<CycleOverview> {
        let active = self.get_active_cycle()?;
        let (is_active, days_remaining) = match &active {
            Some(cycle) => (cycle.is_valid(now), cycle.days_remaining(now)),
            None => (false, 0),
        };

        Ok(CycleOverview {
            is_expired: active.is_some() && !is_active,
            is_active,
            days_remaining,
            active,
        })
    }

    /// Change notifications for this store
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.db.subscribe()
    }

    fn load(&self) -> Result<Vec<Cycle>> {
        let _lock = self.db.read_lock()?;
        self.db.cycle_table().load()
    }
}
