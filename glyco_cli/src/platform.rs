//! Local reminder queue backing the CLI's notification platform.

use chrono::{DateTime, Utc};
use glyco_core::wal::JsonlLog;
use glyco_core::{NotificationPlatform, Permission, ReminderNotification, Result};
use std::path::Path;

pub const REMINDERS_FILE: &str = "reminders.jsonl";

/// Reminders are appended to `reminders.jsonl` in the data directory.
/// Permission follows `notifications.enabled` in the config.
pub struct ReminderQueue {
    log: JsonlLog,
    enabled: bool,
}

impl ReminderQueue {
    pub fn new(data_dir: &Path, enabled: bool) -> Self {
        Self {
            log: JsonlLog::new(data_dir.join(REMINDERS_FILE)),
            enabled,
        }
    }

    /// Reminders still due after `now`, soonest first
    pub fn pending(&self, now: DateTime<Utc>) -> Result<Vec<ReminderNotification>> {
        let mut pending: Vec<ReminderNotification> = self
            .log
            .read_all::<ReminderNotification>()?
            .into_iter()
            .filter(|r| r.scheduled_at > now)
            .collect();
        pending.sort_by_key(|r| r.scheduled_at);
        Ok(pending)
    }
}

impl NotificationPlatform for ReminderQueue {
    fn is_native(&self) -> bool {
        true
    }

    async fn request_native_permission(&self) -> Result<Permission> {
        Ok(if self.enabled {
            Permission::Granted
        } else {
            Permission::Denied
        })
    }

    async fn schedule(&self, notification: &ReminderNotification) -> Result<()> {
        self.log.append(notification)?;
        tracing::debug!("Queued reminder {} in {:?}", notification.id, self.log.path());
        Ok(())
    }
}
