//! Post-meal glucose check reminders.
//!
//! The scheduler decides *whether* and *when* to remind; the platform
//! behind [`NotificationPlatform`] owns permission prompts and delivery.
//! Refused permission and delivery failures are logged and swallowed:
//! a missing reminder never fails the meal that triggered it.

use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Time between a meal and its glucose check
pub const REMINDER_DELAY_MINUTES: i64 = 120;

pub const REMINDER_TITLE: &str = "Check your Glucose";
pub const REMINDER_BODY: &str = "It has been 2 hours since your meal. Time to check your levels!";

/// Exclusive upper bound for generated notification ids
const MAX_NOTIFICATION_ID: u32 = 100_000;

/// State of a notification permission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// Not decided yet; asking will prompt the user
    Prompt,
}

/// A scheduled local notification
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderNotification {
    pub id: u32,
    pub title: String,
    pub body: String,
    pub scheduled_at: DateTime<Utc>,
}

/// Host capabilities the scheduler relies on
///
/// Native hosts answer permission requests through
/// [`request_native_permission`](Self::request_native_permission); other
/// hosts go through the web-style permission methods, which default to
/// "unsupported".
pub trait NotificationPlatform: Send + Sync {
    /// Whether the native permission API should be used
    fn is_native(&self) -> bool;

    fn request_native_permission(&self) -> impl Future<Output = Result<Permission>> + Send;

    fn web_notifications_supported(&self) -> bool {
        false
    }

    /// Current web permission without prompting
    fn web_permission(&self) -> Permission {
        Permission::Denied
    }

    fn request_web_permission(&self) -> impl Future<Output = Result<Permission>> + Send {
        async { Ok(Permission::Denied) }
    }

    /// Deliver `notification` at its `scheduled_at` instant
    fn schedule(
        &self,
        notification: &ReminderNotification,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Schedules the post-meal reminder on a platform
pub struct NotificationScheduler<P> {
    platform: P,
}

impl<P: NotificationPlatform> NotificationScheduler<P> {
    pub fn new(platform: P) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Ask for notification permission through whichever API the platform has.
    ///
    /// Errors from the platform count as a refusal.
    pub async fn request_permission(&self) -> bool {
        let outcome = if self.platform.is_native() {
            self.platform.request_native_permission().await
        } else if !self.platform.web_notifications_supported() {
            Ok(Permission::Denied)
        } else if self.platform.web_permission() == Permission::Granted {
            Ok(Permission::Granted)
        } else {
            self.platform.request_web_permission().await
        };

        match outcome {
            Ok(permission) => permission == Permission::Granted,
            Err(e) => {
                tracing::warn!("Notification permission request failed: {}", e);
                false
            }
        }
    }

    /// Remind the user to check glucose two hours after `meal_at`.
    ///
    /// Returns the scheduled notification, or `None` when the reminder
    /// would already be due, permission was refused, or delivery failed.
    pub async fn schedule_post_meal_reminder(
        &self,
        meal_at: DateTime<Utc>,
    ) -> Option<ReminderNotification> {
        self.schedule_post_meal_reminder_at(meal_at, Utc::now()).await
    }

    /// Same as [`schedule_post_meal_reminder`](Self::schedule_post_meal_reminder)
    /// with an explicit current time
    pub async fn schedule_post_meal_reminder_at(
        &self,
        meal_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<ReminderNotification> {
        match self.try_schedule(meal_at, now).await {
            Ok(scheduled) => scheduled,
            Err(Error::PermissionDenied) => {
                tracing::warn!("Notification permission denied");
                None
            }
            Err(e) => {
                tracing::error!("Failed to schedule notification: {}", e);
                None
            }
        }
    }

    async fn try_schedule(
        &self,
        meal_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<ReminderNotification>> {
        let trigger = meal_at + Duration::minutes(REMINDER_DELAY_MINUTES);
        if trigger <= now {
            tracing::debug!("Reminder for meal at {} is already due, skipping", meal_at);
            return Ok(None);
        }

        if !self.request_permission().await {
            return Err(Error::PermissionDenied);
        }

        let notification = ReminderNotification {
            id: rand::thread_rng().gen_range(0..MAX_NOTIFICATION_ID),
            title: REMINDER_TITLE.to_string(),
            body: REMINDER_BODY.to_string(),
            scheduled_at: trigger,
        };
        self.platform.schedule(&notification).await?;

        tracing::info!("Notification scheduled for {}", trigger);
        Ok(Some(notification))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FakePlatform {
        native: bool,
        native_answer: Permission,
        web_supported: bool,
        web_current: Permission,
        web_answer: Permission,
        fail_delivery: bool,
        native_requests: AtomicU32,
        web_requests: AtomicU32,
        scheduled: Mutex<Vec<ReminderNotification>>,
    }

    impl FakePlatform {
        fn native(answer: Permission) -> Self {
            Self {
                native: true,
                native_answer: answer,
                web_supported: false,
                web_current: Permission::Prompt,
                web_answer: Permission::Denied,
                fail_delivery: false,
                native_requests: AtomicU32::new(0),
                web_requests: AtomicU32::new(0),
                scheduled: Mutex::new(Vec::new()),
            }
        }

        fn web(current: Permission, answer: Permission) -> Self {
            Self {
                native: false,
                web_supported: true,
                web_current: current,
                web_answer: answer,
                ..Self::native(Permission::Denied)
            }
        }

        fn scheduled(&self) -> Vec<ReminderNotification> {
            self.scheduled.lock().unwrap().clone()
        }
    }

    impl NotificationPlatform for FakePlatform {
        fn is_native(&self) -> bool {
            self.native
        }

        async fn request_native_permission(&self) -> Result<Permission> {
            self.native_requests.fetch_add(1, Ordering::SeqCst);
            Ok(self.native_answer)
        }

        fn web_notifications_supported(&self) -> bool {
            self.web_supported
        }

        fn web_permission(&self) -> Permission {
            self.web_current
        }

        async fn request_web_permission(&self) -> Result<Permission> {
            self.web_requests.fetch_add(1, Ordering::SeqCst);
            Ok(self.web_answer)
        }

        async fn schedule(&self, notification: &ReminderNotification) -> Result<()> {
            if self.fail_delivery {
                return Err(Error::Other("scheduler offline".into()));
            }
            self.scheduled.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_schedules_two_hours_after_meal() {
        let scheduler = NotificationScheduler::new(FakePlatform::native(Permission::Granted));
        let meal_at = Utc::now();

        let scheduled = scheduler.schedule_post_meal_reminder(meal_at).await.unwrap();

        let platform = scheduler.platform();
        assert_eq!(platform.native_requests.load(Ordering::SeqCst), 1);
        assert_eq!(platform.scheduled(), vec![scheduled.clone()]);

        let delay = scheduled.scheduled_at - meal_at;
        assert!((delay - Duration::hours(2)).num_milliseconds().abs() <= 1000);
        assert_eq!(scheduled.title, REMINDER_TITLE);
        assert_eq!(scheduled.body, REMINDER_BODY);
        assert!(scheduled.id < MAX_NOTIFICATION_ID);
    }

    #[tokio::test]
    async fn test_stale_meal_is_not_scheduled() {
        let scheduler = NotificationScheduler::new(FakePlatform::native(Permission::Granted));

        let result = scheduler
            .schedule_post_meal_reminder(Utc::now() - Duration::hours(3))
            .await;

        assert!(result.is_none());
        assert!(scheduler.platform().scheduled().is_empty());
        assert_eq!(scheduler.platform().native_requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_trigger_exactly_now_is_stale() {
        let scheduler = NotificationScheduler::new(FakePlatform::native(Permission::Granted));
        let now = Utc::now();

        let result = scheduler
            .schedule_post_meal_reminder_at(now - Duration::hours(2), now)
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_denied_permission_is_silent() {
        let scheduler = NotificationScheduler::new(FakePlatform::native(Permission::Denied));

        let result = scheduler.schedule_post_meal_reminder(Utc::now()).await;

        assert!(result.is_none());
        assert!(scheduler.platform().scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_web_platform_prompts_for_permission() {
        let scheduler =
            NotificationScheduler::new(FakePlatform::web(Permission::Prompt, Permission::Granted));

        let result = scheduler.schedule_post_meal_reminder(Utc::now()).await;

        assert!(result.is_some());
        let platform = scheduler.platform();
        assert_eq!(platform.web_requests.load(Ordering::SeqCst), 1);
        assert_eq!(platform.native_requests.load(Ordering::SeqCst), 0);
        assert_eq!(platform.scheduled().len(), 1);
    }

    #[tokio::test]
    async fn test_web_permission_already_granted_skips_prompt() {
        let scheduler =
            NotificationScheduler::new(FakePlatform::web(Permission::Granted, Permission::Denied));

        assert!(scheduler.request_permission().await);
        assert_eq!(scheduler.platform().web_requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsupported_web_platform_refuses() {
        let mut platform = FakePlatform::web(Permission::Granted, Permission::Granted);
        platform.web_supported = false;
        let scheduler = NotificationScheduler::new(platform);

        assert!(scheduler.schedule_post_meal_reminder(Utc::now()).await.is_none());
        assert_eq!(scheduler.platform().web_requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let mut platform = FakePlatform::native(Permission::Granted);
        platform.fail_delivery = true;
        let scheduler = NotificationScheduler::new(platform);

        assert!(scheduler.schedule_post_meal_reminder(Utc::now()).await.is_none());
    }
}
