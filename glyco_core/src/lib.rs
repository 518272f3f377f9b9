#![forbid(unsafe_code)]

//! Core domain model and storage for the Glyco glucose tracker.
//!
//! This crate provides:
//! - Domain types (cycles, entries, nutrition estimates)
//! - Persistence (cycle snapshot, entries log, change notifications)
//! - Cycle and entry management
//! - Sensor data import (CSV, JSON)
//! - Meal classification and post-meal reminders

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod wal;
pub mod snapshot;
pub mod store;
pub mod cycles;
pub mod entries;
pub mod import;
pub mod classifier;
pub mod gemini;
pub mod notify;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use store::{Database, StoreEvent};
pub use cycles::{CycleManager, CycleOverview};
pub use entries::{EntryStore, ImportSummary};
pub use import::ImportFormat;
pub use classifier::{MealClassifier, RetryPolicy, TextGenerator};
pub use gemini::GeminiClient;
pub use notify::{NotificationPlatform, NotificationScheduler, Permission, ReminderNotification};
