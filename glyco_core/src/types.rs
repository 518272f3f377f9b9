//! Core domain types for the Glyco system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Cycles and their lifecycle status
//! - Entries (glucose readings and meals) with typed metadata
//! - Normalized import records
//! - Nutrition estimates returned by the meal classifier

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

// ============================================================================
// Cycle Types
// ============================================================================

/// Lifecycle status of a monitoring cycle
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Active,
    Closed,
}

/// A 14-day monitoring period
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    pub id: Uuid,
    pub start_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: CycleStatus,
}

// ============================================================================
// Entry Types
// ============================================================================

/// Kind of observation stored in an entry
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Bg,
    Meal,
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryType::Bg => write!(f, "bg"),
            EntryType::Meal => write!(f, "meal"),
        }
    }
}

impl FromStr for EntryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bg" | "glucose" => Ok(EntryType::Bg),
            "meal" => Ok(EntryType::Meal),
            other => Err(Error::Other(format!("Unknown entry type: {}", other))),
        }
    }
}

/// Stored content: a numeric reading for `bg`, a short label for `meal`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EntryContent {
    Value(f64),
    Label(String),
}

impl EntryContent {
    /// The entry type this content shape belongs to
    pub fn entry_type(&self) -> EntryType {
        match self {
            EntryContent::Value(_) => EntryType::Bg,
            EntryContent::Label(_) => EntryType::Meal,
        }
    }
}

impl fmt::Display for EntryContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryContent::Value(v) => write!(f, "{}", v),
            EntryContent::Label(s) => write!(f, "{}", s),
        }
    }
}

/// Blood glucose measurement unit
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum GlucoseUnit {
    #[default]
    #[serde(rename = "mg/dL")]
    MgDl,
    #[serde(rename = "mmol/L")]
    MmolL,
}

impl fmt::Display for GlucoseUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlucoseUnit::MgDl => write!(f, "mg/dL"),
            GlucoseUnit::MmolL => write!(f, "mmol/L"),
        }
    }
}

impl FromStr for GlucoseUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(' ', "").as_str() {
            "mg/dl" | "mgdl" => Ok(GlucoseUnit::MgDl),
            "mmol/l" | "mmol" => Ok(GlucoseUnit::MmolL),
            other => Err(Error::Other(format!("Unknown glucose unit: {}", other))),
        }
    }
}

/// Where a glucose reading came from
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    #[default]
    Manual,
    Import,
}

/// Per-type entry metadata
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EntryMetadata {
    Bg {
        unit: GlucoseUnit,
        #[serde(default)]
        source: EntrySource,
    },
    Meal {
        calories: f64,
        carbs: f64,
        protein: f64,
        fat: f64,
        original_description: String,
    },
}

impl EntryMetadata {
    /// The entry type this metadata shape belongs to
    pub fn entry_type(&self) -> EntryType {
        match self {
            EntryMetadata::Bg { .. } => EntryType::Bg,
            EntryMetadata::Meal { .. } => EntryType::Meal,
        }
    }

    /// Meal metadata built from a classifier estimate
    pub fn from_estimate(estimate: &NutritionEstimate, original_description: &str) -> Self {
        EntryMetadata::Meal {
            calories: estimate.calories,
            carbs: estimate.carbs,
            protein: estimate.protein,
            fat: estimate.fat,
            original_description: original_description.to_string(),
        }
    }
}

/// A stored observation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub content: EntryContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EntryMetadata>,
}

/// An entry that has not been stored yet (no identifier assigned)
#[derive(Clone, Debug, PartialEq)]
pub struct NewEntry {
    pub cycle_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub entry_type: EntryType,
    pub content: EntryContent,
    pub metadata: Option<EntryMetadata>,
}

impl NewEntry {
    /// A glucose reading
    pub fn glucose(
        cycle_id: Uuid,
        timestamp: DateTime<Utc>,
        value: f64,
        unit: GlucoseUnit,
        source: EntrySource,
    ) -> Self {
        Self {
            cycle_id,
            timestamp,
            entry_type: EntryType::Bg,
            content: EntryContent::Value(value),
            metadata: Some(EntryMetadata::Bg { unit, source }),
        }
    }

    /// A meal with an optional nutrition breakdown
    pub fn meal(
        cycle_id: Uuid,
        timestamp: DateTime<Utc>,
        label: impl Into<String>,
        metadata: Option<EntryMetadata>,
    ) -> Self {
        Self {
            cycle_id,
            timestamp,
            entry_type: EntryType::Meal,
            content: EntryContent::Label(label.into()),
            metadata,
        }
    }

    /// Check that content and metadata agree with the declared type
    pub fn validate(&self) -> crate::Result<()> {
        if self.content.entry_type() != self.entry_type {
            return Err(Error::InvalidEntry(format!(
                "{} entry cannot hold content {:?}",
                self.entry_type, self.content
            )));
        }
        if let Some(meta) = &self.metadata {
            if meta.entry_type() != self.entry_type {
                return Err(Error::InvalidEntry(format!(
                    "{} entry cannot carry {} metadata",
                    self.entry_type,
                    meta.entry_type()
                )));
            }
        }
        if let EntryContent::Value(v) = self.content {
            if !v.is_finite() {
                return Err(Error::InvalidEntry(format!("non-finite reading {}", v)));
            }
        }
        Ok(())
    }

    /// Assign an identifier, producing the stored form
    pub(crate) fn into_entry(self, id: Uuid) -> Entry {
        Entry {
            id,
            cycle_id: self.cycle_id,
            timestamp: self.timestamp,
            entry_type: self.entry_type,
            content: self.content,
            metadata: self.metadata,
        }
    }
}

// ============================================================================
// Import Types
// ============================================================================

/// A `{timestamp, value}` pair produced by the import parser
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NormalizedRecord {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

// ============================================================================
// Classification Types
// ============================================================================

/// Classifier confidence in its estimate
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Confidence {
    High,
    Medium,
    Low,
    Unknown,
}

impl From<String> for Confidence {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => Confidence::High,
            "medium" => Confidence::Medium,
            "low" => Confidence::Low,
            _ => Confidence::Unknown,
        }
    }
}

/// Structured nutrition estimate for a meal description
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NutritionEstimate {
    pub name: String,
    pub calories: f64,
    pub carbs: f64,
    pub protein: f64,
    pub fat: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
}
