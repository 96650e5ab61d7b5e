use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::timesheet::TimeEntry;

/// A YAML timesheet document.
///
/// ```yaml
/// matter: acme
/// rate: 150
/// timezone: America/Chicago
/// entries:
///   - date: 2024-03-04
///     start_time: "09:00"
///     end_time: "10:30"
///     description: Kickoff call
///   - date: 2024-03-05
///     duration_hours: 2.5
///     description: Drafting
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchTimesheet {
    #[serde(default)]
    pub matter: Option<String>,
    #[serde(default)]
    pub task_id: Option<u64>,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub timezone: Option<String>,
    pub entries: Vec<BatchEntryRequest>,
}

impl BatchTimesheet {
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}

/// One caller-supplied entry. Fields stay loosely typed so a bad value
/// fails that request alone instead of the whole document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BatchEntryRequest {
    #[serde(default)]
    pub task_id: Option<u64>,
    /// `YYYY-MM-DD`
    pub date: String,
    #[serde(default)]
    pub duration_hours: Option<f64>,
    /// Local `HH:MM`
    #[serde(default)]
    pub start_time: Option<String>,
    /// Local `HH:MM`
    #[serde(default)]
    pub end_time: Option<String>,
    /// IANA name, e.g. `Europe/Berlin`
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub billed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A validated creation request in canonical date + duration form. The
/// interval is kept when the caller gave one so the remote records it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub task_id: u64,
    pub date: NaiveDate,
    pub duration_hours: f64,
    pub interval: Option<EntryInterval>,
    pub description: String,
    pub billed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchOutcome {
    Success { index: usize, entry: TimeEntry },
    Failure { index: usize, kind: String, reason: String },
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub created: usize,
    pub failed: usize,
    pub outcomes: Vec<BatchOutcome>,
}

impl From<Vec<BatchOutcome>> for BatchReport {
    fn from(outcomes: Vec<BatchOutcome>) -> Self {
        let created = outcomes.iter().filter(|o| o.is_success()).count();
        BatchReport {
            created,
            failed: outcomes.len() - created,
            outcomes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewRow {
    pub date: String,
    /// `09:00-10:30`, or empty for duration-only rows.
    pub time_range: String,
    pub hours: Option<f64>,
    pub description: String,
    /// Set when the row would be rejected on submit.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPreview {
    pub matter: Option<String>,
    pub rows: Vec<PreviewRow>,
    pub total_hours: f64,
    pub total_billing: Option<f64>,
}
