//! Canonical records every other module works with. Remote JSON is mapped
//! onto these at the accessor boundary and never travels further.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::PaymoError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub client_id: Option<u64>,
    pub client_name: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub name: String,
    pub project_id: u64,
    pub billable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: u64,
    pub task_id: u64,
    pub project_id: Option<u64>,
    pub date: NaiveDate,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_hours: f64,
    pub description: String,
    pub billed: bool,
    pub invoice_item_id: Option<u64>,
}

impl TimeEntry {
    /// Export order: start timestamp, falling back to midnight UTC of the
    /// entry date, then entry id.
    pub fn sort_key(&self) -> (DateTime<Utc>, u64) {
        let start = self
            .start_time
            .unwrap_or_else(|| self.date.and_time(chrono::NaiveTime::MIN).and_utc());
        (start, self.id)
    }
}

/// A time entry together with the display name of its task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEntry {
    #[serde(flatten)]
    pub entry: TimeEntry,
    pub task_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Viewed,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Viewed => "viewed",
            Self::Paid => "paid",
        }
    }

    /// Sent to the client but not yet paid.
    pub fn is_outstanding(self) -> bool {
        matches!(self, Self::Sent | Self::Viewed)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = PaymoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "sent" => Ok(Self::Sent),
            "viewed" => Ok(Self::Viewed),
            "paid" => Ok(Self::Paid),
            other => Err(PaymoError::validation(format!(
                "unknown invoice status '{other}' (expected draft, sent, viewed or paid)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    pub id: u64,
    pub description: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: u64,
    pub number: String,
    pub client_id: Option<u64>,
    pub client_name: Option<String>,
    pub status: InvoiceStatus,
    pub amount: f64,
    pub date: Option<NaiveDate>,
    pub line_items: Vec<InvoiceLineItem>,
}

impl Invoice {
    pub fn display_number(&self) -> String {
        if self.number.trim().is_empty() {
            format!("INV-{}", self.id)
        } else {
            self.number.clone()
        }
    }
}
