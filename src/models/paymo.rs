// Wire shapes of the Paymo REST API. Field names drift between endpoints
// and API versions, so aliases cover the variants we have seen.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use regex::Regex;
use serde_json::Value;
use std::{convert::TryFrom, sync::LazyLock};

use crate::{
    error::{PaymoError, Result},
    models::timesheet::{Invoice, InvoiceLineItem, InvoiceStatus, Project, Task, TimeEntry},
};

#[derive(Serialize, Deserialize, Debug)]
pub struct PaymoProject {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub client_id: Option<u64>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PaymoTask {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub project_id: Option<u64>,
    #[serde(default)]
    pub billable: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PaymoEntry {
    pub id: u64,
    pub task_id: Option<u64>,
    #[serde(default)]
    pub project_id: Option<u64>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub billed: Option<bool>,
    #[serde(default)]
    pub invoice_item_id: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PaymoInvoiceItem {
    pub id: u64,
    #[serde(default, alias = "item")]
    pub description: Option<String>,
    #[serde(default, alias = "price")]
    pub amount: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PaymoInvoice {
    pub id: u64,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub client_id: Option<u64>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "amount")]
    pub total: Option<f64>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, alias = "items", alias = "invoice_items")]
    pub invoiceitems: Vec<PaymoInvoiceItem>,
}

/// Pull the record list out of a `{"<resource>": [...]}` envelope. A missing
/// key means no records.
pub fn from_envelope<T: DeserializeOwned>(mut body: Value, resource: &str) -> Result<Vec<T>> {
    let records = match body.get_mut(resource) {
        Some(records) => records.take(),
        None => return Ok(Vec::new()),
    };
    serde_json::from_value(records)
        .map_err(|e| PaymoError::decode(format!("malformed '{resource}' records: {e}")))
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc()))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").map(|dt| dt.and_utc()))
        .ok()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), "%Y-%m-%d").ok()
}

static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Entry descriptions come back as rich text. Drop complete tags, decode
/// HTML entities, trim.
pub fn clean_description(raw: &str) -> String {
    let text = TAG_REGEX.replace_all(raw, "");
    html_escape::decode_html_entities(&text).trim().to_string()
}

impl From<PaymoProject> for Project {
    fn from(raw: PaymoProject) -> Self {
        Project {
            id: raw.id,
            name: raw.name,
            client_id: raw.client_id,
            client_name: raw.client_name,
            active: raw.active.unwrap_or(true),
        }
    }
}

impl TryFrom<PaymoTask> for Task {
    type Error = PaymoError;

    fn try_from(raw: PaymoTask) -> Result<Self> {
        let project_id = raw
            .project_id
            .ok_or_else(|| PaymoError::decode(format!("task {} has no project_id", raw.id)))?;

        Ok(Task {
            id: raw.id,
            name: raw.name,
            project_id,
            billable: raw.billable.unwrap_or(false),
        })
    }
}

impl TryFrom<PaymoEntry> for TimeEntry {
    type Error = PaymoError;

    fn try_from(raw: PaymoEntry) -> Result<Self> {
        let id = raw.id;
        let task_id = raw
            .task_id
            .ok_or_else(|| PaymoError::decode(format!("entry {id} has no task_id")))?;

        let start_time = match raw.start_time.as_deref().filter(|s| !s.is_empty()) {
            Some(s) => Some(parse_timestamp(s).ok_or_else(|| {
                PaymoError::decode(format!("entry {id} has invalid start_time '{s}'"))
            })?),
            None => None,
        };
        let end_time = match raw.end_time.as_deref().filter(|s| !s.is_empty()) {
            Some(s) => Some(parse_timestamp(s).ok_or_else(|| {
                PaymoError::decode(format!("entry {id} has invalid end_time '{s}'"))
            })?),
            None => None,
        };

        let date = raw
            .date
            .as_deref()
            .and_then(parse_date)
            .or_else(|| start_time.map(|s| s.date_naive()))
            .ok_or_else(|| {
                PaymoError::decode(format!("entry {id} has neither date nor start_time"))
            })?;

        let duration_hours = match (raw.duration, start_time, end_time) {
            (Some(seconds), _, _) if seconds > 0.0 => seconds / 3600.0,
            (_, Some(start), Some(end)) => (end - start).num_seconds() as f64 / 3600.0,
            _ => 0.0,
        };

        Ok(TimeEntry {
            id,
            task_id,
            project_id: raw.project_id,
            date,
            start_time,
            end_time,
            duration_hours,
            description: raw.description.as_deref().map(clean_description).unwrap_or_default(),
            billed: raw.billed.unwrap_or(false),
            invoice_item_id: raw.invoice_item_id,
        })
    }
}

impl From<PaymoInvoiceItem> for InvoiceLineItem {
    fn from(raw: PaymoInvoiceItem) -> Self {
        InvoiceLineItem {
            id: raw.id,
            description: raw.description.unwrap_or_default(),
            amount: raw.amount.unwrap_or(0.0),
        }
    }
}

impl TryFrom<PaymoInvoice> for Invoice {
    type Error = PaymoError;

    fn try_from(raw: PaymoInvoice) -> Result<Self> {
        let id = raw.id;
        let status = raw
            .status
            .as_deref()
            .ok_or_else(|| PaymoError::decode(format!("invoice {id} has no status")))?
            .parse::<InvoiceStatus>()
            .map_err(|e| PaymoError::decode(format!("invoice {id}: {e}")))?;

        let date = match raw.date.as_deref().filter(|s| !s.is_empty()) {
            Some(s) => Some(parse_date(s).ok_or_else(|| {
                PaymoError::decode(format!("invoice {id} has invalid date '{s}'"))
            })?),
            None => None,
        };

        Ok(Invoice {
            id,
            number: raw.number.unwrap_or_default(),
            client_id: raw.client_id,
            client_name: raw.client_name,
            status,
            amount: raw.total.unwrap_or(0.0),
            date,
            line_items: raw.invoiceitems.into_iter().map(InvoiceLineItem::from).collect(),
        })
    }
}
