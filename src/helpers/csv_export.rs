use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{error, info};

use crate::{
    error::Result,
    models::timesheet::{EnrichedEntry, Invoice},
};

/// One CSV row. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimesheetRow {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Start Time")]
    pub start_time: String,
    #[serde(rename = "End Time")]
    pub end_time: String,
    #[serde(rename = "Duration (hours)")]
    pub duration_hours: String,
    #[serde(rename = "Task")]
    pub task: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Billed")]
    pub billed: String,
    #[serde(rename = "Entry ID")]
    pub entry_id: u64,
}

fn iso_utc(timestamp: Option<DateTime<Utc>>) -> String {
    timestamp
        .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}

impl From<&EnrichedEntry> for TimesheetRow {
    fn from(enriched: &EnrichedEntry) -> Self {
        let entry = &enriched.entry;
        TimesheetRow {
            date: entry.date.to_string(),
            start_time: iso_utc(entry.start_time),
            end_time: iso_utc(entry.end_time),
            duration_hours: format!("{:.2}", entry.duration_hours),
            task: enriched.task_name.clone(),
            description: entry.description.clone(),
            billed: if entry.billed { "Yes" } else { "No" }.to_string(),
            entry_id: entry.id,
        }
    }
}

/// Write `entries` in the order given. The header is written even when
/// there are no rows.
pub fn write_timesheet<W: Write>(writer: W, entries: &[EnrichedEntry]) -> Result<usize> {
    let mut csv = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv.write_record([
        "Date",
        "Start Time",
        "End Time",
        "Duration (hours)",
        "Task",
        "Description",
        "Billed",
        "Entry ID",
    ])?;
    for entry in entries {
        csv.serialize(TimesheetRow::from(entry))?;
    }
    csv.flush()?;
    Ok(entries.len())
}

/// Write the export into `dir` (created if missing) and return the path.
pub fn export_to_dir(dir: &Path, file_name: &str, entries: &[EnrichedEntry]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);

    let file = fs::File::create(&path).map_err(|e| {
        error!("Failed to create {}: {}", path.display(), e);
        e
    })?;
    let rows = write_timesheet(file, entries)?;

    info!("Exported {} rows to {}", rows, path.display());
    Ok(path)
}

pub fn invoice_file_name(invoice: &Invoice) -> String {
    let number = invoice.display_number().replace('#', "").replace('/', "-");
    format!("{}_timesheet.csv", number.trim())
}

pub fn range_file_name(start: NaiveDate, end: NaiveDate) -> String {
    format!("paymo_timesheet_{start}_{end}.csv")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::timesheet::{InvoiceStatus, TimeEntry};
    use pretty_assertions::assert_eq;

    fn enriched() -> EnrichedEntry {
        EnrichedEntry {
            entry: TimeEntry {
                id: 31,
                task_id: 2,
                project_id: Some(1),
                date: "2024-01-05".parse().unwrap(),
                start_time: Some("2024-01-05T14:00:00Z".parse().unwrap()),
                end_time: Some("2024-01-05T15:20:00Z".parse().unwrap()),
                duration_hours: 4.0 / 3.0,
                description: "Review, notes \"v2\"".into(),
                billed: true,
                invoice_item_id: Some(5),
            },
            task_name: "Research".into(),
        }
    }

    #[test]
    fn rows_follow_column_contract() {
        let mut out = Vec::new();
        write_timesheet(&mut out, &[enriched()]).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(
            text,
            "Date,Start Time,End Time,Duration (hours),Task,Description,Billed,Entry ID\n\
             2024-01-05,2024-01-05T14:00:00Z,2024-01-05T15:20:00Z,1.33,Research,\
             \"Review, notes \"\"v2\"\"\",Yes,31\n"
        );
    }

    #[test]
    fn empty_export_still_has_header() {
        let mut out = Vec::new();
        assert_eq!(write_timesheet(&mut out, &[]).unwrap(), 0);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Date,Start Time,End Time,Duration (hours),Task,Description,Billed,Entry ID\n"
        );
    }

    #[test]
    fn invoice_names_are_path_safe() {
        let mut invoice = Invoice {
            id: 12,
            number: "#2024/03".into(),
            client_id: None,
            client_name: None,
            status: InvoiceStatus::Sent,
            amount: 0.0,
            date: None,
            line_items: Vec::new(),
        };
        assert_eq!(invoice_file_name(&invoice), "2024-03_timesheet.csv");
        invoice.number.clear();
        assert_eq!(invoice_file_name(&invoice), "INV-12_timesheet.csv");
    }
}
