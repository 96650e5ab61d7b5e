use chrono::NaiveDate;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::{
    error::{PaymoError, Result},
    helpers::client::PaymoClient,
    models::{
        batch::NewEntry,
        paymo::{PaymoEntry, PaymoInvoice, PaymoProject, PaymoTask, from_envelope},
        timesheet::{Invoice, InvoiceStatus, Project, Task, TimeEntry},
    },
};

/// Narrowing parameters for entry listings. Every field is both sent to
/// Paymo and re-checked locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub project_id: Option<u64>,
    pub task_id: Option<u64>,
    pub billed: Option<bool>,
}

impl EntryFilter {
    pub fn between(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(PaymoError::validation(format!(
                "end date {end} is before start date {start}"
            )));
        }
        Ok(Self {
            start: Some(start),
            end: Some(end),
            ..Self::default()
        })
    }

    /// Parse `YYYY-MM-DD` bounds as given on the command line or by a tool.
    pub fn parse_range(start: &str, end: &str) -> Result<Self> {
        Self::between(utils::parse_date("start", start)?, utils::parse_date("end", end)?)
    }

    pub fn with_project(mut self, project_id: Option<u64>) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn with_billed(mut self, billed: Option<bool>) -> Self {
        self.billed = billed;
        self
    }

    pub fn matches(&self, entry: &TimeEntry) -> bool {
        self.start.is_none_or(|start| entry.date >= start)
            && self.end.is_none_or(|end| entry.date <= end)
            && self.project_id.is_none_or(|id| entry.project_id == Some(id))
            && self.task_id.is_none_or(|id| entry.task_id == id)
            && self.billed.is_none_or(|billed| entry.billed == billed)
    }

    fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if end < start {
                return Err(PaymoError::validation(format!(
                    "end date {end} is before start date {start}"
                )));
            }
        }
        if let Some(id) = self.project_id {
            utils::require_id("project_id", id)?;
        }
        if let Some(id) = self.task_id {
            utils::require_id("task_id", id)?;
        }
        Ok(())
    }

    fn where_clause(&self) -> Option<String> {
        let mut clauses = Vec::new();
        if let (Some(start), Some(end)) = (self.start, self.end) {
            clauses.push(format!(
                r#"time_interval in ("{start}T00:00:00Z","{end}T23:59:59Z")"#
            ));
        }
        if let Some(id) = self.project_id {
            clauses.push(format!("project_id={id}"));
        }
        if let Some(id) = self.task_id {
            clauses.push(format!("task_id={id}"));
        }
        if let Some(billed) = self.billed {
            clauses.push(format!("billed={billed}"));
        }
        utils::join_where(clauses)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceFilter {
    pub client_id: Option<u64>,
    pub status: Option<InvoiceStatus>,
}

impl InvoiceFilter {
    pub fn matches(&self, invoice: &Invoice) -> bool {
        self.client_id.is_none_or(|id| invoice.client_id == Some(id))
            && self.status.is_none_or(|status| invoice.status == status)
    }

    fn where_clause(&self) -> Option<String> {
        let mut clauses = Vec::new();
        if let Some(id) = self.client_id {
            clauses.push(format!("client_id={id}"));
        }
        if let Some(status) = self.status {
            clauses.push(format!("status={status}"));
        }
        utils::join_where(clauses)
    }
}

pub async fn list_projects(client: &PaymoClient, active_only: bool) -> Result<Vec<Project>> {
    info!("Listing Paymo projects (active only: {})", active_only);

    let query = if active_only {
        vec![("where", "active=true".to_string())]
    } else {
        Vec::new()
    };
    let body = client.get("projects", &query).await?;

    let projects: Vec<Project> = from_envelope::<PaymoProject>(body, "projects")?
        .into_iter()
        .map(Project::from)
        .filter(|p| !active_only || p.active)
        .collect();

    info!("Fetched {} projects", projects.len());
    Ok(projects)
}

pub async fn list_tasks(client: &PaymoClient, project_id: Option<u64>) -> Result<Vec<Task>> {
    let mut query = Vec::new();
    if let Some(id) = project_id {
        utils::require_id("project_id", id)?;
        query.push(("where", format!("project_id={id}")));
    }
    info!("Listing Paymo tasks (project: {:?})", project_id);

    let body = client.get("tasks", &query).await?;
    let tasks = from_envelope::<PaymoTask>(body, "tasks")?
        .into_iter()
        .map(Task::try_from)
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .filter(|t| project_id.is_none_or(|id| t.project_id == id))
        .collect::<Vec<_>>();

    info!("Fetched {} tasks", tasks.len());
    Ok(tasks)
}

pub async fn get_task(client: &PaymoClient, task_id: u64) -> Result<Task> {
    utils::require_id("task_id", task_id)?;

    let body = client.get(&format!("tasks/{task_id}"), &[]).await?;
    from_envelope::<PaymoTask>(body, "tasks")?
        .into_iter()
        .next()
        .ok_or_else(|| PaymoError::not_found(format!("task {task_id}")))
        .and_then(Task::try_from)
}

/// List entries matching `filter`, following pages when the client has a
/// page size configured.
pub async fn list_entries(client: &PaymoClient, filter: &EntryFilter) -> Result<Vec<TimeEntry>> {
    filter.validate()?;
    info!("Listing Paymo entries with {:?}", filter);

    let mut query = Vec::new();
    if let Some(clause) = filter.where_clause() {
        query.push(("where", clause));
    }

    let raw = match client.page_size() {
        None => from_envelope::<PaymoEntry>(client.get("entries", &query).await?, "entries")?,
        Some(page_size) => fetch_entry_pages(client, &query, page_size).await?,
    };

    let fetched = raw.len();
    let entries = raw
        .into_iter()
        .map(TimeEntry::try_from)
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .filter(|e| filter.matches(e))
        .collect::<Vec<_>>();

    info!("Fetched {} entries, {} match the filter", fetched, entries.len());
    Ok(entries)
}

async fn fetch_entry_pages(
    client: &PaymoClient,
    query: &[(&str, String)],
    page_size: u32,
) -> Result<Vec<PaymoEntry>> {
    let mut all = Vec::new();
    let mut seen = BTreeSet::new();
    let mut page = 1u32;

    loop {
        let mut paged = query.to_vec();
        paged.push(("page", page.to_string()));
        paged.push(("page_size", page_size.to_string()));

        let batch = from_envelope::<PaymoEntry>(client.get("entries", &paged).await?, "entries")?;
        let received = batch.len();
        let mut fresh = 0;
        for entry in batch {
            if seen.insert(entry.id) {
                fresh += 1;
                all.push(entry);
            }
        }

        if received < page_size as usize {
            break;
        }
        if fresh == 0 {
            warn!("Paymo repeated page {} of entries, assuming pagination is unsupported", page);
            break;
        }
        page += 1;
    }

    Ok(all)
}

/// Invoices matching `filter`. Records whose status is missing or outside
/// draft, sent, viewed and paid are skipped with a warning.
pub async fn list_invoices(client: &PaymoClient, filter: &InvoiceFilter) -> Result<Vec<Invoice>> {
    if let Some(id) = filter.client_id {
        utils::require_id("client_id", id)?;
    }
    info!("Listing Paymo invoices with {:?}", filter);

    let mut query = Vec::new();
    if let Some(clause) = filter.where_clause() {
        query.push(("where", clause));
    }

    let body = client.get("invoices", &query).await?;
    let invoices = from_envelope::<PaymoInvoice>(body, "invoices")?
        .into_iter()
        .filter_map(|raw| match Invoice::try_from(raw) {
            Ok(invoice) => Some(invoice),
            Err(e) => {
                warn!("Skipping invoice: {}", e);
                None
            }
        })
        .filter(|i| filter.matches(i))
        .collect::<Vec<_>>();

    info!("Fetched {} invoices", invoices.len());
    Ok(invoices)
}

/// Fetch one invoice together with its line items.
pub async fn get_invoice(client: &PaymoClient, invoice_id: u64) -> Result<Invoice> {
    utils::require_id("invoice_id", invoice_id)?;
    info!("Fetching invoice {} with line items", invoice_id);

    let body = client
        .get(
            &format!("invoices/{invoice_id}"),
            &[("include", "invoiceitems".to_string())],
        )
        .await
        .map_err(|e| match e {
            PaymoError::NotFound(_) => PaymoError::not_found(format!("invoice {invoice_id}")),
            other => other,
        })?;

    from_envelope::<PaymoInvoice>(body, "invoices")?
        .into_iter()
        .next()
        .ok_or_else(|| PaymoError::not_found(format!("invoice {invoice_id}")))
        .and_then(Invoice::try_from)
}

/// Sent or viewed invoices dated on or after `since`.
pub async fn outstanding_invoices(client: &PaymoClient, since: NaiveDate) -> Result<Vec<Invoice>> {
    let invoices = list_invoices(client, &InvoiceFilter::default()).await?;
    Ok(invoices
        .into_iter()
        .filter(|i| i.status.is_outstanding() && i.date.is_some_and(|d| d >= since))
        .collect())
}

pub async fn create_entry(client: &PaymoClient, entry: &NewEntry) -> Result<TimeEntry> {
    utils::validate_new_entry(entry)?;
    info!(
        "Creating entry on task {} for {} ({:.2}h)",
        entry.task_id, entry.date, entry.duration_hours
    );

    let body = client.post("entries", &utils::entry_payload(entry)).await?;
    from_envelope::<PaymoEntry>(body, "entries")?
        .into_iter()
        .next()
        .ok_or_else(|| PaymoError::decode("entry creation returned no entry"))
        .and_then(TimeEntry::try_from)
}

pub async fn delete_entry(client: &PaymoClient, entry_id: u64) -> Result<()> {
    utils::require_id("entry_id", entry_id)?;
    info!("Deleting entry {}", entry_id);
    client.delete(&format!("entries/{entry_id}")).await?;
    Ok(())
}

/// First active project whose name contains `name`, ignoring case.
pub async fn find_project_by_name(client: &PaymoClient, name: &str) -> Result<Option<Project>> {
    let needle = name.to_lowercase();
    Ok(list_projects(client, true)
        .await?
        .into_iter()
        .find(|p| p.name.to_lowercase().contains(&needle)))
}

pub async fn find_task_by_name(
    client: &PaymoClient,
    project_id: u64,
    name: &str,
) -> Result<Option<Task>> {
    let needle = name.to_lowercase();
    Ok(list_tasks(client, Some(project_id))
        .await?
        .into_iter()
        .find(|t| t.name.to_lowercase().contains(&needle)))
}

pub mod utils {
    use super::*;

    const UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn parse_date(field: &str, raw: &str) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
            PaymoError::validation(format!("{field} '{raw}' is not a YYYY-MM-DD date: {e}"))
        })
    }

    pub fn require_id(field: &str, id: u64) -> Result<u64> {
        if id == 0 {
            return Err(PaymoError::validation(format!("{field} must be a positive id")));
        }
        Ok(id)
    }

    pub fn validate_hours(hours: f64) -> Result<f64> {
        if !hours.is_finite() || hours <= 0.0 {
            return Err(PaymoError::validation(format!(
                "duration must be a positive number of hours, got {hours}"
            )));
        }
        Ok(hours)
    }

    pub(super) fn join_where(clauses: Vec<String>) -> Option<String> {
        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" and "))
        }
    }

    pub(super) fn validate_new_entry(entry: &NewEntry) -> Result<()> {
        require_id("task_id", entry.task_id)?;
        validate_hours(entry.duration_hours)?;
        if let Some(interval) = &entry.interval {
            if interval.end <= interval.start {
                return Err(PaymoError::validation("end time must be after start time"));
            }
        }
        Ok(())
    }

    /// Request body for `POST entries`: either the UTC interval, or the
    /// date plus whole seconds.
    pub fn entry_payload(entry: &NewEntry) -> Value {
        let mut payload = json!({
            "task_id": entry.task_id,
            "description": entry.description,
        });

        match &entry.interval {
            Some(interval) => {
                payload["start_time"] = json!(interval.start.format(UTC_FORMAT).to_string());
                payload["end_time"] = json!(interval.end.format(UTC_FORMAT).to_string());
            }
            None => {
                payload["date"] = json!(entry.date.to_string());
                payload["duration"] = json!((entry.duration_hours * 3600.0).round() as u64);
            }
        }

        if let Some(billed) = entry.billed {
            payload["billed"] = json!(billed);
        }

        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::batch::EntryInterval;
    use pretty_assertions::assert_eq;

    fn entry(project_id: Option<u64>, billed: bool, date: &str) -> TimeEntry {
        TimeEntry {
            id: 1,
            task_id: 2,
            project_id,
            date: date.parse().unwrap(),
            start_time: None,
            end_time: None,
            duration_hours: 1.0,
            description: String::new(),
            billed,
            invoice_item_id: None,
        }
    }

    #[test]
    fn filter_requires_every_predicate() {
        let filter = EntryFilter::parse_range("2024-01-01", "2024-01-31")
            .unwrap()
            .with_project(Some(4))
            .with_billed(Some(false));

        assert!(filter.matches(&entry(Some(4), false, "2024-01-10")));
        assert!(!filter.matches(&entry(Some(4), true, "2024-01-10")));
        assert!(!filter.matches(&entry(Some(5), false, "2024-01-10")));
        assert!(!filter.matches(&entry(None, false, "2024-01-10")));
        assert!(!filter.matches(&entry(Some(4), false, "2024-02-01")));
    }

    #[test]
    fn where_clause_joins_with_and() {
        let filter = EntryFilter::parse_range("2024-01-01", "2024-01-31")
            .unwrap()
            .with_billed(Some(true));
        assert_eq!(
            filter.where_clause().unwrap(),
            r#"time_interval in ("2024-01-01T00:00:00Z","2024-01-31T23:59:59Z") and billed=true"#
        );
        assert_eq!(EntryFilter::default().where_clause(), None);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = EntryFilter::parse_range("2024-02-01", "2024-01-01").unwrap_err();
        assert!(matches!(err, PaymoError::Validation(_)));
        assert!(EntryFilter::parse_range("2024-13-01", "2024-12-01").is_err());
    }

    #[test]
    fn duration_payload_uses_whole_seconds() {
        let new = NewEntry {
            task_id: 8,
            date: "2024-03-04".parse().unwrap(),
            duration_hours: 1.25,
            interval: None,
            description: "Review".into(),
            billed: None,
        };
        assert_eq!(
            utils::entry_payload(&new),
            json!({"task_id": 8, "description": "Review", "date": "2024-03-04", "duration": 4500})
        );
    }

    #[test]
    fn interval_payload_sends_utc_times() {
        let new = NewEntry {
            task_id: 8,
            date: "2024-03-04".parse().unwrap(),
            duration_hours: 1.5,
            interval: Some(EntryInterval {
                start: "2024-03-04T15:00:00Z".parse().unwrap(),
                end: "2024-03-04T16:30:00Z".parse().unwrap(),
            }),
            description: "Call".into(),
            billed: Some(false),
        };
        assert_eq!(
            utils::entry_payload(&new),
            json!({
                "task_id": 8,
                "description": "Call",
                "start_time": "2024-03-04T15:00:00Z",
                "end_time": "2024-03-04T16:30:00Z",
                "billed": false
            })
        );
    }

    #[test]
    fn zero_hours_fail_validation() {
        assert!(utils::validate_hours(0.0).is_err());
        assert!(utils::validate_hours(f64::NAN).is_err());
        assert_eq!(utils::validate_hours(0.5).unwrap(), 0.5);
    }
}
