use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, error, info, warn};

use crate::{
    config::PaymoConfig,
    error::{PaymoError, Result},
    helpers::{
        client::PaymoClient,
        paymo::{self, utils},
    },
    models::batch::{
        BatchEntryRequest, BatchOutcome, BatchPreview, BatchTimesheet, EntryInterval, NewEntry,
        PreviewRow,
    },
};

/// Values a request falls back to when it does not carry its own.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchDefaults {
    pub task_id: Option<u64>,
    pub timezone: Tz,
}

impl BatchDefaults {
    pub fn new(task_id: Option<u64>, timezone: Tz) -> Self {
        Self { task_id, timezone }
    }
}

pub fn parse_timezone(raw: &str) -> Result<Tz> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|_| PaymoError::validation(format!("unknown timezone '{raw}'")))
}

fn parse_clock(field: &str, raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .map_err(|_| PaymoError::validation(format!("{field} '{raw}' is not an HH:MM time")))
}

fn localize(date: NaiveDate, time: NaiveTime, tz: Tz) -> Result<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| {
            PaymoError::validation(format!("{date} {time} does not exist in {tz}"))
        })
}

/// Date, hours and optional UTC interval of a request, without looking at
/// its task. An explicit duration takes precedence over start and end times.
fn resolve_timing(
    request: &BatchEntryRequest,
    default_tz: Tz,
) -> Result<(NaiveDate, f64, Option<EntryInterval>)> {
    let date = utils::parse_date("date", &request.date)?;

    match (
        request.duration_hours,
        request.start_time.as_deref(),
        request.end_time.as_deref(),
    ) {
        (Some(hours), start, end) => {
            if start.is_some() || end.is_some() {
                debug!("Entry on {} has an explicit duration, ignoring its times", date);
            }
            Ok((date, utils::validate_hours(hours)?, None))
        }
        (None, Some(start), Some(end)) => {
            let tz = match request.timezone.as_deref() {
                Some(raw) => parse_timezone(raw)?,
                None => default_tz,
            };
            let start = localize(date, parse_clock("start_time", start)?, tz)?;
            let end = localize(date, parse_clock("end_time", end)?, tz)?;
            if end <= start {
                return Err(PaymoError::validation(format!(
                    "end time must be after start time on {date}"
                )));
            }
            let hours = (end - start).num_seconds() as f64 / 3600.0;
            Ok((date, hours, Some(EntryInterval { start, end })))
        }
        _ => Err(PaymoError::validation(format!(
            "entry on {} needs either duration_hours or both start_time and end_time",
            request.date
        ))),
    }
}

/// Validate one request and bring it into canonical date + duration form.
pub fn normalize(request: &BatchEntryRequest, defaults: &BatchDefaults) -> Result<NewEntry> {
    let task_id = request
        .task_id
        .or(defaults.task_id)
        .ok_or_else(|| {
            PaymoError::validation(format!("entry on {} has no task_id", request.date))
        })?;
    utils::require_id("task_id", task_id)?;

    let (date, duration_hours, interval) = resolve_timing(request, defaults.timezone)?;

    Ok(NewEntry {
        task_id,
        date,
        duration_hours,
        interval,
        description: request.description.clone().unwrap_or_default(),
        billed: request.billed,
    })
}

/// Summarize a document without touching the network.
pub fn preview(document: &BatchTimesheet, default_tz: Tz) -> BatchPreview {
    let mut total_hours = 0.0;

    let rows = document
        .entries
        .iter()
        .map(|request| {
            let time_range = match (&request.start_time, &request.end_time) {
                (Some(start), Some(end)) => format!("{start}-{end}"),
                _ => String::new(),
            };
            let description = request.description.clone().unwrap_or_default();

            match resolve_timing(request, default_tz) {
                Ok((_, hours, _)) => {
                    total_hours += hours;
                    PreviewRow {
                        date: request.date.clone(),
                        time_range,
                        hours: Some(hours),
                        description,
                        error: None,
                    }
                }
                Err(e) => PreviewRow {
                    date: request.date.clone(),
                    time_range,
                    hours: None,
                    description,
                    error: Some(e.to_string()),
                },
            }
        })
        .collect();

    BatchPreview {
        matter: document.matter.clone(),
        rows,
        total_hours,
        total_billing: document.rate.map(|rate| total_hours * rate),
    }
}

/// Work out which task entries of `document` default to: its own
/// `task_id`, then a configured alias for the matter, then the first task
/// of the first project whose name contains the matter.
pub async fn resolve_default_task(
    client: &PaymoClient,
    config: &PaymoConfig,
    document: &BatchTimesheet,
) -> Result<Option<u64>> {
    if let Some(task_id) = document.task_id {
        return Ok(Some(task_id));
    }
    let Some(matter) = document.matter.as_deref() else {
        return Ok(None);
    };

    if let Some(alias) = config.alias(matter) {
        info!("Matter '{}' maps to task {} via config", matter, alias.task_id);
        return Ok(Some(alias.task_id));
    }

    let project = paymo::find_project_by_name(client, matter)
        .await?
        .ok_or_else(|| PaymoError::not_found(format!("no project matching '{matter}'")))?;
    let task = paymo::list_tasks(client, Some(project.id))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| PaymoError::not_found(format!("project '{}' has no tasks", project.name)))?;

    warn!(
        "Matter '{}' resolved by name to project '{}' ({}), task '{}' ({})",
        matter, project.name, project.id, task.name, task.id
    );
    Ok(Some(task.id))
}

/// Creates entries one request at a time; a failing request is recorded
/// and the rest still go through.
pub struct BatchSubmitter<'a> {
    client: &'a PaymoClient,
    defaults: BatchDefaults,
}

impl<'a> BatchSubmitter<'a> {
    pub fn new(client: &'a PaymoClient, defaults: BatchDefaults) -> Self {
        Self { client, defaults }
    }

    /// Build a submitter for a YAML document, resolving its matter and
    /// timezone against the configuration.
    pub async fn for_document(
        client: &'a PaymoClient,
        config: &PaymoConfig,
        document: &BatchTimesheet,
    ) -> Result<Self> {
        let timezone = match document.timezone.as_deref() {
            Some(raw) => parse_timezone(raw)?,
            None => parse_timezone(&config.timezone)?,
        };
        let task_id = resolve_default_task(client, config, document).await?;
        Ok(Self::new(client, BatchDefaults::new(task_id, timezone)))
    }

    pub async fn submit(&self, requests: &[BatchEntryRequest]) -> Vec<BatchOutcome> {
        info!("Submitting {} entries", requests.len());

        let mut pacer = self.client.pacer();
        let mut outcomes = Vec::with_capacity(requests.len());

        for (index, request) in requests.iter().enumerate() {
            let result = match normalize(request, &self.defaults) {
                Ok(new_entry) => {
                    pacer.wait().await;
                    paymo::create_entry(self.client, &new_entry).await
                }
                Err(e) => Err(e),
            };

            let outcome = match result {
                Ok(entry) => {
                    info!(
                        "[{}/{}] Created entry {} for {}",
                        index + 1,
                        requests.len(),
                        entry.id,
                        entry.date
                    );
                    BatchOutcome::Success { index, entry }
                }
                Err(e) => {
                    error!(
                        "[{}/{}] Entry on {} failed: {}",
                        index + 1,
                        requests.len(),
                        request.date,
                        e
                    );
                    BatchOutcome::Failure {
                        index,
                        kind: e.kind().to_string(),
                        reason: e.to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let created = outcomes.iter().filter(|o| o.is_success()).count();
        info!("Created {} of {} entries", created, requests.len());
        outcomes
    }
}
