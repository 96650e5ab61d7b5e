use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{Days, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    path::{Path as FsPath, PathBuf},
    sync::Arc,
};
use tracing::{error, info};

use crate::{
    config::PaymoConfig,
    error::{PaymoError, Result},
    helpers::{
        batch::{self, BatchDefaults, BatchSubmitter},
        client::PaymoClient,
        csv_export,
        paymo::{self, EntryFilter, InvoiceFilter},
        reconcile::{self, InvoiceReconciler, InvoiceTimesheet},
    },
    models::{
        batch::{BatchEntryRequest, BatchReport, BatchTimesheet},
        timesheet::{EnrichedEntry, Invoice, Project, Task, TimeEntry},
    },
    tools::{ToolDescriptor, ToolRegistry, ToolResponse},
};

/// Result of writing a CSV export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub total_hours: f64,
}

/// Outcome of one invoice in a multi-invoice export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceExport {
    pub invoice_id: u64,
    pub number: String,
    pub summary: Option<ExportSummary>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub entry_id: u64,
    pub deleted: bool,
    pub error: Option<String>,
}

/// Every operation the CLI and the tool router expose, over one shared
/// client.
#[derive(Clone)]
pub struct TimesheetService {
    pub client: Arc<PaymoClient>,
    pub config: PaymoConfig,
}

impl TimesheetService {
    /// Wrap an already configured client.
    pub fn new(client: PaymoClient, config: PaymoConfig) -> Self {
        info!("Creating new TimesheetService instance");
        Self {
            client: Arc::new(client),
            config,
        }
    }

    /// Build the client from `config`; fails with `Auth` without an API key.
    pub fn from_config(config: PaymoConfig) -> Result<Self> {
        let client = PaymoClient::from_config(&config)?;
        Ok(Self::new(client, config))
    }

    /// Axum router exposing the tool registry.
    pub fn router(self) -> Router {
        info!("Creating tool router");
        let state = Arc::new(ToolState {
            service: self,
            registry: ToolRegistry::new(),
        });

        Router::new()
            .route("/tools", get(list_tools))
            .route("/tools/{name}", post(invoke_tool))
            .route("/health", get(|| async { "OK" }))
            .with_state(state)
    }

    fn default_timezone(&self) -> Result<chrono_tz::Tz> {
        batch::parse_timezone(&self.config.timezone)
    }

    fn output_dir(&self, requested: Option<&FsPath>) -> PathBuf {
        requested
            .map(FsPath::to_path_buf)
            .unwrap_or_else(|| self.config.output_dir.clone())
    }

    /// Projects, optionally only the active ones.
    pub async fn list_projects(&self, active_only: bool) -> Result<Vec<Project>> {
        paymo::list_projects(&self.client, active_only).await
    }

    /// Tasks of one project.
    pub async fn list_tasks(&self, project_id: u64) -> Result<Vec<Task>> {
        paymo::list_tasks(&self.client, Some(project_id)).await
    }

    /// Create one duration-based entry. The task comes from `task_id` or,
    /// failing that, from a configured project alias.
    pub async fn create_entry(
        &self,
        task_id: Option<u64>,
        project_alias: Option<&str>,
        date: &str,
        duration_hours: f64,
        description: &str,
    ) -> Result<TimeEntry> {
        let task_id = match (task_id, project_alias) {
            (Some(id), _) => id,
            (None, Some(alias)) => {
                self.config
                    .alias(alias)
                    .ok_or_else(|| {
                        PaymoError::validation(format!("no project alias '{alias}' in config"))
                    })?
                    .task_id
            }
            (None, None) => {
                return Err(PaymoError::validation(
                    "either a task id or a project alias is required",
                ));
            }
        };

        let request = BatchEntryRequest {
            task_id: Some(task_id),
            date: date.to_string(),
            duration_hours: Some(duration_hours),
            description: Some(description.to_string()),
            ..BatchEntryRequest::default()
        };
        let defaults = BatchDefaults::new(Some(task_id), self.default_timezone()?);
        let new_entry = batch::normalize(&request, &defaults)?;

        paymo::create_entry(&self.client, &new_entry).await
    }

    /// Submit every entry of a parsed document and tally the outcomes.
    pub async fn submit_timesheet(&self, document: &BatchTimesheet) -> Result<BatchReport> {
        let submitter = BatchSubmitter::for_document(&self.client, &self.config, document).await?;
        Ok(BatchReport::from(submitter.submit(&document.entries).await))
    }

    /// Parse a YAML timesheet and submit it.
    pub async fn submit_yaml(&self, content: &str) -> Result<BatchReport> {
        let document = BatchTimesheet::from_yaml(content)?;
        self.submit_timesheet(&document).await
    }

    /// Entries matching `filter` in export order; task names are looked up
    /// only when asked for, since each one costs a paced request.
    pub async fn list_entries(
        &self,
        filter: &EntryFilter,
        with_task_names: bool,
    ) -> Result<Vec<EnrichedEntry>> {
        if with_task_names {
            return reconcile::timesheet(&self.client, filter).await;
        }

        let mut entries: Vec<EnrichedEntry> = paymo::list_entries(&self.client, filter)
            .await?
            .into_iter()
            .map(|entry| EnrichedEntry {
                entry,
                task_name: String::new(),
            })
            .collect();
        reconcile::sort_entries(&mut entries);
        Ok(entries)
    }

    /// Invoices matching `filter`.
    pub async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>> {
        paymo::list_invoices(&self.client, filter).await
    }

    /// Sent or viewed invoices dated within the last 7 days.
    pub async fn outstanding_invoices_last_week(&self) -> Result<Vec<Invoice>> {
        let today = Utc::now().date_naive();
        let since = today.checked_sub_days(Days::new(7)).unwrap_or(today);
        paymo::outstanding_invoices(&self.client, since).await
    }

    /// The invoice with its linked entries in the lookback window.
    pub async fn reconcile_invoice(&self, invoice_id: u64) -> Result<InvoiceTimesheet> {
        InvoiceReconciler::new(&self.client, self.config.lookback_days)
            .timesheet(invoice_id)
            .await
    }

    /// Write the reconciled entries of one invoice to `<number>_timesheet.csv`.
    pub async fn export_invoice_timesheet(
        &self,
        invoice_id: u64,
        output_dir: Option<&FsPath>,
    ) -> Result<ExportSummary> {
        let timesheet = self.reconcile_invoice(invoice_id).await?;
        let file_name = csv_export::invoice_file_name(&timesheet.invoice);
        self.write_export(output_dir, &file_name, &timesheet.entries)
    }

    /// Export every outstanding invoice of the last week, one CSV each,
    /// carrying on past invoices that fail.
    pub async fn export_outstanding_last_week(
        &self,
        output_dir: Option<&FsPath>,
    ) -> Result<Vec<InvoiceExport>> {
        let invoices = self.outstanding_invoices_last_week().await?;
        info!("Exporting timesheets for {} outstanding invoices", invoices.len());

        let mut exports = Vec::with_capacity(invoices.len());
        for invoice in invoices {
            let number = invoice.display_number();
            let export = match self.export_invoice_timesheet(invoice.id, output_dir).await {
                Ok(summary) => InvoiceExport {
                    invoice_id: invoice.id,
                    number,
                    summary: Some(summary),
                    error: None,
                },
                Err(e) => {
                    error!("Failed to export invoice {}: {}", number, e);
                    InvoiceExport {
                        invoice_id: invoice.id,
                        number,
                        summary: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            exports.push(export);
        }
        Ok(exports)
    }

    /// Write the entries matching `filter` to a CSV named after its dates.
    pub async fn export_timesheet(
        &self,
        filter: &EntryFilter,
        output_dir: Option<&FsPath>,
    ) -> Result<ExportSummary> {
        let (Some(start), Some(end)) = (filter.start, filter.end) else {
            return Err(PaymoError::validation("a timesheet export needs a start and end date"));
        };
        let entries = reconcile::timesheet(&self.client, filter).await?;
        self.write_export(output_dir, &csv_export::range_file_name(start, end), &entries)
    }

    fn write_export(
        &self,
        output_dir: Option<&FsPath>,
        file_name: &str,
        entries: &[EnrichedEntry],
    ) -> Result<ExportSummary> {
        let path = csv_export::export_to_dir(&self.output_dir(output_dir), file_name, entries)?;
        Ok(ExportSummary {
            path,
            rows: entries.len(),
            total_hours: entries.iter().map(|e| e.entry.duration_hours).sum(),
        })
    }

    /// Delete each entry independently, reporting per id.
    pub async fn delete_entries(&self, entry_ids: &[u64]) -> Vec<DeleteOutcome> {
        let mut outcomes = Vec::with_capacity(entry_ids.len());
        for &entry_id in entry_ids {
            let outcome = match paymo::delete_entry(&self.client, entry_id).await {
                Ok(()) => DeleteOutcome {
                    entry_id,
                    deleted: true,
                    error: None,
                },
                Err(e) => {
                    error!("Failed to delete entry {}: {}", entry_id, e);
                    DeleteOutcome {
                        entry_id,
                        deleted: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

struct ToolState {
    service: TimesheetService,
    registry: ToolRegistry,
}

// Route handlers
async fn list_tools(State(state): State<Arc<ToolState>>) -> Json<Vec<ToolDescriptor>> {
    Json(state.registry.descriptors())
}

async fn invoke_tool(
    State(state): State<Arc<ToolState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<ToolResponse>) {
    info!("Received tool call '{}'", name);

    let response = if body.is_empty() {
        state.registry.invoke(&state.service, &name, Value::Null).await
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(args) => state.registry.invoke(&state.service, &name, args).await,
            Err(e) => ToolResponse::failure(&PaymoError::validation(format!(
                "tool arguments are not valid JSON: {e}"
            ))),
        }
    };

    let status = match &response.error {
        None => StatusCode::OK,
        Some(error) => match error.kind.as_str() {
            "unknown_tool" | "not_found" => StatusCode::NOT_FOUND,
            "validation" => StatusCode::BAD_REQUEST,
            "auth" => StatusCode::UNAUTHORIZED,
            "rate_limit" => StatusCode::TOO_MANY_REQUESTS,
            "remote" | "transport" | "decode" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    };
    (status, Json(response))
}
