//! Named operations for an external agent.
//!
//! The registry is built once at startup: each tool has a name, a one-line
//! description, a JSON schema of its arguments and a handler. Handlers
//! return structured JSON; failures become an error payload instead of a
//! panic or a bare string.

use schemars::{JsonSchema, Schema, schema_for};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{collections::BTreeMap, future::Future, path::Path, pin::Pin};
use tracing::{error, info};

use crate::{
    error::{PaymoError, Result},
    helpers::paymo::{EntryFilter, InvoiceFilter},
    models::timesheet::InvoiceStatus,
    service::TimesheetService,
};

pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;
pub type ToolHandler = for<'a> fn(&'a TimesheetService, Value) -> ToolFuture<'a>;

pub struct Tool {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Schema,
    handler: ToolHandler,
}

/// What `GET /tools` lists for each tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Schema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolResponse {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(err: &PaymoError) -> Self {
        Self::error(err.kind(), err.to_string())
    }

    fn error(kind: &str, message: String) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(ToolError {
                kind: kind.to_string(),
                message,
            }),
        }
    }
}

pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Tool>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            tools: BTreeMap::new(),
        };

        registry.register::<ListProjectsArgs>(
            "list_paymo_projects",
            "List Paymo projects (active ones unless include_inactive is set)",
            list_projects,
        );
        registry.register::<ListTasksArgs>(
            "list_paymo_tasks",
            "List the tasks of a Paymo project",
            list_tasks,
        );
        registry.register::<CreateEntryArgs>(
            "create_paymo_entry",
            "Create a single time entry from a date and a number of hours",
            create_entry,
        );
        registry.register::<SubmitTimesheetArgs>(
            "submit_paymo_timesheet",
            "Submit every entry of a YAML timesheet, reporting each entry's outcome",
            submit_timesheet,
        );
        registry.register::<ListEntriesArgs>(
            "list_paymo_entries",
            "List time entries in a date range with task names, \
             optionally by project and billed status",
            list_entries,
        );
        registry.register::<ListInvoicesArgs>(
            "list_paymo_invoices",
            "List invoices, optionally by client and status (draft, sent, viewed, paid)",
            list_invoices,
        );
        registry.register::<NoArgs>(
            "get_outstanding_invoices_last_week",
            "Sent or viewed invoices dated within the last 7 days",
            outstanding_invoices,
        );
        registry.register::<ExportInvoiceArgs>(
            "export_invoice_timesheet",
            "Write a CSV of the time entries billed on an invoice and return its path",
            export_invoice_timesheet,
        );
        registry.register::<ExportTimesheetArgs>(
            "export_paymo_timesheet",
            "Write a CSV of the time entries in a date range and return its path",
            export_timesheet,
        );

        registry
    }

    fn register<A: JsonSchema>(
        &mut self,
        name: &'static str,
        description: &'static str,
        handler: ToolHandler,
    ) {
        self.tools.insert(
            name,
            Tool {
                name,
                description,
                parameters: schema_for!(A),
                handler,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name,
                description: tool.description,
                parameters: tool.parameters.clone(),
            })
            .collect()
    }

    pub async fn invoke(
        &self,
        service: &TimesheetService,
        name: &str,
        args: Value,
    ) -> ToolResponse {
        let Some(tool) = self.get(name) else {
            error!("Unknown tool '{}'", name);
            return ToolResponse::error("unknown_tool", format!("no tool named '{name}'"));
        };

        match (tool.handler)(service, args).await {
            Ok(result) => {
                info!("Tool '{}' succeeded", name);
                ToolResponse::success(result)
            }
            Err(e) => {
                error!("Tool '{}' failed: {}", name, e);
                ToolResponse::failure(&e)
            }
        }
    }
}

fn parse_args<A: DeserializeOwned>(args: Value) -> Result<A> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args)
        .map_err(|e| PaymoError::validation(format!("invalid arguments: {e}")))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| PaymoError::decode(e.to_string()))
}

#[derive(Debug, Deserialize, JsonSchema)]
struct NoArgs {}

#[derive(Debug, Deserialize, JsonSchema)]
struct ListProjectsArgs {
    #[serde(default)]
    include_inactive: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ListTasksArgs {
    project_id: u64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CreateEntryArgs {
    task_id: u64,
    /// YYYY-MM-DD
    date: String,
    duration_hours: f64,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SubmitTimesheetArgs {
    /// YAML document with an `entries` list
    yaml_content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ListEntriesArgs {
    /// YYYY-MM-DD
    start_date: String,
    /// YYYY-MM-DD
    end_date: String,
    #[serde(default)]
    project_id: Option<u64>,
    /// true for billed, false for unbilled, omitted for all
    #[serde(default)]
    billed: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ListInvoicesArgs {
    #[serde(default)]
    client_id: Option<u64>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExportInvoiceArgs {
    invoice_id: u64,
    #[serde(default)]
    output_dir: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExportTimesheetArgs {
    start_date: String,
    end_date: String,
    #[serde(default)]
    project_id: Option<u64>,
    #[serde(default)]
    output_dir: Option<String>,
}

fn list_projects(service: &TimesheetService, args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let args: ListProjectsArgs = parse_args(args)?;
        to_value(&service.list_projects(!args.include_inactive).await?)
    })
}

fn list_tasks(service: &TimesheetService, args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let args: ListTasksArgs = parse_args(args)?;
        to_value(&service.list_tasks(args.project_id).await?)
    })
}

fn create_entry(service: &TimesheetService, args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let args: CreateEntryArgs = parse_args(args)?;
        let entry = service
            .create_entry(
                Some(args.task_id),
                None,
                &args.date,
                args.duration_hours,
                &args.description,
            )
            .await?;
        to_value(&entry)
    })
}

fn submit_timesheet(service: &TimesheetService, args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let args: SubmitTimesheetArgs = parse_args(args)?;
        to_value(&service.submit_yaml(&args.yaml_content).await?)
    })
}

fn list_entries(service: &TimesheetService, args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let args: ListEntriesArgs = parse_args(args)?;
        let filter = EntryFilter::parse_range(&args.start_date, &args.end_date)?
            .with_project(args.project_id)
            .with_billed(args.billed);
        to_value(&service.list_entries(&filter, true).await?)
    })
}

fn list_invoices(service: &TimesheetService, args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let args: ListInvoicesArgs = parse_args(args)?;
        let filter = InvoiceFilter {
            client_id: args.client_id,
            status: args
                .status
                .as_deref()
                .map(str::parse::<InvoiceStatus>)
                .transpose()?,
        };
        to_value(&service.list_invoices(&filter).await?)
    })
}

fn outstanding_invoices(service: &TimesheetService, args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let _: NoArgs = parse_args(args)?;
        to_value(&service.outstanding_invoices_last_week().await?)
    })
}

fn export_invoice_timesheet(service: &TimesheetService, args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let args: ExportInvoiceArgs = parse_args(args)?;
        let summary = service
            .export_invoice_timesheet(args.invoice_id, args.output_dir.as_deref().map(Path::new))
            .await?;
        to_value(&summary)
    })
}

fn export_timesheet(service: &TimesheetService, args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let args: ExportTimesheetArgs = parse_args(args)?;
        let filter = EntryFilter::parse_range(&args.start_date, &args.end_date)?
            .with_project(args.project_id);
        let summary = service
            .export_timesheet(&filter, args.output_dir.as_deref().map(Path::new))
            .await?;
        to_value(&summary)
    })
}
