//! Paymo CLI - list, create and export Paymo time entries, or serve the
//! same operations as tools for an agent.

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};
use tokio::net::TcpListener;
use tracing::info;

use paymo_timesheet::{
    BatchOutcome, EntryFilter, InvoiceFilter, InvoiceStatus, PaymoConfig, PaymoError,
    TimesheetService,
    helpers::batch,
    models::batch::{BatchPreview, BatchReport, BatchTimesheet},
    service::ExportSummary,
};

#[derive(Parser)]
#[command(name = "paymo")]
#[command(author, version, about = "Paymo timesheet automation", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Extra YAML config file layered over ~/.paymo/config.yaml
    #[arg(long, env = "PAYMO_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List projects
    ListProjects {
        /// Include archived projects
        #[arg(long)]
        all: bool,
    },

    /// List the tasks of a project
    ListTasks {
        #[arg(long)]
        project_id: u64,
    },

    /// Create a single time entry
    #[command(group(ArgGroup::new("task").required(true).args(["task_id", "project"])))]
    CreateEntry {
        #[arg(long)]
        task_id: Option<u64>,
        /// Project alias from the config file
        #[arg(long)]
        project: Option<String>,
        /// YYYY-MM-DD
        #[arg(long)]
        date: String,
        #[arg(long)]
        hours: f64,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// List time entries in a date range
    ListEntries {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long)]
        project_id: Option<u64>,
        /// Only billed entries
        #[arg(long, conflicts_with = "unbilled")]
        billed: bool,
        /// Only unbilled entries
        #[arg(long)]
        unbilled: bool,
        /// Look up task names (one paced request per task)
        #[arg(long)]
        with_task_names: bool,
    },

    /// List invoices
    ListInvoices {
        #[arg(long)]
        client_id: Option<u64>,
        /// draft, sent, viewed or paid
        #[arg(long)]
        status: Option<String>,
        /// Only sent or viewed invoices from the last 7 days
        #[arg(long, conflicts_with_all = ["client_id", "status"])]
        last_week: bool,
    },

    /// Export the entries billed on an invoice to CSV
    #[command(group(ArgGroup::new("invoices").required(true).args(["invoice_id", "last_week"])))]
    ExportInvoiceTimesheets {
        #[arg(long)]
        invoice_id: Option<u64>,
        /// Every sent or viewed invoice from the last 7 days
        #[arg(long)]
        last_week: bool,
        #[arg(long, short)]
        output_dir: Option<PathBuf>,
    },

    /// Export the entries of a date range to CSV
    ExportTimesheet {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long)]
        project_id: Option<u64>,
        #[arg(long, short)]
        output_dir: Option<PathBuf>,
    },

    /// Show what a YAML timesheet would create
    Preview { file: PathBuf },

    /// Create every entry of a YAML timesheet
    Submit {
        file: PathBuf,
        /// Preview only
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete time entries
    Delete {
        #[arg(required = true)]
        entry_ids: Vec<u64>,
        /// Confirm the deletion
        #[arg(long, short)]
        yes: bool,
    },

    /// Serve the tool registry over HTTP
    Serve {
        #[arg(long, default_value = "127.0.0.1:8787")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("{e:#}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<PaymoError>()
                .map_or(1, PaymoError::exit_code);
            eprintln!("Error: {err:#}");
            if let Some(hint) = err.downcast_ref::<PaymoError>().and_then(hint) {
                eprintln!("{hint}");
            }
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("PAYMO_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))
}

fn hint(err: &PaymoError) -> Option<&'static str> {
    match err {
        PaymoError::Auth(_) => Some("Check api_key in ~/.paymo/config.yaml or PAYMO_API_KEY."),
        PaymoError::RateLimit { .. } => {
            Some("Paymo is throttling this account; try again in a minute.")
        }
        PaymoError::Transport(_) => Some("Could not reach Paymo; check the network and base_url."),
        _ => None,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = PaymoConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let format = cli.format;

    match cli.command {
        Commands::ListProjects { all } => {
            let projects = service(config)?.list_projects(!all).await?;
            emit(format, &projects, || {
                for p in &projects {
                    println!(
                        "{:>8}  {:<40}  {:<24}  {}",
                        p.id,
                        p.name,
                        p.client_name.as_deref().unwrap_or(""),
                        if p.active { "active" } else { "archived" }
                    );
                }
            })
        }
        Commands::ListTasks { project_id } => {
            let tasks = service(config)?.list_tasks(project_id).await?;
            emit(format, &tasks, || {
                for t in &tasks {
                    println!(
                        "{:>8}  {:<48}  {}",
                        t.id,
                        t.name,
                        if t.billable { "billable" } else { "" }
                    );
                }
            })
        }
        Commands::CreateEntry {
            task_id,
            project,
            date,
            hours,
            description,
        } => {
            let entry = service(config)?
                .create_entry(task_id, project.as_deref(), &date, hours, &description)
                .await?;
            emit(format, &entry, || {
                println!(
                    "Created entry {} ({:.2}h on {})",
                    entry.id, entry.duration_hours, entry.date
                );
            })
        }
        Commands::ListEntries {
            start,
            end,
            project_id,
            billed,
            unbilled,
            with_task_names,
        } => {
            let billed = match (billed, unbilled) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let filter = EntryFilter::parse_range(&start, &end)?
                .with_project(project_id)
                .with_billed(billed);
            let entries = service(config)?.list_entries(&filter, with_task_names).await?;
            emit(format, &entries, || {
                for e in &entries {
                    println!(
                        "{:>10}  {}  {:>6.2}h  {:<24}  {}",
                        e.entry.id,
                        e.entry.date,
                        e.entry.duration_hours,
                        e.task_name,
                        truncate(&e.entry.description, 50)
                    );
                }
                let total: f64 = entries.iter().map(|e| e.entry.duration_hours).sum();
                println!("\nTotal: {total:.2} hours");
            })
        }
        Commands::ListInvoices {
            client_id,
            status,
            last_week,
        } => {
            let service = service(config)?;
            let invoices = if last_week {
                service.outstanding_invoices_last_week().await?
            } else {
                let status = status.as_deref().map(str::parse::<InvoiceStatus>).transpose()?;
                service.list_invoices(&InvoiceFilter { client_id, status }).await?
            };
            emit(format, &invoices, || {
                for i in &invoices {
                    println!(
                        "{:>8}  {:<14}  {:<24}  {:>12.2}  {:<10}  {}",
                        i.id,
                        i.display_number(),
                        i.client_name.as_deref().unwrap_or(""),
                        i.amount,
                        i.date.map(|d| d.to_string()).unwrap_or_default(),
                        i.status
                    );
                }
                let total: f64 = invoices.iter().map(|i| i.amount).sum();
                println!("\nTotal: {total:.2}");
            })
        }
        Commands::ExportInvoiceTimesheets {
            invoice_id: Some(invoice_id),
            output_dir,
            ..
        } => {
            let summary = service(config)?
                .export_invoice_timesheet(invoice_id, output_dir.as_deref())
                .await?;
            emit(format, &summary, || print_export(&summary))
        }
        Commands::ExportInvoiceTimesheets { output_dir, .. } => {
            let exports = service(config)?
                .export_outstanding_last_week(output_dir.as_deref())
                .await?;
            emit(format, &exports, || {
                if exports.is_empty() {
                    println!("No outstanding invoices from the last week");
                }
                for export in &exports {
                    match (&export.summary, &export.error) {
                        (Some(summary), _) => {
                            print!("{}: ", export.number);
                            print_export(summary);
                        }
                        (None, error) => println!(
                            "{}: failed: {}",
                            export.number,
                            error.as_deref().unwrap_or("unknown error")
                        ),
                    }
                }
            })?;
            let failed = exports.iter().filter(|e| e.error.is_some()).count();
            if failed > 0 {
                bail!("{failed} of {} invoice exports failed", exports.len());
            }
            Ok(())
        }
        Commands::ExportTimesheet {
            start,
            end,
            project_id,
            output_dir,
        } => {
            let filter = EntryFilter::parse_range(&start, &end)?.with_project(project_id);
            let summary = service(config)?
                .export_timesheet(&filter, output_dir.as_deref())
                .await?;
            emit(format, &summary, || print_export(&summary))
        }
        Commands::Preview { file } => {
            let document = read_timesheet(&file)?;
            let preview = preview_timesheet(&config, &document)?;
            emit(format, &preview, || print_preview(&preview))
        }
        Commands::Submit { file, dry_run } => {
            let document = read_timesheet(&file)?;
            if dry_run {
                let preview = preview_timesheet(&config, &document)?;
                return emit(format, &preview, || {
                    print_preview(&preview);
                    println!("Dry run - no entries created");
                });
            }

            let report = service(config)?.submit_timesheet(&document).await?;
            emit(format, &report, || print_report(&report))?;
            if report.failed > 0 {
                bail!("{} of {} entries failed", report.failed, report.outcomes.len());
            }
            Ok(())
        }
        Commands::Delete { entry_ids, yes } => {
            if !yes {
                bail!("refusing to delete {} entries without --yes", entry_ids.len());
            }
            let outcomes = service(config)?.delete_entries(&entry_ids).await;
            emit(format, &outcomes, || {
                for o in &outcomes {
                    match &o.error {
                        None => println!("Deleted entry {}", o.entry_id),
                        Some(e) => println!("Failed to delete entry {}: {}", o.entry_id, e),
                    }
                }
            })?;
            let failed = outcomes.iter().filter(|o| !o.deleted).count();
            if failed > 0 {
                bail!("{failed} deletions failed");
            }
            Ok(())
        }
        Commands::Serve { bind } => {
            let app = service(config)?.router();
            let listener = TcpListener::bind(&bind)
                .await
                .with_context(|| format!("failed to bind {bind}"))?;
            info!("Tool server running on http://{}", bind);
            eprintln!("Serving Paymo tools on http://{bind}/tools");

            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
            Ok(())
        }
    }
}

fn service(config: PaymoConfig) -> Result<TimesheetService> {
    Ok(TimesheetService::from_config(config)?)
}

/// Previews need no credentials, so they run without a client.
fn preview_timesheet(config: &PaymoConfig, document: &BatchTimesheet) -> Result<BatchPreview> {
    let timezone = match document.timezone.as_deref() {
        Some(raw) => batch::parse_timezone(raw)?,
        None => config.default_timezone()?,
    };
    Ok(batch::preview(document, timezone))
}

fn read_timesheet(path: &Path) -> Result<BatchTimesheet> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(BatchTimesheet::from_yaml(&content).map_err(PaymoError::from)?)
}

fn emit<T: Serialize>(format: OutputFormat, value: &T, table: impl FnOnce()) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Table => table(),
    }
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

fn print_export(summary: &ExportSummary) {
    println!(
        "Exported {} entries ({:.2}h) to {}",
        summary.rows,
        summary.total_hours,
        summary.path.display()
    );
}

fn print_preview(preview: &BatchPreview) {
    if let Some(matter) = &preview.matter {
        println!("Timesheet preview: {matter}");
    }
    for row in &preview.rows {
        let hours = row.hours.map(|h| format!("{h:.2}")).unwrap_or_else(|| "-".into());
        println!(
            "{:<10}  {:<11}  {:>6}  {}",
            row.date,
            row.time_range,
            hours,
            truncate(&row.description, 50)
        );
        if let Some(error) = &row.error {
            println!("            ! {error}");
        }
    }
    print!("\nTotal: {:.2} hours", preview.total_hours);
    match preview.total_billing {
        Some(billing) => println!(" ({billing:.2} billable)"),
        None => println!(),
    }
}

fn print_report(report: &BatchReport) {
    for outcome in &report.outcomes {
        match outcome {
            BatchOutcome::Success { index, entry } => {
                println!(
                    "[{}] created entry {} ({:.2}h on {})",
                    index + 1,
                    entry.id,
                    entry.duration_hours,
                    entry.date
                );
            }
            BatchOutcome::Failure { index, reason, .. } => {
                println!("[{}] failed: {}", index + 1, reason);
            }
        }
    }
    println!("\nCreated {} entries, {} failed", report.created, report.failed);
}
