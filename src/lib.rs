//! Paymo Timesheet Library
//!
//! This library lists Paymo projects, tasks, entries and invoices, creates
//! time entries (one at a time or from a YAML timesheet), and exports the
//! entries billed on an invoice to CSV, all through a rate-limited client.

pub mod config;
pub mod error;
pub mod helpers;
pub mod models;
pub mod service;
pub mod tools;

pub use config::PaymoConfig;
pub use error::{PaymoError, Result};
pub use service::TimesheetService;

// Re-export key types for convenience
pub use helpers::client::{PaymoClient, RateLimitPolicy, RetryPolicy};
pub use helpers::paymo::{EntryFilter, InvoiceFilter};
pub use helpers::reconcile::InvoiceReconciler;
pub use models::batch::{BatchEntryRequest, BatchOutcome, BatchTimesheet};
pub use models::timesheet::{EnrichedEntry, Invoice, InvoiceStatus, Project, Task, TimeEntry};
pub use tools::ToolRegistry;
