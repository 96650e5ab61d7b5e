use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::{
    error::Result,
    helpers::{
        client::{Pacer, PaymoClient},
        paymo::{self, EntryFilter},
    },
    models::timesheet::{EnrichedEntry, Invoice, TimeEntry},
};

/// Resolves task display names one lookup at a time, never asking twice
/// for the same task and keeping the client's pacing gap between lookups.
pub struct TaskNameResolver<'a> {
    client: &'a PaymoClient,
    pacer: Pacer,
    names: BTreeMap<u64, String>,
}

impl<'a> TaskNameResolver<'a> {
    pub fn new(client: &'a PaymoClient) -> Self {
        Self {
            client,
            pacer: client.pacer(),
            names: BTreeMap::new(),
        }
    }

    pub async fn resolve(&mut self, task_ids: impl IntoIterator<Item = u64>) -> Result<()> {
        let pending: BTreeSet<u64> = task_ids
            .into_iter()
            .filter(|id| !self.names.contains_key(id))
            .collect();

        if !pending.is_empty() {
            info!("Resolving names for {} tasks", pending.len());
        }

        for task_id in pending {
            self.pacer.wait().await;
            let task = paymo::get_task(self.client, task_id).await?;
            debug!("Task {} is '{}'", task_id, task.name);
            self.names.insert(task_id, task.name);
        }
        Ok(())
    }

    pub fn name_of(&self, task_id: u64) -> String {
        self.names.get(&task_id).cloned().unwrap_or_default()
    }

    /// Resolve every task referenced by `entries` and attach the names.
    pub async fn enrich(&mut self, entries: Vec<TimeEntry>) -> Result<Vec<EnrichedEntry>> {
        self.resolve(entries.iter().map(|e| e.task_id)).await?;
        Ok(entries
            .into_iter()
            .map(|entry| EnrichedEntry {
                task_name: self.name_of(entry.task_id),
                entry,
            })
            .collect())
    }
}

/// Start timestamp ascending, entry id breaking ties.
pub fn sort_entries(entries: &mut [EnrichedEntry]) {
    entries.sort_by_key(|e| e.entry.sort_key());
}

/// `[anchor - days, anchor]`, both ends inclusive.
pub fn lookback_window(anchor: NaiveDate, days: u32) -> (NaiveDate, NaiveDate) {
    let start = anchor
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN);
    (start, anchor)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceTimesheet {
    pub invoice: Invoice,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub entries: Vec<EnrichedEntry>,
}

/// Matches time entries to the line items of an invoice.
pub struct InvoiceReconciler<'a> {
    client: &'a PaymoClient,
    lookback_days: u32,
}

impl<'a> InvoiceReconciler<'a> {
    pub fn new(client: &'a PaymoClient, lookback_days: u32) -> Self {
        Self {
            client,
            lookback_days,
        }
    }

    /// The entries billed on `invoice_id`, enriched and in export order.
    pub async fn reconcile(&self, invoice_id: u64) -> Result<Vec<EnrichedEntry>> {
        Ok(self.timesheet(invoice_id).await?.entries)
    }

    pub async fn timesheet(&self, invoice_id: u64) -> Result<InvoiceTimesheet> {
        let invoice = paymo::get_invoice(self.client, invoice_id).await?;
        let anchor = invoice.date.unwrap_or_else(|| Utc::now().date_naive());
        let (window_start, window_end) = lookback_window(anchor, self.lookback_days);

        let item_ids: BTreeSet<u64> = invoice.line_items.iter().map(|item| item.id).collect();
        if item_ids.is_empty() {
            info!("Invoice {} has no line items, nothing to reconcile", invoice_id);
            return Ok(InvoiceTimesheet {
                invoice,
                window_start,
                window_end,
                entries: Vec::new(),
            });
        }

        info!(
            "Reconciling invoice {} ({} line items) against entries from {} to {}",
            invoice_id,
            item_ids.len(),
            window_start,
            window_end
        );

        let window = EntryFilter::between(window_start, window_end)?;
        let candidates = paymo::list_entries(self.client, &window).await?;
        let considered = candidates.len();

        let billed: Vec<TimeEntry> = candidates
            .into_iter()
            .filter(|e| e.invoice_item_id.is_some_and(|id| item_ids.contains(&id)))
            .collect();

        info!(
            "{} of {} entries in the window are billed on invoice {}",
            billed.len(),
            considered,
            invoice_id
        );

        let mut entries = TaskNameResolver::new(self.client).enrich(billed).await?;
        sort_entries(&mut entries);

        Ok(InvoiceTimesheet {
            invoice,
            window_start,
            window_end,
            entries,
        })
    }
}

/// Entries matching `filter`, enriched with task names and in export order.
pub async fn timesheet(client: &PaymoClient, filter: &EntryFilter) -> Result<Vec<EnrichedEntry>> {
    let entries = paymo::list_entries(client, filter).await?;
    let mut enriched = TaskNameResolver::new(client).enrich(entries).await?;
    sort_entries(&mut enriched);
    Ok(enriched)
}
