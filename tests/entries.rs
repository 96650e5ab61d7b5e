mod common;

use common::{MockPaymo, MockState, entry, invoice, project, task};
use paymo_timesheet::{
    EntryFilter, InvoiceFilter, InvoiceStatus, TimesheetService, helpers::paymo,
};
use pretty_assertions::assert_eq;

fn entries_state() -> MockState {
    MockState {
        tasks: vec![task(7, 3, "Research"), task(9, 4, "Other")],
        entries: vec![
            entry(1, 7, 3, "2024-02-01T09:00:00Z", None, false),
            entry(2, 7, 3, "2024-02-02T09:00:00Z", Some(501), true),
            entry(3, 9, 4, "2024-02-03T09:00:00Z", None, false),
            entry(4, 7, 3, "2024-03-15T09:00:00Z", None, false),
            entry(5, 7, 3, "2024-02-04T08:00:00Z", None, false),
        ],
        ..MockState::default()
    }
}

fn february() -> EntryFilter {
    EntryFilter::parse_range("2024-02-01", "2024-02-29").unwrap()
}

#[tokio::test]
async fn filters_compose_and_are_reapplied_locally() {
    let mock = MockPaymo::start(entries_state()).await;
    let client = mock.client();

    let filter = february().with_project(Some(3)).with_billed(Some(false));
    let entries = paymo::list_entries(&client, &filter).await.unwrap();

    let ids: Vec<u64> = entries.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 5]);

    let request = &mock.requests()[0];
    assert!(request.starts_with("GET /api/entries?where="), "{request}");
    assert!(request.contains("project_id%3D3"), "{request}");
    assert!(request.contains("billed%3Dfalse"), "{request}");
}

#[test]
fn reversed_range_is_rejected() {
    let err = EntryFilter::parse_range("2024-03-01", "2024-02-01").unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert!(EntryFilter::parse_range("2024-02-30", "2024-03-01").is_err());
}

#[tokio::test]
async fn pages_are_followed_until_a_short_page() {
    let mock = MockPaymo::start(MockState {
        paginate: true,
        ..entries_state()
    })
    .await;
    let client = mock.client().with_page_size(Some(2));

    let entries = paymo::list_entries(&client, &february()).await.unwrap();

    assert_eq!(entries.len(), 4);
    assert_eq!(mock.count_requests("GET /api/entries"), 3);
}

#[tokio::test]
async fn repeated_pages_stop_the_listing() {
    let mock = MockPaymo::start(entries_state()).await;
    let client = mock.client().with_page_size(Some(2));

    let entries = paymo::list_entries(&client, &february()).await.unwrap();

    assert_eq!(entries.len(), 4);
    assert_eq!(mock.count_requests("GET /api/entries"), 2);
}

#[tokio::test]
async fn range_listing_is_sorted_and_named() {
    let mock = MockPaymo::start(entries_state()).await;
    let dir = tempfile::tempdir().unwrap();
    let service = TimesheetService::from_config(mock.config(dir.path())).unwrap();

    let entries = service.list_entries(&february(), true).await.unwrap();
    let ids: Vec<u64> = entries.iter().map(|e| e.entry.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 5]);
    assert_eq!(entries[2].task_name, "Other");

    let bare = service.list_entries(&february(), false).await.unwrap();
    assert!(bare.iter().all(|e| e.task_name.is_empty()));
    assert_eq!(mock.count_requests("GET /api/tasks/"), 2);
}

#[tokio::test]
async fn range_export_is_named_after_the_dates() {
    let mock = MockPaymo::start(entries_state()).await;
    let dir = tempfile::tempdir().unwrap();
    let service = TimesheetService::from_config(mock.config(dir.path())).unwrap();

    let summary = service
        .export_timesheet(&february().with_project(Some(4)), None)
        .await
        .unwrap();

    assert_eq!(
        summary.path,
        dir.path().join("paymo_timesheet_2024-02-01_2024-02-29.csv")
    );
    assert_eq!(summary.rows, 1);
}

#[tokio::test]
async fn deletions_are_reported_per_entry() {
    let mock = MockPaymo::start(entries_state()).await;
    let dir = tempfile::tempdir().unwrap();
    let service = TimesheetService::from_config(mock.config(dir.path())).unwrap();

    let outcomes = service.delete_entries(&[1, 404, 3]).await;

    let deleted: Vec<bool> = outcomes.iter().map(|o| o.deleted).collect();
    assert_eq!(deleted, vec![true, false, true]);
    assert!(outcomes[1].error.is_some());
    assert_eq!(mock.state.lock().unwrap().entries.len(), 3);
}

#[tokio::test]
async fn names_are_matched_case_insensitively() {
    let mock = MockPaymo::start(MockState {
        projects: vec![project(3, "Acme Retainer", true), project(5, "Acme Old", false)],
        ..entries_state()
    })
    .await;
    let client = mock.client();

    let found = paymo::find_project_by_name(&client, "RETAINER").await.unwrap();
    assert_eq!(found.map(|p| p.id), Some(3));
    assert!(paymo::find_project_by_name(&client, "old").await.unwrap().is_none());

    let task = paymo::find_task_by_name(&client, 3, "search").await.unwrap();
    assert_eq!(task.map(|t| t.id), Some(7));
    assert!(paymo::find_task_by_name(&client, 3, "other").await.unwrap().is_none());
}

#[tokio::test]
async fn invoices_filter_by_status_and_client() {
    let mock = MockPaymo::start(MockState {
        invoices: vec![
            invoice(1, "A-1", "2024-03-01", "sent", &[1]),
            invoice(2, "A-2", "2024-03-02", "paid", &[2]),
            invoice(3, "A-3", "2024-03-03", "viewed", &[3]),
        ],
        ..MockState::default()
    })
    .await;
    let client = mock.client();

    let sent = paymo::list_invoices(
        &client,
        &InvoiceFilter {
            client_id: Some(1),
            status: Some(InvoiceStatus::Sent),
        },
    )
    .await
    .unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].number, "A-1");

    let since = "2024-03-02".parse().unwrap();
    let outstanding = paymo::outstanding_invoices(&client, since).await.unwrap();
    let ids: Vec<u64> = outstanding.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![3]);
}

#[tokio::test]
async fn invoices_with_unmapped_status_are_skipped() {
    let mut without_status = invoice(3, "A-3", "2024-03-03", "sent", &[3]);
    without_status.as_object_mut().unwrap().remove("status");
    let mock = MockPaymo::start(MockState {
        invoices: vec![
            invoice(1, "A-1", "2024-03-01", "sent", &[1]),
            invoice(2, "A-2", "2024-03-02", "void", &[2]),
            without_status,
            invoice(4, "A-4", "2024-03-04", "viewed", &[4]),
        ],
        ..MockState::default()
    })
    .await;
    let client = mock.client();

    let listed = paymo::list_invoices(&client, &InvoiceFilter::default()).await.unwrap();
    let ids: Vec<u64> = listed.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![1, 4]);

    let since = "2024-03-01".parse().unwrap();
    let outstanding = paymo::outstanding_invoices(&client, since).await.unwrap();
    assert_eq!(outstanding.len(), 2);
}
