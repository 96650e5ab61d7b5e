mod common;

use common::{MockPaymo, MockState, project, task};
use paymo_timesheet::{TimesheetService, ToolRegistry, tools::ToolResponse};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::net::TcpListener;

fn paymo_state() -> MockState {
    MockState {
        projects: vec![project(3, "Acme Retainer", true), project(4, "Archived", false)],
        tasks: vec![task(7, 3, "Research")],
        ..MockState::default()
    }
}

async fn serve_tools(service: TimesheetService) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, service.router()).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn registry_invokes_tools_by_name() {
    let mock = MockPaymo::start(paymo_state()).await;
    let dir = tempfile::tempdir().unwrap();
    let service = TimesheetService::from_config(mock.config(dir.path())).unwrap();
    let registry = ToolRegistry::new();

    let response = registry
        .invoke(&service, "list_paymo_tasks", json!({"project_id": 3}))
        .await;
    assert!(response.ok);
    assert_eq!(response.result.unwrap()[0]["name"], "Research");

    let response = registry.invoke(&service, "list_paymo_tasks", json!({})).await;
    assert_eq!(response.error.unwrap().kind, "validation");

    let response = registry.invoke(&service, "drop_database", Value::Null).await;
    assert_eq!(response.error.unwrap().kind, "unknown_tool");
}

#[tokio::test]
async fn http_router_lists_and_calls_tools() {
    let mock = MockPaymo::start(paymo_state()).await;
    let dir = tempfile::tempdir().unwrap();
    let service = TimesheetService::from_config(mock.config(dir.path())).unwrap();
    let base = serve_tools(service).await;
    let http = reqwest::Client::new();

    let tools: Vec<Value> = http
        .get(format!("{base}/tools"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tools.len(), 9);
    assert!(tools.iter().all(|t| t["parameters"].is_object()));

    let response = http
        .post(format!("{base}/tools/list_paymo_projects"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: ToolResponse = response.json().await.unwrap();
    assert_eq!(body.result.unwrap().as_array().unwrap().len(), 1);

    let response = http
        .post(format!("{base}/tools/list_paymo_projects"))
        .json(&json!({"include_inactive": true}))
        .send()
        .await
        .unwrap();
    let body: ToolResponse = response.json().await.unwrap();
    assert_eq!(body.result.unwrap().as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn http_router_maps_failures_to_statuses() {
    let mock = MockPaymo::start(paymo_state()).await;
    let dir = tempfile::tempdir().unwrap();
    let service = TimesheetService::from_config(mock.config(dir.path())).unwrap();
    let base = serve_tools(service).await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{base}/tools/create_paymo_entry"))
        .json(&json!({"task_id": 7, "date": "tomorrow", "duration_hours": 1.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: ToolResponse = response.json().await.unwrap();
    assert!(!body.ok);
    assert!(mock.created().is_empty());

    let response = http
        .post(format!("{base}/tools/export_invoice_timesheet"))
        .json(&json!({"invoice_id": 12}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let response = http
        .post(format!("{base}/tools/list_paymo_tasks"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let health = http.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn timesheet_tool_reports_each_entry() {
    let mock = MockPaymo::start(paymo_state()).await;
    let dir = tempfile::tempdir().unwrap();
    let service = TimesheetService::from_config(mock.config(dir.path())).unwrap();

    let yaml = "task_id: 7\n\
                entries:\n  - date: 2024-03-04\n    duration_hours: 1\n  - date: 2024-03-05\n";
    let response = ToolRegistry::new()
        .invoke(&service, "submit_paymo_timesheet", json!({"yaml_content": yaml}))
        .await;

    let report = response.result.unwrap();
    assert_eq!(report["created"], 1);
    assert_eq!(report["failed"], 1);
    assert_eq!(report["outcomes"][1]["status"], "failure");
    assert_eq!(report["outcomes"][1]["kind"], "validation");
}
