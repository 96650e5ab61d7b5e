//! In-process stand-in for the Paymo REST API.

#![allow(dead_code)]

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use paymo_timesheet::{
    PaymoClient, PaymoConfig, RateLimitPolicy, RetryPolicy, config::RateLimitConfig,
};
use serde_json::{Value, json};
use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::net::TcpListener;

#[derive(Debug, Default)]
pub struct MockState {
    pub projects: Vec<Value>,
    pub tasks: Vec<Value>,
    pub entries: Vec<Value>,
    pub invoices: Vec<Value>,
    /// Number of upcoming requests answered with 429.
    pub throttle: u32,
    /// `Retry-After` seconds sent with each 429.
    pub retry_after: Option<u64>,
    /// `X-Ratelimit-Remaining` reported on success, 99 when unset.
    pub remaining: Option<u32>,
    pub unauthorized: bool,
    /// Honour `page`/`page_size` on entry listings.
    pub paginate: bool,
    /// Entry creations with this description fail with 422.
    pub reject_description: Option<String>,
    /// `METHOD /path?query` of every request received.
    pub requests: Vec<String>,
    /// Bodies of accepted entry creations.
    pub created: Vec<Value>,
    pub next_id: u64,
}

pub struct MockPaymo {
    pub base_url: String,
    pub state: Arc<Mutex<MockState>>,
}

impl MockPaymo {
    pub async fn start(state: MockState) -> Self {
        let state = Arc::new(Mutex::new(MockState {
            next_id: state.next_id.max(1000),
            ..state
        }));
        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}/api/"),
            state,
        }
    }

    /// A client with millisecond delays so retries and pacing stay fast.
    pub fn client(&self) -> PaymoClient {
        self.client_with(
            RetryPolicy {
                max_attempts: 4,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
            },
            RateLimitPolicy {
                low_water: 0,
                backpressure_delay: Duration::from_millis(1),
                pacing_delay: Duration::from_millis(1),
            },
        )
    }

    pub fn client_with(&self, retry: RetryPolicy, limits: RateLimitPolicy) -> PaymoClient {
        PaymoClient::new("test-key", &self.base_url, Duration::from_secs(5))
            .unwrap()
            .with_retry_policy(retry)
            .with_rate_limit_policy(limits)
    }

    pub fn config(&self, output_dir: &Path) -> PaymoConfig {
        PaymoConfig {
            api_key: Some("test-key".into()),
            base_url: self.base_url.clone(),
            output_dir: output_dir.to_path_buf(),
            timeout_secs: 5,
            rate_limit: RateLimitConfig {
                max_attempts: 4,
                base_delay_ms: 5,
                max_delay_ms: 20,
                low_water: 0,
                backpressure_ms: 1,
                pacing_ms: 1,
            },
            ..PaymoConfig::default()
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn count_requests(&self, prefix: &str) -> usize {
        self.requests().iter().filter(|r| r.starts_with(prefix)).count()
    }

    pub fn created(&self) -> Vec<Value> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn set_throttle(&self, count: u32) {
        self.state.lock().unwrap().throttle = count;
    }
}

pub fn project(id: u64, name: &str, active: bool) -> Value {
    json!({"id": id, "name": name, "client_id": 1, "client_name": "Acme", "active": active})
}

pub fn task(id: u64, project_id: u64, name: &str) -> Value {
    json!({"id": id, "project_id": project_id, "name": name, "billable": true})
}

/// A one-hour entry starting at `start` (RFC 3339, UTC).
pub fn entry(
    id: u64,
    task_id: u64,
    project_id: u64,
    start: &str,
    invoice_item_id: Option<u64>,
    billed: bool,
) -> Value {
    json!({
        "id": id,
        "task_id": task_id,
        "project_id": project_id,
        "date": &start[..10],
        "start_time": start,
        "duration": 3600,
        "description": format!("<p>entry {id}</p>"),
        "billed": billed,
        "invoice_item_id": invoice_item_id,
    })
}

pub fn invoice(id: u64, number: &str, date: &str, status: &str, item_ids: &[u64]) -> Value {
    let items: Vec<Value> = item_ids
        .iter()
        .map(|&item| json!({"id": item, "item": format!("Line {item}"), "price": 100.0}))
        .collect();
    json!({
        "id": id,
        "number": number,
        "client_id": 1,
        "client_name": "Acme",
        "status": status,
        "total": 100.0 * item_ids.len() as f64,
        "date": date,
        "invoiceitems": items,
    })
}

fn with_quota(remaining: u32, body: Value) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    headers.insert("x-ratelimit-limit", HeaderValue::from_static("200"));
    headers.insert("x-ratelimit-decay-period", HeaderValue::from_static("60"));
    (StatusCode::OK, headers, Json(body)).into_response()
}

fn throttled(retry_after: Option<u64>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
    if let Some(secs) = retry_after {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    (StatusCode::TOO_MANY_REQUESTS, headers, "Too Many Requests").into_response()
}

fn query_param(uri: &Uri, name: &str) -> Option<u64> {
    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .and_then(|(_, value)| value.parse().ok())
}

fn find(records: &[Value], id: &str) -> Option<Value> {
    records.iter().find(|r| r["id"].to_string() == id).cloned()
}

async fn handle(
    State(state): State<Arc<Mutex<MockState>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut s = state.lock().unwrap();
    s.requests.push(format!("{method} {uri}"));

    if s.throttle > 0 {
        s.throttle -= 1;
        return throttled(s.retry_after);
    }

    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Basic "));
    if s.unauthorized || !authorized {
        return (StatusCode::UNAUTHORIZED, "invalid credentials").into_response();
    }

    let remaining = s.remaining.unwrap_or(99);
    let path = uri.path().trim_start_matches("/api/").to_string();
    let segments: Vec<&str> = path.split('/').collect();

    match (method, segments.as_slice()) {
        (Method::GET, ["projects"]) => with_quota(remaining, json!({"projects": s.projects})),
        (Method::GET, ["tasks"]) => with_quota(remaining, json!({"tasks": s.tasks})),
        (Method::GET, ["tasks", id]) => match find(&s.tasks, id) {
            Some(task) => with_quota(remaining, json!({"tasks": [task]})),
            None => (StatusCode::NOT_FOUND, "task not found").into_response(),
        },
        (Method::GET, ["entries"]) => {
            let paging = (query_param(&uri, "page"), query_param(&uri, "page_size"));
            let page = match (s.paginate, paging) {
                (true, (Some(page), Some(size))) => s
                    .entries
                    .iter()
                    .skip(((page - 1) * size) as usize)
                    .take(size as usize)
                    .cloned()
                    .collect(),
                _ => s.entries.clone(),
            };
            with_quota(remaining, json!({"entries": page}))
        }
        (Method::POST, ["entries"]) => {
            let Ok(mut created) = serde_json::from_slice::<Value>(&body) else {
                return (StatusCode::BAD_REQUEST, "invalid json").into_response();
            };
            if s.reject_description.as_deref().is_some_and(|d| created["description"] == d) {
                return (StatusCode::UNPROCESSABLE_ENTITY, "entry rejected").into_response();
            }
            s.next_id += 1;
            created["id"] = json!(s.next_id);
            s.created.push(created.clone());
            s.entries.push(created.clone());
            with_quota(remaining, json!({"entries": [created]}))
        }
        (Method::DELETE, ["entries", id]) => {
            let before = s.entries.len();
            s.entries.retain(|e| e["id"].to_string() != *id);
            if s.entries.len() == before {
                (StatusCode::NOT_FOUND, "entry not found").into_response()
            } else {
                with_quota(remaining, Value::Null)
            }
        }
        (Method::GET, ["invoices"]) => {
            let listed: Vec<Value> = s
                .invoices
                .iter()
                .cloned()
                .map(|mut i| {
                    i["invoiceitems"] = json!([]);
                    i
                })
                .collect();
            with_quota(remaining, json!({"invoices": listed}))
        }
        (Method::GET, ["invoices", id]) => match find(&s.invoices, id) {
            Some(invoice) => with_quota(remaining, json!({"invoices": [invoice]})),
            None => (StatusCode::NOT_FOUND, "invoice not found").into_response(),
        },
        _ => (StatusCode::NOT_FOUND, "no such endpoint").into_response(),
    }
}
