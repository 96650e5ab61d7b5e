use reqwest::{Client, Method, Response, StatusCode, header};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::{
    sync::Mutex,
    time::{Instant, sleep},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::PaymoConfig,
    error::{PaymoError, Result},
};

const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const LIMIT_HEADER: &str = "x-ratelimit-limit";
const DECAY_HEADER: &str = "x-ratelimit-decay-period";

/// Exponential backoff applied to throttled (429) responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Wait after the `attempt`-th throttled response (1-based): the base
    /// delay doubled per attempt, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.backoff(attempt);
        retry_after
            .map_or(backoff, |hint| backoff.max(hint))
            .min(self.max_delay)
    }
}

/// Pacing applied independently of the retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Below this many remaining calls every request is delayed.
    pub low_water: u32,
    pub backpressure_delay: Duration,
    /// Minimum gap between consecutive lookups or submissions in a loop.
    pub pacing_delay: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            low_water: 5,
            backpressure_delay: Duration::from_secs(2),
            pacing_delay: Duration::from_secs(2),
        }
    }
}

/// Last rate-limit budget reported by Paymo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaState {
    pub remaining: Option<u32>,
    pub limit: Option<u32>,
    pub decay_period_secs: Option<u64>,
}

impl QuotaState {
    pub fn is_low(&self, low_water: u32) -> bool {
        self.remaining.is_some_and(|remaining| remaining < low_water)
    }

    fn observe(&mut self, headers: &header::HeaderMap) {
        if let Some(remaining) = header_number(headers, REMAINING_HEADER) {
            self.remaining = Some(remaining);
        }
        if let Some(limit) = header_number(headers, LIMIT_HEADER) {
            self.limit = Some(limit);
        }
        if let Some(decay) = header_number(headers, DECAY_HEADER) {
            self.decay_period_secs = Some(decay);
        }
    }
}

fn header_number<T: std::str::FromStr>(headers: &header::HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn retry_after(response: &Response) -> Option<Duration> {
    header_number::<u64>(response.headers(), header::RETRY_AFTER.as_str()).map(Duration::from_secs)
}

/// Enforces a minimum gap between consecutive calls of a loop.
#[derive(Debug)]
pub struct Pacer {
    delay: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, last: None }
    }

    /// Returns immediately the first time, then sleeps whatever is left of
    /// the gap since the previous call.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                sleep(self.delay - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

/// HTTP client for the Paymo API with quota tracking and throttling retries.
///
/// Calls are serialized: the quota lock is held for a whole call,
/// including backoff sleeps, so concurrent callers queue up instead of
/// racing for the same budget.
#[derive(Debug)]
pub struct PaymoClient {
    http: Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
    limits: RateLimitPolicy,
    page_size: Option<u32>,
    quota: Mutex<QuotaState>,
}

impl PaymoClient {
    pub fn new(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        info!("Initializing Paymo client for {}", base_url);

        if api_key.trim().is_empty() {
            error!("Refusing to build Paymo client without an API key");
            return Err(PaymoError::Auth("API key is empty".into()));
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let http = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| {
                error!("Failed to build Paymo client: {}", e);
                PaymoError::Transport(e)
            })?;

        Ok(Self {
            http,
            api_key: api_key.trim().to_string(),
            base_url: format!("{}/", base_url.trim_end_matches('/')),
            retry: RetryPolicy::default(),
            limits: RateLimitPolicy::default(),
            page_size: None,
            quota: Mutex::new(QuotaState::default()),
        })
    }

    pub fn from_config(config: &PaymoConfig) -> Result<Self> {
        let api_key = config
            .api_key()
            .map_err(|e| PaymoError::Auth(e.to_string()))?;

        let mut client = Self::new(
            api_key,
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
        )?
        .with_retry_policy(config.retry_policy())
        .with_rate_limit_policy(config.rate_limit_policy());
        client.page_size = config.entries_page_size.filter(|&size| size > 0);
        Ok(client)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limit_policy(mut self, limits: RateLimitPolicy) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_page_size(mut self, page_size: Option<u32>) -> Self {
        self.page_size = page_size.filter(|&size| size > 0);
        self
    }

    pub fn page_size(&self) -> Option<u32> {
        self.page_size
    }

    /// A pacer using this client's lookup/submission gap.
    pub fn pacer(&self) -> Pacer {
        Pacer::new(self.limits.pacing_delay)
    }

    pub async fn quota(&self) -> QuotaState {
        *self.quota.lock().await
    }

    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.call(Method::GET, path, query, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.call(Method::POST, path, &[], Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.call(Method::DELETE, path, &[], None).await
    }

    /// Issue one logical call, retrying throttled attempts with backoff.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path.trim_start_matches('/'));
        let mut quota = self.quota.lock().await;
        let mut attempt = 0;

        loop {
            attempt += 1;

            if quota.is_low(self.limits.low_water) {
                warn!(
                    "Paymo rate limit low: {:?}/{:?} remaining (resets in {:?}s), pausing {:?}",
                    quota.remaining,
                    quota.limit,
                    quota.decay_period_secs,
                    self.limits.backpressure_delay
                );
                sleep(self.limits.backpressure_delay).await;
            }

            debug!("{} {} (attempt {})", method, url, attempt);

            let mut request = self
                .http
                .request(method.clone(), &url)
                .basic_auth(&self.api_key, Some("X"))
                .query(query);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    error!("Failed to send request to Paymo API: {}", e);
                    return Err(PaymoError::Transport(e));
                }
            };

            quota.observe(response.headers());

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return decode_response(response).await;
            }

            if attempt >= self.retry.max_attempts {
                error!("Paymo still throttling {} after {} attempts", url, attempt);
                return Err(PaymoError::RateLimit { attempts: attempt });
            }

            let wait = self.retry.delay_for(attempt, retry_after(&response));
            warn!(
                "Paymo throttled {} (attempt {}/{}), retrying in {:?}",
                url, attempt, self.retry.max_attempts, wait
            );
            sleep(wait).await;
        }
    }
}

async fn decode_response(response: Response) -> Result<Value> {
    let status = response.status();

    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        error!("Paymo API returned error status {}: {}", status, message);

        return Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PaymoError::Auth(format!(
                "Paymo rejected the API key ({status}): {message}"
            )),
            StatusCode::NOT_FOUND => PaymoError::not_found(message),
            _ => PaymoError::Remote {
                status: status.as_u16(),
                message,
            },
        });
    }

    let text = response.text().await.map_err(|e| {
        error!("Failed to read response body: {}", e);
        PaymoError::Transport(e)
    })?;

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&text).map_err(|e| {
        error!("Failed to parse Paymo response: {}", e);
        debug!("Raw response: {}", text);
        PaymoError::decode(format!("response is not JSON: {e}"))
    })
}
