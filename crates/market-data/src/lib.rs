use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

use research_core::ResearchError;

pub mod alpha;
pub mod fmp;
pub mod finnhub;
pub mod sec;
pub mod yahoo;

pub use alpha::AlphaVantageClient;
pub use fmp::FmpClient;
pub use finnhub::FinnhubClient;
pub use sec::SecClient;
pub use yahoo::YahooClient;

/// Sliding-window rate limiter: at most `max_requests` per `window`.
pub struct RateLimiter {
    timestamps: Mutex<Vec<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_per_minute: usize) -> Self {
        Self {
            timestamps: Mutex::new(Vec::new()),
            max_requests: max_per_minute.max(1),
            window: Duration::from_secs(60),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();
            ts.retain(|t| now.duration_since(*t) < self.window);

            if ts.len() < self.max_requests {
                ts.push(now);
                return;
            }

            let oldest = ts[0];
            let sleep_dur = self.window.saturating_sub(now.duration_since(oldest));
            drop(ts);
            tracing::debug!("rate limiter: waiting {:?} for upstream slot", sleep_dur);
            tokio::time::sleep(sleep_dur + Duration::from_millis(25)).await;
        }
    }
}

/// Shared HTTP plumbing for every vendor client: per-call timeout, sliding
/// rate limit, in-flight concurrency cap, and a short 429 wait-and-retry.
pub struct HttpFetcher {
    client: Client,
    rate_limiter: RateLimiter,
    concurrency: Semaphore,
}

impl HttpFetcher {
    pub fn new(rate_per_minute: usize, max_concurrent: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .pool_max_idle_per_host(max_concurrent.max(1))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            rate_limiter: RateLimiter::new(rate_per_minute),
            concurrency: Semaphore::new(max_concurrent.max(1)),
        }
    }

    async fn send(
        &self,
        url: &str,
        query: &[(String, String)],
        headers: &[(&str, String)],
    ) -> Result<reqwest::Response, ResearchError> {
        let _permit = self
            .concurrency
            .acquire()
            .await
            .map_err(|_| ResearchError::upstream(None, "fetcher semaphore closed"))?;

        for attempt in 0..3u32 {
            self.rate_limiter.acquire().await;
            let mut builder = self.client.get(url).query(query);
            for (name, value) in headers {
                builder = builder.header(*name, value);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| ResearchError::upstream(None, e.to_string()))?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }
            tracing::warn!("429 from {url}, waiting before retry {}/3", attempt + 1);
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        Err(ResearchError::upstream(Some(429), format!("rate limited: {url}")))
    }

    pub async fn get_json(
        &self,
        url: &str,
        query: &[(String, String)],
        headers: &[(&str, String)],
    ) -> Result<Value, ResearchError> {
        let response = self.send(url, query, headers).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResearchError::upstream(
                Some(status.as_u16()),
                format!("HTTP {status} from {url}: {}", truncate(&body, 200)),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| ResearchError::upstream(None, format!("decode {url}: {e}")))
    }

    pub async fn get_text(
        &self,
        url: &str,
        query: &[(String, String)],
        headers: &[(&str, String)],
    ) -> Result<String, ResearchError> {
        let response = self.send(url, query, headers).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResearchError::upstream(
                Some(status.as_u16()),
                format!("HTTP {status} from {url}"),
            ));
        }
        response
            .text()
            .await
            .map_err(|e| ResearchError::upstream(None, format!("read {url}: {e}")))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Field-alias helpers. Vendor payloads disagree on names; each canonical
/// field names its accepted aliases exactly once, here in the adapter layer.
pub(crate) fn pick_f64(obj: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(v) = obj.get(*key) {
            if let Some(n) = v.as_f64() {
                if n.is_finite() {
                    return Some(n);
                }
            }
            if let Some(s) = v.as_str() {
                if let Ok(n) = s.trim().parse::<f64>() {
                    if n.is_finite() {
                        return Some(n);
                    }
                }
            }
        }
    }
    None
}

pub(crate) fn pick_i64(obj: &Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        if let Some(v) = obj.get(*key) {
            if let Some(n) = v.as_i64() {
                return Some(n);
            }
            if let Some(n) = v.as_f64() {
                return Some(n as i64);
            }
            if let Some(s) = v.as_str() {
                if let Ok(n) = s.trim().parse::<i64>() {
                    return Some(n);
                }
            }
        }
    }
    None
}

pub(crate) fn pick_str(obj: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = obj.get(*key).and_then(Value::as_str) {
            if !s.trim().is_empty() {
                return Some(s.trim().to_string());
            }
        }
    }
    None
}

pub(crate) fn pick_date(obj: &Value, keys: &[&str]) -> Option<chrono::NaiveDate> {
    let raw = pick_str(obj, keys)?;
    let day = raw.split([' ', 'T']).next()?;
    chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Shared handle passed to every vendor client.
pub type Fetcher = Arc<HttpFetcher>;
