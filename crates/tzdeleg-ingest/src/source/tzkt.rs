//! HTTP client for the TzKT delegation endpoints.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tzdeleg_core::metrics::{increment_labeled, record_histogram};

use super::{DelegationSource, LowerBound, PageQuery, RateLimiter, RawDelegation, RetryPolicy};
use crate::{Error, Result};

const DELEGATIONS_PATH: &str = "/v1/operations/delegations";
const COUNT_PATH: &str = "/v1/operations/delegations/count";

/// Longest error body kept in [`Error::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Configuration for [`TzktClient`].
#[derive(Debug, Clone)]
pub struct TzktConfig {
    /// API root, e.g. `https://api.tzkt.io`.
    pub base_url: String,

    /// Per-attempt request timeout.
    pub request_timeout: Duration,

    /// Retry behaviour for transient failures.
    pub retry: RetryPolicy,

    /// Sustained request rate.
    pub rate_limit_per_second: u32,

    /// Bucket capacity.
    pub rate_limit_burst: u32,
}

impl Default for TzktConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.tzkt.io".to_string(),
            request_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            rate_limit_per_second: 10,
            rate_limit_burst: 10,
        }
    }
}

/// TzKT API client.
///
/// Cheap to clone; clones share the connection pool and the rate limiter.
#[derive(Debug, Clone)]
pub struct TzktClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    limiter: Arc<RateLimiter>,
}

impl TzktClient {
    /// Build a client from configuration.
    pub fn new(config: TzktConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("tzdeleg-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: config.retry,
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit_per_second,
                config.rate_limit_burst,
            )),
        })
    }

    /// The API root this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` with `params`, retried and rate limited, decoded as JSON.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &'static str,
        params: &[(&'static str, String)],
        cancel: &CancellationToken,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let url = url.as_str();
        self.retry
            .run(path, cancel, || self.attempt(url, params, cancel))
            .await
    }

    /// One rate-limited attempt. Records latency and outcome.
    async fn attempt<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&'static str, String)],
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.limiter.acquire(cancel).await?;

        let start = Instant::now();
        let result = tokio::select! {
            r = self.send(url, params) => r,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };

        record_histogram("source_request_duration_seconds", start.elapsed().as_secs_f64());
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) if e.is_transient() => "retryable",
            Err(Error::Cancelled) => "cancelled",
            Err(_) => "failed",
        };
        increment_labeled("source_requests_total", "outcome", outcome);

        result
    }

    async fn send<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&'static str, String)],
    ) -> Result<T> {
        tracing::debug!("GET {} {:?}", url, params);

        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Query parameters for a delegation page.
fn page_params(query: &PageQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("limit", query.limit.to_string())];
    if query.offset > 0 {
        params.push(("offset", query.offset.to_string()));
    }
    match query.lower_bound {
        LowerBound::None => {}
        LowerBound::Level(level) => params.push(("level.ge", level.to_string())),
        LowerBound::Timestamp(ts) => params.push(("timestamp.ge", rfc3339(ts))),
    }
    params.push(("sort.asc", "id".to_string()));
    params.push(("status", "applied".to_string()));
    params
}

#[async_trait]
impl DelegationSource for TzktClient {
    fn name(&self) -> &'static str {
        "tzkt"
    }

    async fn fetch_page(
        &self,
        query: &PageQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawDelegation>> {
        let page: Vec<RawDelegation> = self
            .get_json(DELEGATIONS_PATH, &page_params(query), cancel)
            .await?;
        tracing::debug!(
            "Fetched {} delegations (offset {})",
            page.len(),
            query.offset
        );
        Ok(page)
    }

    async fn count_applied_since(
        &self,
        since: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let params = [
            ("timestamp.ge", rfc3339(since)),
            ("status", "applied".to_string()),
        ];
        self.get_json(COUNT_PATH, &params, cancel).await
    }
}
