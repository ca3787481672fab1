//! Delegation source adapters.
//!
//! This module provides the client side of the pipeline: fetching pages of
//! delegation operations from the remote indexer API.
//!
//! # Components
//!
//! - [`DelegationSource`] - Uniform interface the engine fetches through
//! - [`TzktClient`] - HTTP implementation against the TzKT API
//! - [`RateLimiter`] - Token bucket shared by every outbound request
//! - [`RetryPolicy`] - Bounded retry for transient failures
//! - [`spawn_page_producer`] - Streaming producer for historical backfill
//!
//! # Pagination
//!
//! Every query sorts ascending by the source's internal operation id, so
//! offset pagination stays stable even when many operations share a level.
//! An empty page is the only "no more data" signal.

mod models;
mod rate_limit;
mod retry;
mod stream;
mod tzkt;

pub use models::{OperationStatus, RawAccount, RawDelegation};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use stream::{ProducerSummary, spawn_page_producer};
pub use tzkt::{TzktClient, TzktConfig};

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Largest page the source accepts.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Lower bound applied to a page query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LowerBound {
    /// No bound: start from the first operation.
    #[default]
    None,
    /// `level >= n`
    Level(i64),
    /// `timestamp >= t`
    Timestamp(DateTime<Utc>),
}

/// One page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    /// Page size, clamped to `1..=MAX_PAGE_SIZE`.
    pub limit: usize,
    /// Number of matching operations to skip.
    pub offset: usize,
    /// Lower bound on level or timestamp.
    pub lower_bound: LowerBound,
}

impl PageQuery {
    /// Query with no lower bound.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.clamp(1, MAX_PAGE_SIZE),
            offset: 0,
            lower_bound: LowerBound::None,
        }
    }

    /// Operations with `level >= level`.
    pub fn since_level(level: i64, limit: usize) -> Self {
        Self {
            lower_bound: LowerBound::Level(level),
            ..Self::new(limit)
        }
    }

    /// Operations with `timestamp >= since`.
    pub fn since_time(since: DateTime<Utc>, limit: usize) -> Self {
        Self {
            lower_bound: LowerBound::Timestamp(since),
            ..Self::new(limit)
        }
    }

    /// Same query, skipping `offset` operations.
    pub fn with_offset(self, offset: usize) -> Self {
        Self { offset, ..self }
    }
}

/// A paginated source of delegation operations.
///
/// Implementations ask the remote side for `applied` operations only, sorted
/// ascending by insertion order. Callers still check status on every record.
#[async_trait]
pub trait DelegationSource: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &'static str;

    /// Fetch one page. An empty page means no more data for this query.
    async fn fetch_page(
        &self,
        query: &PageQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawDelegation>>;

    /// Authoritative count of applied operations with `timestamp >= since`.
    async fn count_applied_since(
        &self,
        since: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<u64>;
}
