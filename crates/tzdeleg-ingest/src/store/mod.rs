//! Durable delegation storage.
//!
//! [`EventStore`] is the only interface the engine and the read path use.
//! [`SqliteStore`] is the bundled implementation.

pub mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tzdeleg_core::{Cursor, Delegation};

/// Result of persisting one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Rows whose operation hash was new.
    pub inserted: u64,
    /// Rows whose operation hash already existed and were refreshed.
    pub updated: u64,
}

impl UpsertOutcome {
    /// Rows written either way.
    pub fn total(&self) -> u64 {
        self.inserted + self.updated
    }
}

/// Aggregate statistics over the stored delegations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegationStats {
    pub total: u64,
    pub unique_delegators: u64,
    /// Exact sum of all parsable amounts, as a decimal string.
    pub total_amount: String,
    /// Rows whose amount could not be parsed and were left out of the sum.
    pub unparsable_amounts: u64,
    pub latest: Option<DateTime<Utc>>,
    pub oldest: Option<DateTime<Utc>>,
    pub highest_level: i64,
}

/// Optional statistics capability of a store.
#[async_trait]
pub trait StatsProvider: Send + Sync {
    async fn stats(&self) -> Result<DelegationStats>;
}

/// Durable, deduplicating delegation store with an ingestion cursor.
///
/// Implementations must be safe to share between the backfill consumer and
/// the poll loop.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a batch atomically. Existing operation hashes are updated in
    /// place; duplicates inside the batch resolve in order.
    async fn upsert_batch(&self, batch: &[Delegation]) -> Result<UpsertOutcome>;

    /// All delegations, newest first, optionally restricted to one UTC year.
    async fn list_all(&self, year: Option<i32>) -> Result<Vec<Delegation>>;

    /// Highest stored level, or 0 when empty.
    async fn highest_level(&self) -> Result<i64>;

    /// Whether any delegation from `delegator` exists at `level`.
    async fn exists_by_delegator_and_level(&self, delegator: &str, level: i64) -> Result<bool>;

    /// Advance the cursor. Lower values than the stored ones are ignored.
    async fn update_cursor(&self, level: i64, observed: DateTime<Utc>) -> Result<()>;

    /// Current cursor; zero when nothing was ever recorded.
    async fn read_cursor(&self) -> Result<Cursor>;

    /// Timestamp of the newest stored delegation.
    async fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>>;

    /// Number of delegations with `timestamp >= since`.
    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64>;

    /// Number of stored delegations.
    async fn count(&self) -> Result<u64>;

    /// The store's statistics capability, if it has one.
    fn stats_provider(&self) -> Option<&dyn StatsProvider> {
        None
    }
}
