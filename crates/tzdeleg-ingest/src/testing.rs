//! In-memory source used by engine and controller tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tzdeleg_core::Amount;

use crate::source::{
    DelegationSource, LowerBound, OperationStatus, PageQuery, RawAccount, RawDelegation,
};
use crate::{Error, Result};

/// Build a source record.
pub(crate) fn raw(id: i64, level: i64, ts: DateTime<Utc>, status: OperationStatus) -> RawDelegation {
    RawDelegation {
        id,
        level,
        timestamp: ts,
        block: format!("B{level}"),
        hash: format!("op{id}"),
        sender: RawAccount {
            address: format!("tz1delegator{id}"),
            alias: None,
        },
        new_delegate: Some(RawAccount {
            address: "tz1baker".to_string(),
            alias: Some("Baker".to_string()),
        }),
        prev_delegate: None,
        amount: Amount::from(1_000 + id as u64),
        status,
    }
}

/// A source that serves a fixed, id-ordered set of records and honours the
/// lower bound, offset and limit of each query.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    ops: Mutex<Vec<RawDelegation>>,
    fail_next: AtomicU32,
    fail_from_offset: Mutex<Option<usize>>,
    fail_once_at: Mutex<Option<usize>>,
    count_override: Mutex<Option<u64>>,
    queries: Mutex<Vec<PageQuery>>,
    page_delay: Mutex<Option<Duration>>,
}

impl ScriptedSource {
    pub(crate) fn new(ops: Vec<RawDelegation>) -> Self {
        let source = Self::default();
        source.extend(ops);
        source
    }

    pub(crate) fn extend(&self, ops: Vec<RawDelegation>) {
        let mut all = self.ops.lock();
        all.extend(ops);
        all.sort_by_key(|op| op.id);
    }

    /// Fail the next `n` page fetches with a server error.
    pub(crate) fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every page fetch at or beyond `offset`.
    pub(crate) fn fail_from_offset(&self, offset: usize) {
        *self.fail_from_offset.lock() = Some(offset);
    }

    /// Fail the first fetch at exactly `offset`.
    pub(crate) fn fail_once_at_offset(&self, offset: usize) {
        *self.fail_once_at.lock() = Some(offset);
    }

    pub(crate) fn clear_failures(&self) {
        self.fail_next.store(0, Ordering::SeqCst);
        *self.fail_from_offset.lock() = None;
        *self.fail_once_at.lock() = None;
    }

    pub(crate) fn report_count(&self, count: u64) {
        *self.count_override.lock() = Some(count);
    }

    pub(crate) fn delay_pages(&self, delay: Duration) {
        *self.page_delay.lock() = Some(delay);
    }

    pub(crate) fn queries(&self) -> Vec<PageQuery> {
        self.queries.lock().clone()
    }

    fn matches(op: &RawDelegation, bound: LowerBound) -> bool {
        match bound {
            LowerBound::None => true,
            LowerBound::Level(level) => op.level >= level,
            LowerBound::Timestamp(ts) => op.timestamp >= ts,
        }
    }
}

#[async_trait]
impl DelegationSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_page(
        &self,
        query: &PageQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawDelegation>> {
        self.queries.lock().push(*query);

        let delay = *self.page_delay.lock();
        if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }

        let once = {
            let mut at = self.fail_once_at.lock();
            if *at == Some(query.offset) {
                *at = None;
                true
            } else {
                false
            }
        };
        let failing = once
            || self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            || self
                .fail_from_offset
                .lock()
                .is_some_and(|offset| query.offset >= offset);
        if failing {
            return Err(Error::Status {
                status: 500,
                body: "scripted failure".to_string(),
            });
        }

        Ok(self
            .ops
            .lock()
            .iter()
            .filter(|op| Self::matches(op, query.lower_bound))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn count_applied_since(
        &self,
        since: DateTime<Utc>,
        _cancel: &CancellationToken,
    ) -> Result<u64> {
        if let Some(count) = *self.count_override.lock() {
            return Ok(count);
        }
        Ok(self
            .ops
            .lock()
            .iter()
            .filter(|op| op.status == OperationStatus::Applied && op.timestamp >= since)
            .count() as u64)
    }
}
