//! Steady-state polling for new delegations.

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tzdeleg_core::Delegation;
use tzdeleg_core::metrics::increment;

use super::IngestionEngine;
use super::convert::{convert_page, take_below_level};
use crate::source::PageQuery;
use crate::{Error, Result};

/// Summary of one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    /// First level requested, or `None` when the tick seeded an empty store
    /// by time.
    pub from_level: Option<i64>,
    /// Records received from the source, before status filtering.
    pub fetched: u64,
    /// Rows written (inserted or updated).
    pub stored: u64,
    /// Highest level durably stored after the tick.
    pub highest_level: i64,
}

impl IngestionEngine {
    /// Fetch and persist everything newer than the store's highest level.
    ///
    /// Full pages are followed by offset pages until a short page arrives.
    /// Each page is persisted as it arrives, except for the highest level of
    /// a full page, which waits for the next page. A tick that fails midway
    /// therefore never stores part of a block, and the next tick refetches
    /// it from the stored highest level.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> Result<PollOutcome> {
        let highest = self.store.highest_level().await?;
        self.advance_level(highest);

        let (query, from_level) = if highest == 0 {
            let since = Utc::now() - self.config.seed_window;
            tracing::info!("Store is empty, seeding from {}", since);
            (PageQuery::since_time(since, self.config.seed_page_size), None)
        } else {
            let from = highest + 1;
            (PageQuery::since_level(from, self.config.poll_page_size), Some(from))
        };

        let mut outcome = PollOutcome {
            from_level,
            fetched: 0,
            stored: 0,
            highest_level: highest,
        };
        let mut offset = 0;
        let mut pending: Vec<Delegation> = Vec::new();

        loop {
            let page = self
                .source
                .fetch_page(&query.with_offset(offset), cancel)
                .await?;
            let len = page.len();
            let full = len >= query.limit;
            let tail_level = page.iter().map(|op| op.level).max();
            outcome.fetched += len as u64;

            pending.extend(convert_page(page));
            // A full page may end partway through its last block.
            let batch = take_below_level(&mut pending, tail_level.filter(|_| full));
            if !batch.is_empty() {
                let written = self.persist(&batch).await?;
                outcome.stored += written.total();
            }

            if !full {
                break;
            }
            offset += len;
        }

        outcome.highest_level = self.last_indexed_level().max(highest);
        Ok(outcome)
    }

    /// Tick until `stop` fires. Ticks never overlap, and a tick in flight
    /// is allowed to finish within the tick timeout.
    pub(super) async fn poll_loop(&self, stop: &CancellationToken) {
        tracing::info!(
            "Starting poll loop (interval: {:?}, tick timeout: {:?})",
            self.config.poll_interval,
            self.config.tick_timeout
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // In-flight requests are bounded by the tick timeout, not by stop.
        let tick_cancel = CancellationToken::new();

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {}
            }

            increment("poll_ticks_total", 1);
            let result = tokio::time::timeout(self.config.tick_timeout, self.poll_once(&tick_cancel))
                .await
                .unwrap_or(Err(Error::Timeout {
                    operation: "poll tick",
                    after: self.config.tick_timeout,
                }));

            match result {
                Ok(outcome) if outcome.stored > 0 => {
                    tracing::info!(
                        "Poll stored {} delegations, highest level {}",
                        outcome.stored,
                        outcome.highest_level
                    );
                }
                Ok(outcome) => {
                    tracing::debug!("Poll found nothing new above level {}", outcome.highest_level);
                }
                Err(e) => {
                    tracing::warn!("Poll tick failed: {}", e);
                    increment("poll_errors_total", 1);
                }
            }
        }

        tracing::info!("Poll loop stopped");
    }
}
