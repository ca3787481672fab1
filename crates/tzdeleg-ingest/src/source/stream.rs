//! Streaming page producer for historical backfill.
//!
//! The producer walks a query with offset pagination and pushes each
//! non-empty page into a bounded channel. A full channel blocks the
//! producer, so the fetch rate never outruns the consumer by more than
//! `capacity` pages.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tzdeleg_core::metrics::increment;

use super::{DelegationSource, PageQuery, RawDelegation};
use crate::{Error, Result};

/// What a finished producer delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerSummary {
    /// Non-empty pages sent to the channel.
    pub pages: u64,
    /// Operations across those pages.
    pub operations: u64,
}

/// Spawn a task streaming every page of `query` into a bounded channel.
///
/// The stream ends when the source returns an empty page. The channel is
/// closed when the task finishes; the join handle reports whether it ended
/// cleanly. Cancellation is observed between pages and while blocked on a
/// full channel.
pub fn spawn_page_producer(
    source: Arc<dyn DelegationSource>,
    query: PageQuery,
    capacity: usize,
    cancel: CancellationToken,
) -> (
    mpsc::Receiver<Vec<RawDelegation>>,
    JoinHandle<Result<ProducerSummary>>,
) {
    let (tx, rx) = mpsc::channel(capacity.max(1));

    let handle = tokio::spawn(async move {
        let mut summary = ProducerSummary::default();
        let mut offset = query.offset;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let page = source
                .fetch_page(&query.with_offset(offset), &cancel)
                .await?;
            if page.is_empty() {
                tracing::debug!(
                    "Producer reached end of stream after {} pages",
                    summary.pages
                );
                return Ok(summary);
            }

            let len = page.len();
            tokio::select! {
                sent = tx.send(page) => {
                    if sent.is_err() {
                        tracing::debug!("Page consumer went away, stopping producer");
                        return Ok(summary);
                    }
                }
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }

            offset += len;
            summary.pages += 1;
            summary.operations += len as u64;
            increment("backfill_pages_total", 1);
        }
    });

    (rx, handle)
}
