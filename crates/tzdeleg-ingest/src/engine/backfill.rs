//! One-shot historical backfill.
//!
//! A producer task streams pages from the source into a bounded channel; the
//! consumer converts, buffers and flushes them to the store. Both share a
//! child of the engine's stop token.

use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tzdeleg_core::Delegation;
use tzdeleg_core::metrics::set_gauge;

use super::convert::{convert_page, take_below_level};
use super::{IngestionEngine, Verification, backup};
use crate::source::{PageQuery, spawn_page_producer};
use crate::{Error, Result};

/// Summary of one backfill run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    /// Lower timestamp bound the run started from.
    pub resume_from: DateTime<Utc>,
    /// The store was fresh enough that nothing was fetched.
    pub skipped: bool,
    /// Applied delegations received from the source.
    pub processed: u64,
    /// Rows written (inserted or updated).
    pub stored: u64,
    /// Store flushes performed.
    pub flushes: u64,
    /// Source/store count comparison, when it could be made.
    pub verification: Option<Verification>,
}

impl BackfillReport {
    fn skipped(resume_from: DateTime<Utc>) -> Self {
        Self {
            resume_from,
            skipped: true,
            processed: 0,
            stored: 0,
            flushes: 0,
            verification: None,
        }
    }
}

/// Consumer-side progress.
#[derive(Default)]
struct Progress {
    processed: u64,
    stored: u64,
    flushes: u64,
}

impl IngestionEngine {
    /// Where the next backfill starts: just after the newest stored
    /// delegation, or the configured start date on an empty store.
    pub async fn resume_point(&self) -> Result<DateTime<Utc>> {
        Ok(match self.store.latest_timestamp().await? {
            Some(latest) => latest + TimeDelta::seconds(1),
            None => self.config.historical_start,
        })
    }

    /// Run the historical backfill once.
    pub async fn backfill(&self, stop: &CancellationToken) -> Result<BackfillReport> {
        let resume_from = self.resume_point().await?;
        if Utc::now() - resume_from < self.config.freshness_window {
            tracing::info!(
                "Store is up to date (resume point {}), skipping backfill",
                resume_from
            );
            return Ok(BackfillReport::skipped(resume_from));
        }

        tracing::info!("Starting historical backfill from {}", resume_from);
        set_gauge("backfill_running", 1.0);
        set_gauge("backfill_progress", 0.0);
        let started = Instant::now();

        let pipeline_cancel = stop.child_token();
        let result = tokio::time::timeout(
            self.config.backfill_timeout,
            self.run_pipeline(resume_from, &pipeline_cancel),
        )
        .await;
        pipeline_cancel.cancel();
        set_gauge("backfill_running", 0.0);

        let progress = match result {
            Ok(progress) => progress?,
            Err(_) => {
                return Err(Error::Timeout {
                    operation: "historical backfill",
                    after: self.config.backfill_timeout,
                });
            }
        };
        set_gauge("backfill_progress", 100.0);

        tracing::info!(
            "Backfill pipeline finished in {:?}: {} processed, {} stored",
            started.elapsed(),
            progress.processed,
            progress.stored
        );

        let verification = match self.verify(resume_from, stop).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Backfill verification failed: {}", e);
                None
            }
        };

        if progress.processed > 0 {
            if let Some(command) = &self.config.backup_command {
                backup::spawn_backup(command);
            }
        }

        Ok(BackfillReport {
            resume_from,
            skipped: false,
            processed: progress.processed,
            stored: progress.stored,
            flushes: progress.flushes,
            verification,
        })
    }

    async fn run_pipeline(
        &self,
        resume_from: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Progress> {
        let query = PageQuery::since_time(resume_from, self.config.backfill_page_size);
        let (mut pages, producer) = spawn_page_producer(
            self.source.clone(),
            query,
            self.config.channel_capacity,
            cancel.clone(),
        );

        let mut progress = Progress::default();
        let mut buffer: Vec<Delegation> = Vec::with_capacity(self.config.flush_threshold);
        let mut tail_level = None;

        while let Some(page) = pages.recv().await {
            tail_level = page.iter().map(|op| op.level).max().or(tail_level);
            let converted = convert_page(page);
            progress.processed += converted.len() as u64;
            buffer.extend(converted);

            if buffer.len() >= self.config.flush_threshold {
                // The newest block may continue on the next page.
                let batch = take_below_level(&mut buffer, tail_level);
                if batch.is_empty() {
                    continue;
                }
                if let Err(e) = self.flush(&batch, &mut progress, resume_from).await {
                    cancel.cancel();
                    return Err(e);
                }
            }
        }

        // Channel closed. A clean stream ends on a complete block; a failed
        // one may have cut its newest block short.
        let produced = producer.await?;
        let batch = match &produced {
            Ok(_) => std::mem::take(&mut buffer),
            Err(_) => take_below_level(&mut buffer, tail_level),
        };
        if !batch.is_empty() {
            self.flush(&batch, &mut progress, resume_from).await?;
        }

        let summary = produced?;
        tracing::debug!(
            "Producer delivered {} pages ({} operations)",
            summary.pages,
            summary.operations
        );
        Ok(progress)
    }

    async fn flush(
        &self,
        batch: &[Delegation],
        progress: &mut Progress,
        resume_from: DateTime<Utc>,
    ) -> Result<()> {
        let outcome = self.persist(batch).await?;
        progress.stored += outcome.total();
        progress.flushes += 1;

        if let Some(newest) = batch.iter().map(|d| d.timestamp).max() {
            let total = (Utc::now() - resume_from).num_seconds().max(1) as f64;
            let done = (newest - resume_from).num_seconds().max(0) as f64;
            set_gauge("backfill_progress", (done / total * 100.0).min(100.0));
        }

        tracing::info!(
            "Backfill flush #{}: {} inserted, {} updated ({} processed so far)",
            progress.flushes,
            outcome.inserted,
            outcome.updated,
            progress.processed
        );
        Ok(())
    }
}
