//! Ingestion engine: historical backfill followed by steady-state polling.
//!
//! # State machine
//!
//! ```text
//!   Idle ──► BackfillRunning ──► Polling ──► Stopped
//!     └──────────────────────────►┘
//! ```
//!
//! Backfill runs once at startup when enabled. A failed backfill is logged
//! and counted, and the engine moves on to polling. Polling runs until the
//! stop token fires. The durable cursor only ever advances after a batch has
//! been persisted, so a restart resumes from what is actually stored.

mod backfill;
mod backup;
pub mod convert;
mod poll;
mod verify;

pub use backfill::BackfillReport;
pub use poll::PollOutcome;
pub use verify::Verification;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tzdeleg_core::Delegation;
use tzdeleg_core::metrics::{increment, increment_labeled, set_gauge};

use crate::Result;
use crate::source::DelegationSource;
use crate::store::{EventStore, UpsertOutcome};

/// Observable engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    BackfillRunning,
    Polling,
    Stopped,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::BackfillRunning => "backfill_running",
            Self::Polling => "polling",
            Self::Stopped => "stopped",
        }
    }
}

/// Configuration for the ingestion engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Run a historical backfill before polling.
    pub historical_indexing: bool,

    /// Where a backfill starts on an empty store.
    pub historical_start: DateTime<Utc>,

    /// Skip backfill when the resume point is this recent.
    pub freshness_window: TimeDelta,

    /// Page size for backfill fetches.
    pub backfill_page_size: usize,

    /// Pages buffered between the backfill producer and consumer.
    pub channel_capacity: usize,

    /// Buffered delegations that trigger a backfill flush.
    pub flush_threshold: usize,

    /// Deadline for the whole backfill pipeline.
    pub backfill_timeout: Duration,

    /// Time between poll ticks.
    pub poll_interval: Duration,

    /// Page size for incremental polling.
    pub poll_page_size: usize,

    /// Page size for the first poll on an empty store.
    pub seed_page_size: usize,

    /// How far back the first poll on an empty store looks.
    pub seed_window: TimeDelta,

    /// Deadline for one poll tick.
    pub tick_timeout: Duration,

    /// Shell command run after a backfill that processed data.
    pub backup_command: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            historical_indexing: true,
            historical_start: tzdeleg_core::parse_start_date(
                tzdeleg_core::DEFAULT_HISTORICAL_START_DATE,
            )
            .unwrap_or_default(),
            freshness_window: TimeDelta::hours(1),
            backfill_page_size: 500,
            channel_capacity: 10,
            flush_threshold: 1000,
            backfill_timeout: Duration::from_secs(2 * 3600),
            poll_interval: Duration::from_secs(30),
            poll_page_size: 100,
            seed_page_size: 1000,
            seed_window: TimeDelta::days(30),
            tick_timeout: Duration::from_secs(300),
            backup_command: None,
        }
    }
}

/// Moves delegations from a [`DelegationSource`] into an [`EventStore`].
pub struct IngestionEngine {
    source: Arc<dyn DelegationSource>,
    store: Arc<dyn EventStore>,
    config: EngineConfig,
    state: watch::Sender<EngineState>,
    last_level: AtomicI64,
}

impl IngestionEngine {
    /// Create an engine in the `Idle` state.
    pub fn new(
        source: Arc<dyn DelegationSource>,
        store: Arc<dyn EventStore>,
        config: EngineConfig,
    ) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        Self {
            source,
            store,
            config,
            state,
            last_level: AtomicI64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Highest level this engine has durably stored.
    pub fn last_indexed_level(&self) -> i64 {
        self.last_level.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: EngineState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!("Engine state {} -> {}", prev.as_str(), next.as_str());
        }
    }

    /// Run backfill (if enabled) then poll until `stop` fires.
    pub async fn run(&self, stop: CancellationToken) -> Result<()> {
        if let Ok(level) = self.store.highest_level().await {
            self.advance_level(level);
        }

        if self.config.historical_indexing {
            self.set_state(EngineState::BackfillRunning);
            match self.backfill(&stop).await {
                Ok(report) if report.skipped => {
                    tracing::info!("Historical backfill skipped, store is fresh");
                }
                Ok(report) => {
                    tracing::info!(
                        "Historical backfill complete: {} processed, {} stored in {} flushes",
                        report.processed,
                        report.stored,
                        report.flushes
                    );
                }
                Err(e) if stop.is_cancelled() && e.is_interrupted() => {
                    tracing::info!("Historical backfill interrupted by shutdown");
                }
                Err(e) => {
                    tracing::error!("Historical backfill failed: {}", e);
                    increment("backfill_failures_total", 1);
                }
            }
        }

        if !stop.is_cancelled() {
            self.set_state(EngineState::Polling);
            self.poll_loop(&stop).await;
        }

        self.set_state(EngineState::Stopped);
        Ok(())
    }

    /// Persist a batch and advance the cursor past it.
    async fn persist(&self, batch: &[Delegation]) -> Result<UpsertOutcome> {
        let Some(max_level) = batch.iter().map(|d| d.level).max() else {
            return Ok(UpsertOutcome::default());
        };
        let max_time = batch.iter().map(|d| d.timestamp).max().unwrap_or_default();

        let outcome = match self.store.upsert_batch(batch).await {
            Ok(outcome) => outcome,
            Err(e) => {
                increment_labeled("delegations_processed_total", "status", "error");
                return Err(e);
            }
        };
        self.store.update_cursor(max_level, max_time).await?;

        increment_labeled("delegations_processed_total", "status", "success");
        increment("delegations_stored_total", outcome.inserted);
        increment("delegations_updated_total", outcome.updated);
        self.advance_level(max_level);

        Ok(outcome)
    }

    fn advance_level(&self, level: i64) {
        let prev = self.last_level.fetch_max(level, Ordering::SeqCst);
        set_gauge("last_indexed_level", prev.max(level) as f64);
    }
}
