//! Tezos delegation ingestion.
//!
//! This crate moves delegation operations from a remote indexer API into a
//! durable, deduplicated local store and keeps it current.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────────┐      ┌────────────────────────────────────────┐
//!   │  TzKT API        │      │  IngestionEngine                       │
//!   │  (rate limited,  │─────►│                                        │
//!   │   retried)       │      │  backfill: producer ─► mpsc ─► consumer │
//!   └──────────────────┘      │  poll:     interval ─► fetch ─► persist │
//!                             └───────────────┬────────────────────────┘
//!                                             │ upsert_batch + update_cursor
//!                                             ▼
//!                             ┌────────────────────────────────────────┐
//!                             │  EventStore (SQLite)                   │
//!                             │  delegations keyed by operation hash   │
//!                             │  singleton cursor (never regresses)    │
//!                             └────────────────────────────────────────┘
//! ```
//!
//! [`IngestionController`] owns the engine's background task and exposes
//! start/stop.

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod source;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use controller::IngestionController;
pub use engine::{
    BackfillReport, EngineConfig, EngineState, IngestionEngine, PollOutcome, Verification,
};
pub use error::{Error, Result};
pub use source::{
    DelegationSource, LowerBound, PageQuery, RateLimiter, RawDelegation, RetryPolicy, TzktClient,
    TzktConfig,
};
pub use store::{DelegationStats, EventStore, SqliteStore, StatsProvider, UpsertOutcome};
