//! Core types, validation, and shared utilities for the Tezos delegation indexer.
//!
//! This crate provides:
//! - The [`Delegation`] record and its arbitrary-precision [`Amount`]
//! - The durable ingestion [`Cursor`]
//! - Calendar helpers for year filters and configured start dates
//! - Prometheus metrics helpers
//! - Shared error types

mod delegation;
mod error;
pub mod metrics;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Tezos mainnet genesis date: June 30, 2018.
/// Historical indexing never needs to start before this date.
pub const TEZOS_GENESIS_DATE: &str = "2018-06-30";

/// Default start date for historical indexing when the store is empty.
pub const DEFAULT_HISTORICAL_START_DATE: &str = "2021-01-01";

pub use delegation::{
    Amount, Cursor, Delegation, parse_start_date, sum_amounts, year_bounds,
};
pub use error::{Error, Result};
