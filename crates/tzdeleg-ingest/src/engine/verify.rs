//! Post-backfill completeness check.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tzdeleg_core::metrics::set_gauge;

use super::IngestionEngine;
use crate::Result;

/// Source count versus store count over the same time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    /// Applied delegations the source reports.
    pub expected: u64,
    /// Delegations in the store over the same range.
    pub stored: u64,
}

impl Verification {
    /// Delegations the source has that the store lacks.
    pub fn missing(&self) -> u64 {
        self.expected.saturating_sub(self.stored)
    }

    /// Missing share of the expected count, in percent. Zero when nothing
    /// was expected.
    pub fn missing_percent(&self) -> f64 {
        if self.expected == 0 {
            0.0
        } else {
            self.missing() as f64 / self.expected as f64 * 100.0
        }
    }

    pub fn is_short(&self) -> bool {
        self.missing() > 0
    }
}

impl IngestionEngine {
    /// Compare the source's applied count since `since` with the store's.
    ///
    /// A shortfall is reported, never repaired.
    pub async fn verify(
        &self,
        since: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Verification> {
        let expected = self.source.count_applied_since(since, cancel).await?;
        let stored = self.store.count_since(since).await?;
        let verification = Verification { expected, stored };

        set_gauge("backfill_verification_missing", verification.missing() as f64);

        if verification.is_short() {
            tracing::warn!(
                "Backfill verification: {} of {} delegations since {} missing ({:.2}%)",
                verification.missing(),
                expected,
                since,
                verification.missing_percent()
            );
        } else {
            tracing::info!(
                "Backfill verification passed: {} stored, {} reported by {}",
                stored,
                expected,
                self.source.name()
            );
        }

        Ok(verification)
    }
}
