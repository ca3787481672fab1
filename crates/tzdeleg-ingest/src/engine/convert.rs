//! Conversion from source records to stored delegations.

use tzdeleg_core::Delegation;
use tzdeleg_core::metrics::increment;

use crate::source::{OperationStatus, RawDelegation};

/// Convert one record, or `None` if it was not applied.
pub fn to_delegation(raw: RawDelegation) -> Option<Delegation> {
    if raw.status != OperationStatus::Applied {
        return None;
    }

    Some(Delegation {
        operation_hash: raw.hash,
        level: raw.level,
        timestamp: raw.timestamp,
        delegator: raw.sender.address,
        amount: raw.amount,
        block_hash: raw.block,
        baker: raw.new_delegate.map(|d| d.address),
    })
}

/// Convert a page, dropping everything that was not applied.
pub fn convert_page(page: Vec<RawDelegation>) -> Vec<Delegation> {
    let total = page.len();
    let converted: Vec<_> = page.into_iter().filter_map(to_delegation).collect();

    let discarded = total - converted.len();
    if discarded > 0 {
        tracing::debug!("Discarded {} non-applied operations", discarded);
        increment("delegations_discarded_total", discarded as u64);
    }

    converted
}

/// Remove and return the delegations below `level`, leaving the rest in
/// `buffer`. With no level, the whole buffer is returned.
///
/// A page that ends on a block may not hold all of that block's operations,
/// so its highest level is only complete once the following page arrives.
pub(super) fn take_below_level(
    buffer: &mut Vec<Delegation>,
    level: Option<i64>,
) -> Vec<Delegation> {
    let Some(level) = level else {
        return std::mem::take(buffer);
    };
    let (ready, held): (Vec<_>, Vec<_>) = std::mem::take(buffer)
        .into_iter()
        .partition(|d| d.level < level);
    *buffer = held;
    ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::raw;
    use chrono::Utc;

    #[test]
    fn test_only_applied_survive() {
        let now = Utc::now();
        let page = vec![
            raw(1, 10, now, OperationStatus::Applied),
            raw(2, 10, now, OperationStatus::Failed),
            raw(3, 11, now, OperationStatus::Backtracked),
            raw(4, 11, now, OperationStatus::Skipped),
            raw(5, 12, now, OperationStatus::Unknown),
            raw(6, 12, now, OperationStatus::Applied),
        ];

        let converted = convert_page(page);
        let hashes: Vec<_> = converted.iter().map(|d| d.operation_hash.as_str()).collect();
        assert_eq!(hashes, vec!["op1", "op6"]);
    }

    #[test]
    fn test_field_mapping() {
        let now = Utc::now();
        let d = to_delegation(raw(7, 99, now, OperationStatus::Applied)).unwrap();

        assert_eq!(d.operation_hash, "op7");
        assert_eq!(d.level, 99);
        assert_eq!(d.timestamp, now);
        assert_eq!(d.delegator, "tz1delegator7");
        assert_eq!(d.amount.as_str(), "1007");
        assert_eq!(d.block_hash, "B99");
        assert_eq!(d.baker.as_deref(), Some("tz1baker"));
    }

    #[test]
    fn test_take_below_level_holds_trailing_block() {
        let now = Utc::now();
        let mut buffer = convert_page(vec![
            raw(1, 10, now, OperationStatus::Applied),
            raw(2, 11, now, OperationStatus::Applied),
            raw(3, 12, now, OperationStatus::Applied),
            raw(4, 12, now, OperationStatus::Applied),
        ]);

        let ready = take_below_level(&mut buffer, Some(12));
        let levels: Vec<_> = ready.iter().map(|d| d.level).collect();
        assert_eq!(levels, vec![10, 11]);
        assert_eq!(buffer.len(), 2);

        let rest = take_below_level(&mut buffer, None);
        assert_eq!(rest.len(), 2);
        assert!(buffer.is_empty());
    }
}
