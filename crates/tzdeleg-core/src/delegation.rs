//! Delegation records, amounts, and the ingestion cursor.
//!
//! # Identity
//!
//! A delegation is identified by its source operation hash and nothing else.
//! Several delegations can share a block level, so `(delegator, level)` must
//! never be used as a key.
//!
//! # Amounts
//!
//! Amounts are mutez balances that can exceed 64 bits. They are carried as
//! canonical decimal strings and only turned into big integers for
//! aggregation.

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use num_bigint::BigUint;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// A non-negative integer amount, stored as a canonical decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Amount(String);

impl Amount {
    /// Parse a decimal string, stripping leading zeros.
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidAmount(value.to_string()));
        }

        let canonical = value.trim_start_matches('0');
        if canonical.is_empty() {
            Ok(Self::zero())
        } else {
            Ok(Self(canonical.to_string()))
        }
    }

    /// The zero amount.
    pub fn zero() -> Self {
        Self("0".to_string())
    }

    /// Borrow the decimal representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact value as a big integer.
    pub fn to_biguint(&self) -> BigUint {
        // Digits were validated on construction.
        BigUint::parse_bytes(self.0.as_bytes(), 10).unwrap_or_default()
    }

    /// Value as `u64`, or `None` if it does not fit.
    pub fn to_u64(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl FromStr for Amount {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accepts either a JSON integer or a decimal string.
impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AmountVisitor;

        impl Visitor<'_> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Amount, E> {
                Ok(Amount::from(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Amount, E> {
                u64::try_from(v)
                    .map(Amount::from)
                    .map_err(|_| E::custom(Error::InvalidAmount(v.to_string())))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> std::result::Result<Amount, E> {
                Ok(Amount(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Amount, E> {
                Err(E::custom(Error::InvalidAmount(v.to_string())))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Amount, E> {
                Amount::parse(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

/// Exact sum of a sequence of amounts.
pub fn sum_amounts<'a, I>(amounts: I) -> BigUint
where
    I: IntoIterator<Item = &'a Amount>,
{
    amounts
        .into_iter()
        .fold(BigUint::default(), |acc, amount| acc + amount.to_biguint())
}

/// A durably stored delegation operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    /// Source operation hash. The sole deduplication key.
    pub operation_hash: String,

    /// Block level. Not unique: one block can hold many delegations.
    pub level: i64,

    /// Block timestamp.
    pub timestamp: DateTime<Utc>,

    /// Address of the delegating account.
    pub delegator: String,

    /// Delegated balance in mutez.
    pub amount: Amount,

    /// Hash of the containing block.
    pub block_hash: String,

    /// New delegate (baker) address, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baker: Option<String>,
}

/// Durable record of ingestion progress.
///
/// A zero cursor means nothing has been ingested yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Highest level ever durably stored.
    pub last_level: i64,

    /// Timestamp of the most recent durably stored delegation.
    pub last_observed_time: Option<DateTime<Utc>>,
}

impl Cursor {
    /// Whether any progress has been recorded.
    pub fn is_empty(&self) -> bool {
        self.last_level == 0 && self.last_observed_time.is_none()
    }
}

/// Half-open UTC interval `[Jan 1 year, Jan 1 year+1)`.
pub fn year_bounds(year: i32) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = Utc
        .with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .ok_or(Error::InvalidYear(year))?;
    let next = year.checked_add(1).ok_or(Error::InvalidYear(year))?;
    let end = Utc
        .with_ymd_and_hms(next, 1, 1, 0, 0, 0)
        .single()
        .ok_or(Error::InvalidYear(year))?;
    Ok((start, end))
}

/// Parse a `YYYY-MM-DD` date as UTC midnight.
pub fn parse_start_date(value: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| Error::InvalidDate {
        value: value.to_string(),
        reason: e.to_string(),
    })?;

    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| Error::InvalidDate {
            value: value.to_string(),
            reason: "no midnight for date".to_string(),
        })
}
