//! Error types for delegation records and their validation.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or validating delegation data.
#[derive(Error, Debug)]
pub enum Error {
    /// Amount is not a non-negative decimal integer.
    #[error("invalid amount '{0}': expected a non-negative decimal integer")]
    InvalidAmount(String),

    /// Year cannot be turned into a UTC interval.
    #[error("invalid year: {0}")]
    InvalidYear(i32),

    /// Date string could not be parsed or is out of range.
    #[error("invalid date '{value}': {reason}")]
    InvalidDate {
        /// The rejected input.
        value: String,
        /// Description of what's wrong.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_amount_display() {
        let err = Error::InvalidAmount("-12".to_string());
        let msg = err.to_string();
        assert!(msg.contains("-12"));
        assert!(msg.contains("non-negative"));
    }

    #[test]
    fn test_invalid_date_display() {
        let err = Error::InvalidDate {
            value: "2021-13-01".to_string(),
            reason: "input is out of range".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("2021-13-01"));
        assert!(msg.contains("out of range"));
    }
}
