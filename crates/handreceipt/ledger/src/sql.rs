//! Helpers shared by the sqlx-backed entry stores.

use crate::{LedgerError, LedgerResult};

/// Map a driver error, classifying uniqueness and trigger rejections.
pub fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return LedgerError::DuplicateEvent(db_err.message().to_string());
        }
        if db_err.message().contains("immutable") {
            return LedgerError::ImmutableEntry(db_err.message().to_string());
        }
    }
    LedgerError::backend(operation, err)
}

/// [`map_sqlx_error`] for inserts, naming the rejected event id.
pub fn map_insert_error(event_id: &str, err: sqlx::Error) -> LedgerError {
    match map_sqlx_error("insert ledger entry", err) {
        LedgerError::DuplicateEvent(_) => LedgerError::DuplicateEvent(event_id.to_string()),
        other => other,
    }
}

pub fn to_i64<T>(value: T) -> LedgerResult<i64>
where
    T: TryInto<i64> + Copy + std::fmt::Display,
{
    value
        .try_into()
        .map_err(|_| LedgerError::InvalidInput(format!("value {value} exceeds i64")))
}

pub fn to_u64(value: i64) -> LedgerResult<u64> {
    u64::try_from(value)
        .map_err(|_| LedgerError::Serialization(format!("negative stored value {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_reject_out_of_range_values() {
        assert!(to_i64(u64::MAX).is_err());
        assert_eq!(to_i64(42_u64).unwrap(), 42);
        assert_eq!(to_i64(1000_usize).unwrap(), 1000);
        assert!(to_u64(-1).is_err());
        assert_eq!(to_u64(42).unwrap(), 42);
    }
}
