//! Hash-chain primitives.

use chrono::Utc;
use sha2::{Digest, Sha256};

/// `prev_hash` of the first entry in a chain.
pub const GENESIS_HASH: &str = "GENESIS";

/// Content hash of one entry: hex SHA-256 of `"{event_data}:{prev_hash}:{nonce}"`.
pub fn calculate_hash(event_data: &str, prev_hash: &str, nonce: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{event_data}:{prev_hash}:{nonce}").as_bytes());
    hex::encode(hasher.finalize())
}

/// Write-time nonce: Unix time in nanoseconds.
pub fn write_nonce() -> i64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_matches_reference_digest() {
        assert_eq!(
            calculate_hash(r#"{"item_id":1}"#, GENESIS_HASH, 42),
            "ffc9761d9bbfd53fc4a257662651ce9bc234b66b6311f83d2a9978ed28f9a9b7"
        );
    }

    #[test]
    fn nonce_changes_the_hash() {
        let a = calculate_hash(r#"{"item_id":1}"#, GENESIS_HASH, 1);
        let b = calculate_hash(r#"{"item_id":1}"#, GENESIS_HASH, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn prev_hash_changes_the_hash() {
        let a = calculate_hash("x", GENESIS_HASH, 7);
        let b = calculate_hash("x", &a, 7);
        assert_ne!(a, b);
    }

    #[test]
    fn nonces_increase() {
        let first = write_nonce();
        let second = write_nonce();
        assert!(second >= first);
        assert!(first > 1_600_000_000_000_000_000);
    }
}
