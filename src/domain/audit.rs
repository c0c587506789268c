//! Hash-chained, append-only audit trail (§6, §9 "Hash-chained audit").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub sequence: i64,
    pub category: String,
    pub payload_json: String,
    pub prev_hash: String,
    pub hash: String,
    pub ts: DateTime<Utc>,
}

/// Genesis hash for an empty chain, matching the chain's own digest width.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000";

impl AuditRecord {
    /// hash(n) = SHA-256(hash(n-1) || record(n)) where record(n) is the
    /// canonical (sequence, category, payload) tuple, not including hash(n) itself.
    pub fn compute_hash(prev_hash: &str, sequence: i64, category: &str, payload_json: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prev_hash.as_bytes());
        hasher.update(sequence.to_le_bytes());
        hasher.update(category.as_bytes());
        hasher.update(payload_json.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn new(sequence: i64, prev_hash: String, category: impl Into<String>, payload_json: String, ts: DateTime<Utc>) -> Self {
        let category = category.into();
        let hash = Self::compute_hash(&prev_hash, sequence, &category, &payload_json);
        Self {
            id: Uuid::new_v4(),
            sequence,
            category,
            payload_json,
            prev_hash,
            hash,
            ts,
        }
    }

    /// Verifies this record's hash was derived correctly from its own fields.
    pub fn verify(&self) -> bool {
        self.hash == Self::compute_hash(&self.prev_hash, self.sequence, &self.category, &self.payload_json)
    }
}

/// Verifies an entire in-order chain, including that each record's prev_hash
/// matches its predecessor's hash (§8: "the hash chain is continuous").
pub fn verify_chain(records: &[AuditRecord]) -> bool {
    let mut expected_prev = GENESIS_HASH.to_string();
    for record in records {
        if record.prev_hash != expected_prev || !record.verify() {
            return false;
        }
        expected_prev = record.hash.clone();
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_of(n: usize) -> Vec<AuditRecord> {
        let mut prev = GENESIS_HASH.to_string();
        let mut records = Vec::with_capacity(n);
        for i in 0..n {
            let record = AuditRecord::new(i as i64, prev, "test_event", format!("{{\"i\":{i}}}"), Utc::now());
            prev = record.hash.clone();
            records.push(record);
        }
        records
    }

    #[test]
    fn genesis_hash_has_same_width_as_a_computed_hash() {
        let record = AuditRecord::new(0, GENESIS_HASH.to_string(), "genesis_test", "{}".to_string(), Utc::now());
        assert_eq!(record.hash.len(), GENESIS_HASH.len());
    }

    #[test]
    fn a_freshly_built_chain_verifies() {
        let records = chain_of(5);
        assert!(verify_chain(&records));
        assert!(records.iter().all(|r| r.verify()));
    }

    #[test]
    fn tampering_with_a_payload_breaks_that_records_own_hash() {
        let mut records = chain_of(3);
        records[1].payload_json = "{\"i\":999}".to_string();
        assert!(!records[1].verify());
        assert!(!verify_chain(&records));
    }

    #[test]
    fn corrupting_a_stored_hash_fails_verification() {
        let mut records = chain_of(4);
        records[1].hash = "f".repeat(GENESIS_HASH.len());
        assert!(!records[1].verify());
        assert!(!verify_chain(&records));
    }

    #[test]
    fn reordering_records_breaks_the_chain() {
        let mut records = chain_of(3);
        records.swap(0, 1);
        assert!(!verify_chain(&records));
    }
}
