//! Snapshot Fingerprints
//!
//! Deterministic hashing of round state so a mirror can tell whether an
//! inbound snapshot actually changes anything. Field order is part of the
//! format.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Hash output type (256 bits / 32 bytes)
pub type Fingerprint = [u8; 32];

/// Deterministic hasher for round state.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for round snapshots.
    pub fn for_snapshot() -> Self {
        Self::new(b"FASTEST_FINGER_SNAPSHOT_V1")
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i64 value (little-endian).
    #[inline]
    pub fn update_i64(&mut self, value: i64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with a length-prefixed string.
    pub fn update_str(&mut self, value: &str) {
        self.update_u64(value.len() as u64);
        self.hasher.update(value.as_bytes());
    }

    /// Update with an optional instant (millisecond resolution).
    pub fn update_instant(&mut self, value: Option<DateTime<Utc>>) {
        match value {
            Some(t) => {
                self.update_bool(true);
                self.update_i64(t.timestamp_millis());
            }
            None => self.update_bool(false),
        }
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> Fingerprint {
        self.hasher.finalize().into()
    }
}

/// Short hex prefix of a fingerprint, for logs.
pub fn short_hex(fingerprint: &Fingerprint) -> String {
    hex::encode(&fingerprint[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefix_separates_fields() {
        let mut a = StateHasher::for_snapshot();
        a.update_str("ab");
        a.update_str("c");

        let mut b = StateHasher::for_snapshot();
        b.update_str("a");
        b.update_str("bc");

        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_instant_presence_matters() {
        let mut a = StateHasher::for_snapshot();
        a.update_instant(None);

        let mut b = StateHasher::for_snapshot();
        b.update_instant(DateTime::from_timestamp_millis(0));

        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_short_hex() {
        let fp = [0xab; 32];
        assert_eq!(short_hex(&fp), "abababab");
    }
}
