use crate::reading::SensorReading;
use sha2::{Digest, Sha256};

/// Deterministic, content-derived identifier for a sensor reading, used as
/// the persistence primary key.
///
/// Two decodes of bit-identical payloads yield the same key, which is what
/// makes at-least-once redelivery safe to persist repeatedly: the store's
/// uniqueness constraint collapses duplicates instead of minting new rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    /// Derive the key from the full reading content.
    ///
    /// Hashes the vehicle id plus the exact bit patterns of the numeric
    /// fields; no wall-clock or randomness is involved.
    pub fn derive(reading: &SensorReading) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(reading.vehicle_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(reading.timestamp.to_be_bytes());
        hasher.update(reading.voltage.to_bits().to_be_bytes());
        hasher.update(reading.current.to_bits().to_be_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
