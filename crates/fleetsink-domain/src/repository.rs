use crate::dedup::DedupKey;
use crate::error::DomainResult;
use crate::reading::SensorReading;
use async_trait::async_trait;

/// Input for persisting one reading under its dedup key
#[derive(Debug, Clone, PartialEq)]
pub struct InsertDatumInput {
    pub id: DedupKey,
    pub reading: SensorReading,
}

/// Outcome of an idempotent insert.
///
/// `DuplicateIgnored` is the expected result of at-least-once redelivery and
/// is not an error; storage failures surface as `Err` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    DuplicateIgnored,
}

/// Persistence gate for sensor readings.
/// Infrastructure layer (fleetsink-sqlite) implements this trait.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait SensorDatumRepository: Send + Sync {
    /// Insert a reading keyed by its dedup key.
    ///
    /// Must be safe under concurrent invocation for the same key; the
    /// store's uniqueness constraint decides what counts as a duplicate.
    async fn insert_datum(&self, input: InsertDatumInput) -> DomainResult<InsertOutcome>;
}
