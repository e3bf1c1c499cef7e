use crate::dedup::DedupKey;
use crate::error::DomainResult;
use crate::reading::decode_reading;
use crate::repository::{InsertDatumInput, InsertOutcome, SensorDatumRepository};
use std::sync::Arc;
use tracing::debug;

/// Outcome of ingesting one raw message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The reading was stored under this key
    Persisted(DedupKey),
    /// The key already existed; redelivered duplicate, nothing stored
    Duplicate(DedupKey),
}

/// Domain service that processes one raw payload end to end
///
/// Flow:
/// 1. Decode and validate the payload
/// 2. Derive the content-based dedup key
/// 3. Insert through the persistence gate
pub struct ReadingIngestService {
    repository: Arc<dyn SensorDatumRepository>,
}

impl ReadingIngestService {
    pub fn new(repository: Arc<dyn SensorDatumRepository>) -> Self {
        Self { repository }
    }

    /// Decode a raw payload and persist it idempotently.
    ///
    /// Decode and storage failures are returned to the caller; how they are
    /// reported (and that the pipeline keeps running) is the ingestion
    /// loop's concern.
    pub async fn ingest(&self, payload: &[u8]) -> DomainResult<IngestOutcome> {
        let reading = decode_reading(payload)?;
        let key = DedupKey::derive(&reading);

        debug!(
            vehicle_id = %reading.vehicle_id,
            timestamp = reading.timestamp,
            key = %key,
            "decoded sensor reading"
        );

        let outcome = self
            .repository
            .insert_datum(InsertDatumInput {
                id: key.clone(),
                reading,
            })
            .await?;

        Ok(match outcome {
            InsertOutcome::Inserted => IngestOutcome::Persisted(key),
            InsertOutcome::DuplicateIgnored => IngestOutcome::Duplicate(key),
        })
    }
}
