pub mod dedup;
pub mod error;
pub mod ingest_service;
pub mod reading;
pub mod repository;

pub use dedup::DedupKey;
pub use error::{DomainError, DomainResult};
pub use ingest_service::{IngestOutcome, ReadingIngestService};
pub use reading::{decode_reading, DecodeError, SensorReading};
pub use repository::{InsertDatumInput, InsertOutcome, SensorDatumRepository};

#[cfg(any(test, feature = "test-util"))]
pub use repository::MockSensorDatumRepository;
