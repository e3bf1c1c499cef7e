use crate::client::SqliteClient;
use async_trait::async_trait;
use fleetsink_domain::{
    DomainError, DomainResult, InsertDatumInput, InsertOutcome, SensorDatumRepository,
};
use rusqlite::{params, Connection};
use std::sync::Mutex;
use tracing::debug;

/// SQLite implementation of the persistence gate
///
/// Rows are inserted exactly once per dedup key; the primary-key constraint
/// is the source of truth for "duplicate". Rows are never updated or
/// deleted by this service.
#[derive(Clone)]
pub struct SqliteSensorDatumRepository {
    client: SqliteClient,
}

impl SqliteSensorDatumRepository {
    pub fn new(client: SqliteClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SensorDatumRepository for SqliteSensorDatumRepository {
    async fn insert_datum(&self, input: InsertDatumInput) -> DomainResult<InsertOutcome> {
        let conn = self.client.connection();

        // rusqlite is synchronous; keep it off the async workers
        let outcome = tokio::task::spawn_blocking(move || insert_blocking(&conn, input))
            .await
            .map_err(|e| {
                DomainError::RepositoryError(anyhow::anyhow!("insert task failed: {}", e))
            })??;

        Ok(outcome)
    }
}

fn insert_blocking(
    conn: &Mutex<Connection>,
    input: InsertDatumInput,
) -> DomainResult<InsertOutcome> {
    let conn = conn.lock().unwrap();

    let result = conn.execute(
        "INSERT INTO sensor_data (id, vehicle_id, timestamp, voltage, current)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            input.id.as_str(),
            input.reading.vehicle_id,
            input.reading.timestamp,
            input.reading.voltage,
            input.reading.current,
        ],
    );

    match result {
        Ok(_) => {
            debug!(key = %input.id, vehicle_id = %input.reading.vehicle_id, "stored sensor datum");
            Ok(InsertOutcome::Inserted)
        }
        // SQLITE_CONSTRAINT_PRIMARYKEY: the key already exists
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            Ok(InsertOutcome::DuplicateIgnored)
        }
        Err(e) => Err(DomainError::RepositoryError(e.into())),
    }
}
