use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// SQLite client wrapper owning the database handle
///
/// The connection is created once at startup and released when the last
/// clone drops, on every exit path. Thread-safe via internal Mutex
/// (a SQLite `Connection` is not `Sync`).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE sensor_data (
///     id TEXT PRIMARY KEY,
///     vehicle_id TEXT NOT NULL,
///     timestamp INTEGER NOT NULL,
///     voltage REAL NOT NULL,
///     current REAL NOT NULL
/// );
/// CREATE INDEX idx_sensor_data_vehicle ON sensor_data(vehicle_id);
/// ```
#[derive(Clone)]
pub struct SqliteClient {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteClient {
    /// Open (or create) the database file and bootstrap the schema
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open SQLite database at {}", path))?;

        let client = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        client.init_schema()?;
        debug!(path, "sqlite database ready");
        Ok(client)
    }

    /// Create an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("failed to create in-memory SQLite database")?;

        let client = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        client.init_schema()?;
        Ok(client)
    }

    /// Create the sensor_data table and index if absent. Idempotent.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sensor_data (
                id TEXT PRIMARY KEY,
                vehicle_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                voltage REAL NOT NULL,
                current REAL NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sensor_data_vehicle ON sensor_data(vehicle_id)",
            [],
        )?;

        Ok(())
    }

    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_created() {
        let client = SqliteClient::open_in_memory().unwrap();
        let conn = client.connection();
        let conn = conn.lock().unwrap();

        let table: String = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'sensor_data'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(table, "sensor_data");

        let index: String = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'index' AND name = 'idx_sensor_data_vehicle'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(index, "idx_sensor_data_vehicle");
    }

    #[test]
    fn test_schema_bootstrap_is_idempotent() {
        let client = SqliteClient::open_in_memory().unwrap();

        client.init_schema().unwrap();
        client.init_schema().unwrap();
    }
}
