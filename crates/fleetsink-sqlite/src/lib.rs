mod client;
mod sensor_datum_repository;

pub use client::SqliteClient;
pub use sensor_datum_repository::SqliteSensorDatumRepository;
