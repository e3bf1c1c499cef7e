use serde::Deserialize;
use thiserror::Error;

/// A decoded vehicle sensor reading
///
/// All four fields must be present and type-correct in the source payload;
/// anything else is a decode error, never a defaulted value.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub vehicle_id: String,
    /// Epoch timestamp as supplied by the producer; the unit is owned by the
    /// producer contract and stored verbatim.
    pub timestamp: i64,
    pub voltage: f64,
    pub current: f64,
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("payload is not a valid reading: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("field `vehicleId` must be a non-empty string")]
    EmptyVehicleId,

    #[error("field `{0}` must be a finite number")]
    NonFiniteNumber(&'static str),
}

/// Wire shape of the producer payload. Field names follow the producer's
/// camelCase contract; unknown extra keys are tolerated.
#[derive(Debug, Deserialize)]
struct SensorReadingWire {
    #[serde(rename = "vehicleId")]
    vehicle_id: String,
    timestamp: i64,
    voltage: f64,
    current: f64,
}

/// Decode a raw message payload into a validated [`SensorReading`].
///
/// No cross-type coercion is attempted: a string where a number is expected
/// fails, and JSON numbers that overflow to ±inf are rejected rather than
/// stored.
pub fn decode_reading(payload: &[u8]) -> Result<SensorReading, DecodeError> {
    let text = std::str::from_utf8(payload)?;
    let wire: SensorReadingWire = serde_json::from_str(text)?;

    if wire.vehicle_id.is_empty() {
        return Err(DecodeError::EmptyVehicleId);
    }
    if !wire.voltage.is_finite() {
        return Err(DecodeError::NonFiniteNumber("voltage"));
    }
    if !wire.current.is_finite() {
        return Err(DecodeError::NonFiniteNumber("current"));
    }

    Ok(SensorReading {
        vehicle_id: wire.vehicle_id,
        timestamp: wire.timestamp,
        voltage: wire.voltage,
        current: wire.current,
    })
}
