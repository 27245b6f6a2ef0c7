// Motion Play — Error Types
//
// One enum per boundary. Sensor faults stay inside the acquisition loop;
// capture faults are reported and logged but never stop acquisition.

use thiserror::Error;

/// A single sensor read went wrong. Transient by assumption: the loop
/// counts it, skips the reading and carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorReadError {
    #[error("sensor position {0} is not active")]
    Inactive(u8),

    #[error("sensor position {0} does not exist")]
    NoSuchPosition(u8),

    #[error("bus error on position {position}: {message}")]
    Bus { position: u8, message: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("capture buffer full ({capacity} readings), reading rejected")]
    Full { capacity: usize },

    #[error("could not reserve {bytes} bytes for the capture buffer")]
    Reservation { bytes: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("encoded capture needs {required} bytes, transport limit is {limit}")]
    SerializationOverflow { required: usize, limit: usize },

    #[error("capture could not be encoded: {0}")]
    Encoding(String),

    #[error("transmit failed: {0}")]
    TransmitFailure(String),

    #[error("acquisition did not acknowledge the pause within {0} ms")]
    PauseTimeout(u32),

    #[error("no readings in the requested capture window")]
    EmptyWindow,
}

/// Malformed data at the ingest boundary.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("message is not valid JSON for the capture schema: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("payload is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("payload length {0} is not a multiple of the 9-byte record size")]
    TruncatedRecord(usize),

    #[error("message declares {declared} readings, payload holds {actual}")]
    CountMismatch { declared: usize, actual: usize },

    #[error("invalid field: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The key would fall on the legacy side of the magnitude threshold and
    /// decode to the wrong time.
    #[error("composite key {key} is below the scheme threshold and would decode as legacy")]
    Ambiguous { key: u64 },

    #[error("sensor position {0} does not fit the key's position digit")]
    PositionOutOfRange(u8),

    #[error("relative timestamp {0} overflows the composite key")]
    Overflow(u64),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("configuration validation error: {0}")]
    Invalid(String),
}
