// Motion Play — Capture Wire Format
//
// One capture travels as one JSON message: metadata fields plus `payload`,
// the base64 (standard alphabet, padded) encoding of the readings packed as
// 9-byte little-endian records:
//
//   offset  size  field
//   0       4     timestamp (µs, device clock)
//   4       1     position
//   5       2     proximity
//   7       2     ambient
//
// The encoder computes the exact message size before encoding anything and
// refuses captures that would exceed the transport limit. It never
// truncates.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::config::MAX_SENSORS;
use crate::error::{CaptureError, WireError};
use crate::events::{CaptureReason, CaptureRecord, Direction, Reading, SensorMetadata};

pub const READING_WIRE_SIZE: usize = 9;

// ---------------------------------------------------------------------------
// Record packing
// ---------------------------------------------------------------------------

pub fn pack_readings(readings: &[Reading]) -> Vec<u8> {
    let mut out = Vec::with_capacity(readings.len() * READING_WIRE_SIZE);
    for r in readings {
        out.extend_from_slice(&r.timestamp.to_le_bytes());
        out.push(r.position);
        out.extend_from_slice(&r.proximity.to_le_bytes());
        out.extend_from_slice(&r.ambient.to_le_bytes());
    }
    out
}

pub fn unpack_readings(bytes: &[u8]) -> Result<Vec<Reading>, WireError> {
    if bytes.len() % READING_WIRE_SIZE != 0 {
        return Err(WireError::TruncatedRecord(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(READING_WIRE_SIZE)
        .map(|c| Reading {
            timestamp: u32::from_le_bytes([c[0], c[1], c[2], c[3]]),
            position: c[4],
            proximity: u16::from_le_bytes([c[5], c[6]]),
            ambient: u16::from_le_bytes([c[7], c[8]]),
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Message schema
// ---------------------------------------------------------------------------

/// Outbound capture message, as published and as accepted at ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureMessage {
    pub capture_id: u32,
    pub device_id: String,
    pub session_id: String,
    pub start_timestamp: u32,
    pub session_offset_us: u64,
    pub reason: CaptureReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub sample_count: usize,
    pub sensors: Vec<SensorMetadata>,
    pub payload: String,
}

impl CaptureMessage {
    fn envelope(record: &CaptureRecord, sensors: &[SensorMetadata]) -> Self {
        Self {
            capture_id: record.capture_id,
            device_id: record.device_id.clone(),
            session_id: record.session_id.clone(),
            start_timestamp: record.start_timestamp,
            session_offset_us: record.session_offset_us,
            reason: record.reason,
            direction: record.direction,
            confidence: record.confidence,
            sample_count: record.readings.len(),
            sensors: sensors.to_vec(),
            payload: String::new(),
        }
    }
}

fn encoding_error(e: serde_json::Error) -> CaptureError {
    CaptureError::Encoding(e.to_string())
}

/// Exact byte length of the encoded message for `record`.
pub fn encoded_size(record: &CaptureRecord, sensors: &[SensorMetadata]) -> Result<usize, CaptureError> {
    let envelope = serde_json::to_vec(&CaptureMessage::envelope(record, sensors)).map_err(encoding_error)?;
    // The standard alphabet needs no JSON escaping.
    let payload = base64::encoded_len(record.readings.len() * READING_WIRE_SIZE, true)
        .ok_or(CaptureError::Encoding("payload length overflows usize".into()))?;
    Ok(envelope.len() + payload)
}

/// Encode `record` into one message no longer than `limit` bytes.
pub fn encode_capture(
    record: &CaptureRecord,
    sensors: &[SensorMetadata],
    limit: usize,
) -> Result<Vec<u8>, CaptureError> {
    let required = encoded_size(record, sensors)?;
    if required > limit {
        return Err(CaptureError::SerializationOverflow { required, limit });
    }

    let mut message = CaptureMessage::envelope(record, sensors);
    message.payload = STANDARD.encode(pack_readings(&record.readings));
    let bytes = serde_json::to_vec(&message).map_err(encoding_error)?;
    debug_assert_eq!(bytes.len(), required);
    Ok(bytes)
}

// ---------------------------------------------------------------------------
// Ingest boundary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCapture {
    pub record: CaptureRecord,
    pub sensors: Vec<SensorMetadata>,
}

/// Parse and validate one inbound message. Nothing partially parsed gets
/// past this point.
pub fn decode_capture(bytes: &[u8]) -> Result<DecodedCapture, WireError> {
    let message: CaptureMessage = serde_json::from_slice(bytes)?;

    match (message.reason, message.direction, message.confidence) {
        (CaptureReason::Detection, Some(_), Some(_)) | (CaptureReason::MissedEvent, None, None) => {}
        (reason, ..) => {
            return Err(WireError::Invalid(format!(
                "direction and confidence must be present exactly for detections (reason {reason:?})"
            )))
        }
    }
    if let Some(c) = message.confidence {
        if !(0.0..=1.0).contains(&c) {
            return Err(WireError::Invalid(format!("confidence {c} outside [0, 1]")));
        }
    }

    let packed = STANDARD.decode(message.payload.as_bytes())?;
    let readings = unpack_readings(&packed)?;
    if readings.len() != message.sample_count {
        return Err(WireError::CountMismatch {
            declared: message.sample_count,
            actual: readings.len(),
        });
    }
    if let Some(r) = readings.iter().find(|r| r.position >= MAX_SENSORS) {
        return Err(WireError::Invalid(format!("reading with position {}", r.position)));
    }

    Ok(DecodedCapture {
        record: CaptureRecord {
            capture_id: message.capture_id,
            device_id: message.device_id,
            session_id: message.session_id,
            start_timestamp: message.start_timestamp,
            session_offset_us: message.session_offset_us,
            reason: message.reason,
            direction: message.direction,
            confidence: message.confidence,
            readings,
        },
        sensors: message.sensors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensors() -> Vec<SensorMetadata> {
        (0..6).map(|p| SensorMetadata::for_position(p, true)).collect()
    }

    fn record(n: usize) -> CaptureRecord {
        CaptureRecord {
            capture_id: 7,
            device_id: "motionplay-device-001".into(),
            session_id: "motionplay-device-001_1042".into(),
            start_timestamp: 5_000,
            session_offset_us: 4_000,
            reason: CaptureReason::Detection,
            direction: Some(Direction::SideAToB),
            confidence: Some(0.75),
            readings: (0..n as u32)
                .map(|i| Reading::new(5_000 + (i / 6) * 1000, (i % 6) as u8, 100 + i as u16, 7))
                .collect(),
        }
    }

    #[test]
    fn records_are_nine_bytes_little_endian() {
        let packed = pack_readings(&[Reading::new(0x0403_0201, 5, 0x0706, 0x0908)]);
        assert_eq!(packed, [1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn partial_record_is_rejected() {
        assert!(matches!(unpack_readings(&[0; 17]), Err(WireError::TruncatedRecord(17))));
    }

    #[test]
    fn predicted_size_is_exact() {
        for n in [0, 1, 2, 3, 600] {
            let rec = record(n);
            let bytes = encode_capture(&rec, &sensors(), usize::MAX).unwrap();
            assert_eq!(bytes.len(), encoded_size(&rec, &sensors()).unwrap(), "n = {n}");
        }
    }

    #[test]
    fn oversized_capture_fails_without_output() {
        let rec = record(600);
        let required = encoded_size(&rec, &sensors()).unwrap();
        let err = encode_capture(&rec, &sensors(), required - 1).unwrap_err();
        assert_eq!(
            err,
            CaptureError::SerializationOverflow {
                required,
                limit: required - 1
            }
        );
        assert!(encode_capture(&rec, &sensors(), required).is_ok());
    }

    #[test]
    fn encoded_message_decodes_to_same_record() {
        let rec = record(12);
        let bytes = encode_capture(&rec, &sensors(), usize::MAX).unwrap();
        let decoded = decode_capture(&bytes).unwrap();
        assert_eq!(decoded.record, rec);
        assert_eq!(decoded.sensors, sensors());
    }

    #[test]
    fn missed_event_omits_direction_fields() {
        let mut rec = record(6);
        rec.reason = CaptureReason::MissedEvent;
        rec.direction = None;
        rec.confidence = None;
        let bytes = encode_capture(&rec, &sensors(), usize::MAX).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains(r#""reason":"missed_event""#));
        assert!(!text.contains("direction"));
        assert!(!text.contains("confidence"));
    }

    #[test]
    fn ingest_rejects_inconsistent_messages() {
        let rec = record(6);
        let bytes = encode_capture(&rec, &sensors(), usize::MAX).unwrap();
        let mut message: CaptureMessage = serde_json::from_slice(&bytes).unwrap();

        let mut wrong_count = message.clone();
        wrong_count.sample_count = 5;
        let err = decode_capture(&serde_json::to_vec(&wrong_count).unwrap()).unwrap_err();
        assert!(matches!(err, WireError::CountMismatch { declared: 5, actual: 6 }));

        let mut no_direction = message.clone();
        no_direction.direction = None;
        let err = decode_capture(&serde_json::to_vec(&no_direction).unwrap()).unwrap_err();
        assert!(matches!(err, WireError::Invalid(_)));

        message.payload.push('!');
        let err = decode_capture(&serde_json::to_vec(&message).unwrap()).unwrap_err();
        assert!(matches!(err, WireError::Encoding(_)));

        let err = decode_capture(br#"{"capture_id": 1}"#).unwrap_err();
        assert!(matches!(err, WireError::Schema(_)));
    }
}
