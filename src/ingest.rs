// Motion Play — Ingest
//
// Receiving side of the capture pipeline: validated message in, store rows
// out. Each reading becomes one row addressed by its current-scheme
// composite key.
//
// Session-relative time of a reading is the capture's unwrapped session
// offset plus the reading's distance from the capture start on the device
// clock. Readings in the first 100 ms of a session cannot get a key that
// decodes unambiguously; they are returned separately instead of stored.

use crate::error::{KeyError, WireError};
use crate::events::{elapsed_us, CaptureReason, CaptureRecord, Direction, Reading};
use crate::keys;
use crate::wire;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreRow {
    pub key: u64,
    pub canonical_ms: u64,
    pub position: u8,
    pub proximity: u16,
    pub ambient: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestedCapture {
    pub capture_id: u32,
    pub device_id: String,
    pub session_id: String,
    pub reason: CaptureReason,
    pub direction: Option<Direction>,
    pub confidence: Option<f32>,
    pub rows: Vec<StoreRow>,
    /// Readings left out because no unambiguous key exists for them.
    pub unkeyed: Vec<Reading>,
}

pub fn relative_us(record: &CaptureRecord, reading: &Reading) -> u64 {
    record.session_offset_us + elapsed_us(record.start_timestamp, reading.timestamp) as u64
}

pub fn rows_for(record: &CaptureRecord) -> (Vec<StoreRow>, Vec<Reading>) {
    let mut rows = Vec::with_capacity(record.readings.len());
    let mut unkeyed = Vec::new();
    for reading in &record.readings {
        match keys::encode(relative_us(record, reading), reading.position) {
            Ok(key) => rows.push(StoreRow {
                key,
                canonical_ms: keys::decode(key).canonical_ms,
                position: reading.position,
                proximity: reading.proximity,
                ambient: reading.ambient,
            }),
            Err(KeyError::Ambiguous { .. }) => unkeyed.push(*reading),
            Err(e) => {
                log::warn!("Capture {}: reading dropped: {}", record.capture_id, e);
                unkeyed.push(*reading);
            }
        }
    }
    (rows, unkeyed)
}

pub fn ingest(message: &[u8]) -> Result<IngestedCapture, WireError> {
    let record = wire::decode_capture(message)?.record;
    let (rows, unkeyed) = rows_for(&record);
    if !unkeyed.is_empty() {
        log::warn!(
            "Capture {} of {}: {} readings have no unambiguous key",
            record.capture_id,
            record.session_id,
            unkeyed.len()
        );
    }
    Ok(IngestedCapture {
        capture_id: record.capture_id,
        device_id: record.device_id,
        session_id: record.session_id,
        reason: record.reason,
        direction: record.direction,
        confidence: record.confidence,
        rows,
        unkeyed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SensorMetadata;
    use std::collections::BTreeMap;

    fn record(start: u32, offset_us: u64, cycles: u32) -> CaptureRecord {
        let mut readings = Vec::new();
        for c in 0..cycles {
            let ts = start.wrapping_add(c * 1000);
            for p in 0..6 {
                readings.push(Reading::new(ts, p, 30 + p as u16, 2));
            }
        }
        CaptureRecord {
            capture_id: 3,
            device_id: "dev".into(),
            session_id: "dev_1".into(),
            start_timestamp: start,
            session_offset_us: offset_us,
            reason: CaptureReason::MissedEvent,
            direction: None,
            confidence: None,
            readings,
        }
    }

    #[test]
    fn relative_time_survives_device_clock_wrap() {
        let rec = record(u32::MAX - 1499, 10_000_000, 3);
        let times: Vec<u64> = rec.readings.iter().step_by(6).map(|r| relative_us(&rec, r)).collect();
        assert_eq!(times, [10_000_000, 10_001_000, 10_002_000]);
    }

    #[test]
    fn every_reading_gets_its_own_row() {
        let rec = record(40_000, 2_000_000, 50);
        let (rows, unkeyed) = rows_for(&rec);
        assert!(unkeyed.is_empty());

        // Last-write-wins store: no row may overwrite another.
        let mut store = BTreeMap::new();
        for row in &rows {
            assert!(store.insert(row.key, *row).is_none());
        }
        assert_eq!(store.len(), 300);
        assert_eq!(rows[6].canonical_ms, 2_001);
        assert_eq!(rows[6].position, 0);
    }

    #[test]
    fn session_start_readings_are_set_aside() {
        let rec = record(0, 0, 150);
        let (rows, unkeyed) = rows_for(&rec);
        assert_eq!(unkeyed.len(), 100 * 6);
        assert_eq!(rows.len(), 50 * 6);
        assert_eq!(rows[0].canonical_ms, 100);
    }

    #[test]
    fn ingest_decodes_message_into_rows() {
        let rec = record(7_000, 5_000_000, 4);
        let sensors: Vec<SensorMetadata> = (0..6).map(|p| SensorMetadata::for_position(p, true)).collect();
        let bytes = wire::encode_capture(&rec, &sensors, usize::MAX).unwrap();
        let ingested = ingest(&bytes).unwrap();
        assert_eq!(ingested.rows.len(), 24);
        assert_eq!(ingested.reason, CaptureReason::MissedEvent);
        assert_eq!(ingested.rows.last().unwrap().canonical_ms, 5_003);
    }
}
