// Motion Play — Capture Orchestrator
//
// ACQUIRING ──(detection | missed-event trigger)──▶ PAUSED ──▶ ACQUIRING
//
// A capture pauses the sensor task only for the buffer copy, then encodes,
// checks the size against the transport limit, sends, and drops the consumed
// readings. Every capture ends back in ACQUIRING whatever its outcome;
// failures are counted and logged, never retried.

use std::time::Duration;

use crate::buffer::SharedBuffer;
use crate::config::{ms_to_us, CaptureConfig};
use crate::error::CaptureError;
use crate::events::{elapsed_us, CaptureReason, CaptureRecord, DetectionEvent, Direction, SensorMetadata};
use crate::platform::Clock;
use crate::transport::Transport;
use crate::wire;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Acquiring,
    Paused,
}

/// Identity shared by every capture since boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub device_id: String,
    pub session_id: String,
    /// Clock reading when the session began.
    pub started_us: u64,
}

impl Session {
    pub fn begin<C: Clock + ?Sized>(device_id: &str, clock: &C) -> Self {
        let started_us = clock.now_us();
        Self {
            device_id: device_id.to_string(),
            session_id: format!("{}_{}", device_id, started_us / 1000),
            started_us,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub attempted: u64,
    pub sent: u64,
    pub bytes_sent: u64,
    pub overflows: u64,
    pub transmit_failures: u64,
    pub pause_timeouts: u64,
    pub empty_windows: u64,
    pub encoding_failures: u64,
}

/// A capture that reached the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureReport {
    pub capture_id: u32,
    pub reason: CaptureReason,
    pub readings: usize,
    pub bytes: usize,
}

struct Window {
    from: u32,
    to: u32,
    reason: CaptureReason,
    direction: Option<Direction>,
    confidence: Option<f32>,
}

pub struct CaptureOrchestrator<T: Transport, C: Clock> {
    config: CaptureConfig,
    buffer: SharedBuffer,
    transport: T,
    clock: C,
    session: Session,
    sensors: Vec<SensorMetadata>,
    next_capture_id: u32,
    state: CaptureState,
    stats: CaptureStats,
}

impl<T: Transport, C: Clock> CaptureOrchestrator<T, C> {
    pub fn new(
        config: CaptureConfig,
        buffer: SharedBuffer,
        transport: T,
        clock: C,
        session: Session,
        sensors: Vec<SensorMetadata>,
    ) -> Self {
        Self {
            config,
            buffer,
            transport,
            clock,
            session,
            sensors,
            next_capture_id: 1,
            state: CaptureState::Acquiring,
            stats: CaptureStats::default(),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Short window ending at the end of the analysis window that produced
    /// `event`.
    pub fn capture_detection(&mut self, event: &DetectionEvent) -> Result<CaptureReport, CaptureError> {
        let to = event.window_end;
        self.capture(Window {
            from: to.wrapping_sub(ms_to_us(self.config.detection_window_ms)),
            to,
            reason: CaptureReason::Detection,
            direction: Some(event.direction),
            confidence: Some(event.confidence),
        })
    }

    /// Long trailing window ending at the newest buffered reading.
    pub fn capture_missed_event(&mut self) -> Result<CaptureReport, CaptureError> {
        let Some(to) = self.buffer.newest_timestamp() else {
            self.stats.attempted += 1;
            self.stats.empty_windows += 1;
            log::warn!("Missed-event capture skipped: buffer is empty");
            return Err(CaptureError::EmptyWindow);
        };
        self.capture(Window {
            from: to.wrapping_sub(ms_to_us(self.config.missed_event_window_ms)),
            to,
            reason: CaptureReason::MissedEvent,
            direction: None,
            confidence: None,
        })
    }

    fn enter(&mut self, state: CaptureState) {
        log::debug!("Capture state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn capture(&mut self, window: Window) -> Result<CaptureReport, CaptureError> {
        let capture_id = self.next_capture_id;
        self.next_capture_id = self.next_capture_id.wrapping_add(1);
        self.stats.attempted += 1;

        self.enter(CaptureState::Paused);
        let outcome = self.extract_and_send(capture_id, &window);
        self.enter(CaptureState::Acquiring);

        match &outcome {
            Ok(report) => {
                self.stats.sent += 1;
                self.stats.bytes_sent += report.bytes as u64;
                log::info!(
                    "Capture {} sent: {:?}, {} readings, {} bytes",
                    capture_id,
                    window.reason,
                    report.readings,
                    report.bytes
                );
            }
            Err(e) => {
                match e {
                    CaptureError::SerializationOverflow { .. } => self.stats.overflows += 1,
                    CaptureError::TransmitFailure(_) => self.stats.transmit_failures += 1,
                    CaptureError::PauseTimeout(_) => self.stats.pause_timeouts += 1,
                    CaptureError::EmptyWindow => self.stats.empty_windows += 1,
                    CaptureError::Encoding(_) => self.stats.encoding_failures += 1,
                }
                log::warn!("Capture {} ({:?}) failed: {}", capture_id, window.reason, e);
            }
        }
        outcome
    }

    fn extract_and_send(&mut self, capture_id: u32, window: &Window) -> Result<CaptureReport, CaptureError> {
        let timeout = Duration::from_millis(self.config.pause_ack_timeout_ms as u64);
        let readings = self.buffer.snapshot(window.from, window.to, timeout)?;
        let Some(first) = readings.first() else {
            return Err(CaptureError::EmptyWindow);
        };
        let start_timestamp = first.timestamp;

        let record = CaptureRecord {
            capture_id,
            device_id: self.session.device_id.clone(),
            session_id: self.session.session_id.clone(),
            start_timestamp,
            session_offset_us: self.session_offset(start_timestamp),
            reason: window.reason,
            direction: window.direction,
            confidence: window.confidence,
            readings,
        };

        // The window has been taken; whatever happens next it is consumed.
        let outcome = self.encode_and_send(&record);
        self.buffer.discard_through(window.to);
        outcome
    }

    fn encode_and_send(&mut self, record: &CaptureRecord) -> Result<CaptureReport, CaptureError> {
        let limit = self.config.transport_max_payload.min(self.transport.max_payload());
        let payload = wire::encode_capture(record, &self.sensors, limit)?;
        self.transport.send(&payload)?;
        Ok(CaptureReport {
            capture_id: record.capture_id,
            reason: record.reason,
            readings: record.readings.len(),
            bytes: payload.len(),
        })
    }

    /// Unwrapped session time of a recent device timestamp.
    fn session_offset(&self, timestamp: u32) -> u64 {
        let now_us = self.clock.now_us();
        let age = elapsed_us(timestamp, self.clock.timestamp()) as u64;
        now_us.saturating_sub(age).saturating_sub(self.session.started_us)
    }
}
