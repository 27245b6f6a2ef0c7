// Motion Play — System Events & Data Types

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Reading (one sensor, one acquisition cycle)
// ---------------------------------------------------------------------------

/// One proximity sample. All readings of a cycle share the cycle timestamp.
///
/// `timestamp` is the low 32 bits of the device's microsecond clock, so it
/// wraps after ~71 minutes; compare timestamps with wrapping arithmetic.
/// Every field is plain data, so an all-zero bit pattern is a valid value.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: u32,
    pub position: u8,
    pub proximity: u16,
    pub ambient: u16,
}

impl Reading {
    pub fn new(timestamp: u32, position: u8, proximity: u16, ambient: u16) -> Self {
        Self {
            timestamp,
            position,
            proximity,
            ambient,
        }
    }
}

/// Microseconds from `earlier` to `later` on the wrapping device clock.
pub fn elapsed_us(earlier: u32, later: u32) -> u32 {
    later.wrapping_sub(earlier)
}

// ---------------------------------------------------------------------------
// Sensor array metadata
// ---------------------------------------------------------------------------

/// Static description of one sensor position, reported with every capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorMetadata {
    pub position: u8,
    /// Sensor board, 1-based (P1..P3).
    pub board: u8,
    /// Sensor on the board, 1-based (S1/S2).
    pub board_side: u8,
    pub name: String,
    pub active: bool,
}

impl SensorMetadata {
    pub fn for_position(position: u8, active: bool) -> Self {
        let board = position / 2 + 1;
        let board_side = position % 2 + 1;
        Self {
            position,
            board,
            board_side,
            name: format!("P{board}S{board_side}"),
            active,
        }
    }
}

// ---------------------------------------------------------------------------
// Direction detection
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "A_TO_B")]
    SideAToB,
    #[serde(rename = "B_TO_A")]
    SideBToA,
    #[default]
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SideAToB => "A_TO_B",
            Self::SideBToA => "B_TO_A",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Outcome of one analysis pass that saw activity on both sides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionEvent {
    pub direction: Direction,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub window_start: u32,
    pub window_end: u32,
    /// Smoothed peak rise above the side's baseline.
    pub peak_magnitude_a: f32,
    pub peak_magnitude_b: f32,
    pub peak_time_a: u32,
    pub peak_time_b: u32,
    pub center_a: u32,
    pub center_b: u32,
}

impl DetectionEvent {
    /// Representative peak time of the pass: midway between the two side
    /// peaks, on the wrapping clock.
    pub fn peak_time(&self) -> u32 {
        let gap = self.peak_time_b.wrapping_sub(self.peak_time_a) as i32;
        self.peak_time_a.wrapping_add_signed(gap / 2)
    }
}

// ---------------------------------------------------------------------------
// Capture records
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureReason {
    Detection,
    MissedEvent,
}

/// The unit handed to the transport and later persisted. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    pub capture_id: u32,
    pub device_id: String,
    pub session_id: String,
    /// Device clock at the start of the captured window.
    pub start_timestamp: u32,
    /// `start_timestamp` expressed as microseconds since the session began,
    /// without wrapping.
    pub session_offset_us: u64,
    pub reason: CaptureReason,
    pub direction: Option<Direction>,
    pub confidence: Option<f32>,
    pub readings: Vec<Reading>,
}

// ---------------------------------------------------------------------------
// Control events (sent to the control task via channel)
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// The operator saw a pass the detector did not report.
    MissedEvent,
    /// Stop the control task (host runs and tests only).
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_names_follow_board_layout() {
        let names: Vec<String> = (0..6)
            .map(|p| SensorMetadata::for_position(p, true).name)
            .collect();
        assert_eq!(names, ["P1S1", "P1S2", "P2S1", "P2S2", "P3S1", "P3S2"]);
    }

    #[test]
    fn peak_time_is_midpoint_across_wrap() {
        let mut event = DetectionEvent {
            direction: Direction::SideAToB,
            confidence: 1.0,
            window_start: 0,
            window_end: 0,
            peak_magnitude_a: 0.0,
            peak_magnitude_b: 0.0,
            peak_time_a: 100,
            peak_time_b: 140,
            center_a: 0,
            center_b: 0,
        };
        assert_eq!(event.peak_time(), 120);

        event.peak_time_a = u32::MAX - 9;
        event.peak_time_b = 10;
        assert_eq!(event.peak_time(), 0);

        event.peak_time_a = 140;
        event.peak_time_b = 100;
        assert_eq!(event.peak_time(), 120);
    }

    #[test]
    fn direction_labels_match_wire_names() {
        assert_eq!(
            serde_json::to_string(&Direction::SideBToA).unwrap(),
            "\"B_TO_A\""
        );
        assert_eq!(Direction::SideAToB.as_str(), "A_TO_B");
    }
}
