// Motion Play — Hardware & System Configuration
// Target: LilyGO T-Display S3 (ESP32-S3, 8 MB PSRAM)
//
// Compile-time defaults live here as named constants. At boot they are
// gathered into a single `Config` value (optionally overridden by a JSON
// document from provisioning) which is validated once and handed to every
// component. Nothing reads these constants behind a component's back.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// GPIO Pin Definitions
// ---------------------------------------------------------------------------
pub const PIN_I2C_SDA: i32 = 43;
pub const PIN_I2C_SCL: i32 = 44;
pub const PIN_MISSED_EVENT_BUTTON: i32 = 14; // Active LOW, internal pull-up

// ---------------------------------------------------------------------------
// I2C Bus
// ---------------------------------------------------------------------------
pub const I2C_BAUDRATE_HZ: u32 = 400_000;
pub const I2C_ADDR_TCA9548A: u8 = 0x70;
pub const I2C_ADDR_PCA9546A: [u8; 3] = [0x74, 0x75, 0x76];
pub const I2C_ADDR_VCNL4040: u8 = 0x60;
pub const I2C_TIMEOUT_TICKS: u32 = 100; // FreeRTOS ticks

// ---------------------------------------------------------------------------
// Sensor array
// ---------------------------------------------------------------------------
/// Sensors fitted on the hoop: three boards, two sensors each.
pub const NUM_SENSORS: u8 = 6;
/// Positions are one decimal digit of the composite storage key.
pub const MAX_SENSORS: u8 = 10;
pub const LED_CURRENT: LedCurrent = LedCurrent::Ma200;
pub const INTEGRATION_TIME: IntegrationTime = IntegrationTime::T1;
pub const HIGH_RESOLUTION: bool = true; // 16-bit proximity output

// ---------------------------------------------------------------------------
// Task Stack Sizes (bytes)
// ---------------------------------------------------------------------------
pub const STACK_SENSOR: usize = 6144;
pub const STACK_CONTROL: usize = 16384;
pub const STACK_INPUT: usize = 4096;

// ---------------------------------------------------------------------------
// Task priorities & cores (FreeRTOS)
// ---------------------------------------------------------------------------
pub const PRIORITY_SENSOR: u8 = 5;
pub const PRIORITY_CONTROL: u8 = 3;
pub const PRIORITY_INPUT: u8 = 2;
pub const DIAGNOSTICS_INTERVAL_S: u64 = 60;

// ---------------------------------------------------------------------------
// Acquisition timing
// ---------------------------------------------------------------------------
/// Cycle spacing floor. The mux tree tops out near 1000 readings/s across six
/// sensors, so the device rarely waits; host simulations run at this rate.
pub const SAMPLE_INTERVAL_US: u32 = 6_000;
pub const LIVENESS_INTERVAL_MS: u32 = 1_000; // Task watchdog fires after 5 s
pub const YIELD_EVERY_CYCLES: u32 = 16;
pub const READ_FAILURE_LOG_INTERVAL_MS: u32 = 5_000;
pub const BUTTON_POLL_INTERVAL_MS: u64 = 10;
pub const DEBOUNCE_MS: u64 = 50;

// ---------------------------------------------------------------------------
// Capture buffer
// ---------------------------------------------------------------------------
/// ~30 s at ~1000 readings/s (~300 KB, reserved in PSRAM).
pub const BUFFER_CAPACITY: usize = 30_000;

// ---------------------------------------------------------------------------
// Direction detection
// ---------------------------------------------------------------------------
pub const SMOOTHING_WINDOW: usize = 3;
pub const MIN_RISE: f32 = 10.0;
pub const ENVELOPE_FRACTION: f32 = 0.2;
pub const MIN_CENTER_WEIGHT: f32 = 10.0;
pub const TIE_TOLERANCE_MS: u32 = 2;
pub const PEAK_MERGE_TOLERANCE_MS: u32 = 50;
pub const SEPARATION_SCALE_MS: f32 = 30.0;
pub const SATURATION_SCALE: f32 = 100.0;
pub const ANALYSIS_WINDOW_MS: u32 = 300;
/// Upper bound for every configured window and tolerance. Wrapping
/// timestamp comparisons only order spans shorter than half the 32-bit µs
/// clock (~35 min).
pub const MAX_WINDOW_MS: u32 = 30 * 60 * 1000;
pub const ANALYSIS_INTERVAL_MS: u32 = 100;
pub const CALIBRATION_DURATION_MS: u32 = 1_000;

// ---------------------------------------------------------------------------
// Capture / transport
// ---------------------------------------------------------------------------
pub const DETECTION_CAPTURE_MS: u32 = 800;
pub const MISSED_EVENT_CAPTURE_MS: u32 = 5_000;
pub const PAUSE_ACK_TIMEOUT_MS: u32 = 50;
/// AWS IoT Core rejects MQTT messages above 128 KB.
pub const TRANSPORT_MAX_PAYLOAD: usize = 128 * 1024;
pub const MQTT_TOPIC_CAPTURES: &str = "motionplay/captures";

pub const DEFAULT_DEVICE_ID: &str = "motionplay-device-001";

// ---------------------------------------------------------------------------
// Host simulation
// ---------------------------------------------------------------------------
pub const SIM_PASS_PERIOD_US: u64 = 3_000_000;
pub const SIM_RUN_SECS: u64 = 15;

/// Milliseconds as a span on the 32-bit µs device clock. Saturates rather
/// than wrapping for spans the clock cannot represent.
pub fn ms_to_us(ms: u32) -> u32 {
    ms.saturating_mul(1000)
}

// ---------------------------------------------------------------------------
// Runtime configuration value
// ---------------------------------------------------------------------------

/// What the buffer does with an append once it holds `capacity` readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest reading; the buffer always holds the latest interval.
    DropOldest,
    /// Refuse the new reading until an explicit clear.
    RejectNew,
}

/// VCNL4040 IR LED drive current (PS_MS register, LED_I field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedCurrent {
    #[serde(rename = "50mA")]
    Ma50,
    #[serde(rename = "75mA")]
    Ma75,
    #[serde(rename = "100mA")]
    Ma100,
    #[serde(rename = "120mA")]
    Ma120,
    #[serde(rename = "140mA")]
    Ma140,
    #[serde(rename = "160mA")]
    Ma160,
    #[serde(rename = "180mA")]
    Ma180,
    #[serde(rename = "200mA")]
    Ma200,
}

impl LedCurrent {
    /// LED_I field value.
    pub fn bits(self) -> u16 {
        self as u16
    }
}

/// VCNL4040 proximity integration time (PS_CONF1 register, PS_IT field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationTime {
    #[serde(rename = "1T")]
    T1,
    #[serde(rename = "1.5T")]
    T1Half,
    #[serde(rename = "2T")]
    T2,
    #[serde(rename = "2.5T")]
    T2Half,
    #[serde(rename = "3T")]
    T3,
    #[serde(rename = "3.5T")]
    T3Half,
    #[serde(rename = "4T")]
    T4,
    #[serde(rename = "8T")]
    T8,
}

impl IntegrationTime {
    /// PS_IT field value.
    pub fn bits(self) -> u16 {
        self as u16
    }

    pub fn from_bits(bits: u16) -> Self {
        match bits & 0b111 {
            0 => Self::T1,
            1 => Self::T1Half,
            2 => Self::T2,
            3 => Self::T2Half,
            4 => Self::T3,
            5 => Self::T3Half,
            6 => Self::T4,
            _ => Self::T8,
        }
    }
}

/// Settings programmed into every proximity sensor at probe time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorSettings {
    pub led_current: LedCurrent,
    pub integration_time: IntegrationTime,
    /// 16-bit proximity output instead of 12-bit.
    pub high_resolution: bool,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            led_current: LED_CURRENT,
            integration_time: INTEGRATION_TIME,
            high_resolution: HIGH_RESOLUTION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcquisitionConfig {
    pub sensor_count: u8,
    pub sample_interval_us: u32,
    pub liveness_interval_ms: u32,
    pub yield_every_cycles: u32,
    pub read_failure_log_interval_ms: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sensor_count: NUM_SENSORS,
            sample_interval_us: SAMPLE_INTERVAL_US,
            liveness_interval_ms: LIVENESS_INTERVAL_MS,
            yield_every_cycles: YIELD_EVERY_CYCLES,
            read_failure_log_interval_ms: READ_FAILURE_LOG_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferConfig {
    pub capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: BUFFER_CAPACITY,
            overflow_policy: OverflowPolicy::DropOldest,
        }
    }
}

/// Tuning for the direction detector. Every threshold the algorithm uses is
/// named here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    /// Trailing moving-average length, in cycles.
    pub smoothing_window: usize,
    /// Smallest peak rise above baseline that counts as activity.
    pub min_rise: f32,
    /// Envelope edge, as a fraction of the side's peak rise.
    pub envelope_fraction: f32,
    /// Samples at or below this rise carry no center-of-mass weight.
    /// Unset means half of `min_rise`; see [`DetectorConfig::noise_floor`].
    pub noise_floor: Option<f32>,
    /// Total weight a side needs for its center of mass to be valid.
    pub min_center_weight: f32,
    /// Centers (then rise starts, then peaks) closer than this are a tie.
    pub tie_tolerance_ms: u32,
    /// Events from overlapping windows whose peaks fall within this gap
    /// are the same physical pass.
    pub peak_merge_tolerance_ms: u32,
    /// Center separation giving full separation confidence.
    pub separation_scale_ms: f32,
    /// Combined peak rise giving full magnitude confidence.
    pub saturation_scale: f32,
    /// Length of the rolling window handed to each analysis pass.
    pub analysis_window_ms: u32,
    /// How often the control task runs an analysis pass.
    pub analysis_interval_ms: u32,
    /// Idle period sampled at boot to establish per-side baselines.
    pub calibration_duration_ms: u32,
    /// Positions whose sensors face Side A; every other active position is
    /// Side B.
    pub side_a_positions: Vec<u8>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            smoothing_window: SMOOTHING_WINDOW,
            min_rise: MIN_RISE,
            envelope_fraction: ENVELOPE_FRACTION,
            noise_floor: None,
            min_center_weight: MIN_CENTER_WEIGHT,
            tie_tolerance_ms: TIE_TOLERANCE_MS,
            peak_merge_tolerance_ms: PEAK_MERGE_TOLERANCE_MS,
            separation_scale_ms: SEPARATION_SCALE_MS,
            saturation_scale: SATURATION_SCALE,
            analysis_window_ms: ANALYSIS_WINDOW_MS,
            analysis_interval_ms: ANALYSIS_INTERVAL_MS,
            calibration_duration_ms: CALIBRATION_DURATION_MS,
            // Board side S2 faces Side A on every PCB.
            side_a_positions: vec![1, 3, 5],
        }
    }
}

impl DetectorConfig {
    /// Effective noise floor: the configured value, else half of `min_rise`.
    pub fn noise_floor(&self) -> f32 {
        self.noise_floor.unwrap_or(self.min_rise / 2.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    pub detection_window_ms: u32,
    pub missed_event_window_ms: u32,
    pub pause_ack_timeout_ms: u32,
    pub transport_max_payload: usize,
    pub topic: String,
    /// MQTT broker, e.g. `mqtts://host:8883`. Without one, captures are
    /// logged instead of published.
    pub broker_url: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            detection_window_ms: DETECTION_CAPTURE_MS,
            missed_event_window_ms: MISSED_EVENT_CAPTURE_MS,
            pause_ack_timeout_ms: PAUSE_ACK_TIMEOUT_MS,
            transport_max_payload: TRANSPORT_MAX_PAYLOAD,
            topic: MQTT_TOPIC_CAPTURES.to_string(),
            broker_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceIdentity {
    pub device_id: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            device_id: DEFAULT_DEVICE_ID.to_string(),
        }
    }
}

/// Complete runtime configuration, constructed once at boot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub device: DeviceIdentity,
    pub sensor: SensorSettings,
    pub acquisition: AcquisitionConfig,
    pub buffer: BufferConfig,
    pub detector: DetectorConfig,
    pub capture: CaptureConfig,
}

impl Config {
    /// Overlay a JSON document on the compiled-in defaults. Missing fields
    /// keep their defaults; unknown fields are rejected.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let acq = &self.acquisition;
        if acq.sensor_count == 0 || acq.sensor_count > MAX_SENSORS {
            return Err(ConfigError::Invalid(format!(
                "sensor_count must be 1..={MAX_SENSORS}, got {}",
                acq.sensor_count
            )));
        }
        if acq.liveness_interval_ms == 0 {
            return Err(ConfigError::Invalid("liveness_interval_ms must be > 0".into()));
        }
        if self.buffer.capacity == 0 {
            return Err(ConfigError::Invalid("buffer capacity must be > 0".into()));
        }

        let det = &self.detector;
        if det.smoothing_window == 0 {
            return Err(ConfigError::Invalid("smoothing_window must be >= 1".into()));
        }
        if !(det.envelope_fraction > 0.0 && det.envelope_fraction < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "envelope_fraction must be in (0, 1), got {}",
                det.envelope_fraction
            )));
        }
        if det.min_rise <= 0.0 || det.separation_scale_ms <= 0.0 || det.saturation_scale <= 0.0 {
            return Err(ConfigError::Invalid(
                "min_rise, separation_scale_ms and saturation_scale must be positive".into(),
            ));
        }
        if det.analysis_window_ms == 0 || det.analysis_interval_ms == 0 {
            return Err(ConfigError::Invalid("analysis window and interval must be > 0".into()));
        }
        if let Some(floor) = det.noise_floor {
            if !(floor >= 0.0) {
                return Err(ConfigError::Invalid(format!("noise_floor must be >= 0, got {floor}")));
            }
        }
        if let Some(&p) = det.side_a_positions.iter().find(|&&p| p >= acq.sensor_count) {
            return Err(ConfigError::Invalid(format!(
                "side A position {p} is outside the {}-sensor array",
                acq.sensor_count
            )));
        }
        let mut side_a = det.side_a_positions.clone();
        side_a.sort_unstable();
        side_a.dedup();
        if side_a.is_empty() || side_a.len() >= acq.sensor_count as usize {
            return Err(ConfigError::Invalid(
                "each side needs at least one sensor".into(),
            ));
        }

        let cap = &self.capture;
        if cap.detection_window_ms == 0 {
            return Err(ConfigError::Invalid("detection_window_ms must be > 0".into()));
        }
        if cap.missed_event_window_ms <= cap.detection_window_ms {
            return Err(ConfigError::Invalid(format!(
                "missed_event_window_ms ({}) must exceed detection_window_ms ({})",
                cap.missed_event_window_ms, cap.detection_window_ms
            )));
        }
        let windows = [
            ("tie_tolerance_ms", det.tie_tolerance_ms),
            ("peak_merge_tolerance_ms", det.peak_merge_tolerance_ms),
            ("analysis_window_ms", det.analysis_window_ms),
            ("analysis_interval_ms", det.analysis_interval_ms),
            ("calibration_duration_ms", det.calibration_duration_ms),
            ("detection_window_ms", cap.detection_window_ms),
            ("missed_event_window_ms", cap.missed_event_window_ms),
        ];
        if let Some((name, ms)) = windows.iter().find(|(_, ms)| *ms > MAX_WINDOW_MS) {
            return Err(ConfigError::Invalid(format!(
                "{name} ({ms}) exceeds the {MAX_WINDOW_MS} ms limit"
            )));
        }
        if cap.transport_max_payload == 0 {
            return Err(ConfigError::Invalid("transport_max_payload must be > 0".into()));
        }
        if self.device.device_id.is_empty() {
            return Err(ConfigError::Invalid("device_id must not be empty".into()));
        }
        Ok(())
    }
}
