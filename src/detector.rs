// Motion Play — Direction Detector
//
// Decides which way an object crossed the hoop from one window of readings:
//
//   1. Split positions into Side A / Side B and sum each side per cycle.
//   2. Smooth both series with a trailing moving average.
//   3. Measure each side's peak rise above its baseline; nothing happens
//      unless at least one side rises by `min_rise`.
//   4. Find each side's wave envelope around its peak and the weighted
//      center of mass inside it.
//   5. The side whose center comes first is the origin. Ties fall back to
//      envelope start, then to peak time, then to UNKNOWN.
//
// Sliding analysis windows overlap, so one physical pass is seen several
// times. `DirectionDetector` merges events whose peaks coincide and releases
// each pass once.

use crate::calibration::SideBaseline;
use crate::config::{ms_to_us, DetectorConfig, MAX_SENSORS};
use crate::events::{elapsed_us, DetectionEvent, Direction, Reading};

/// Low quantile of the smoothed series used as baseline when no calibration
/// is available. Activity occupies a minority of any analysis window.
const BASELINE_QUANTILE: f32 = 0.2;

// ---------------------------------------------------------------------------
// Side aggregation
// ---------------------------------------------------------------------------

/// Static assignment of sensor positions to sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideMap {
    side_a: [bool; MAX_SENSORS as usize],
}

/// Both sides' summed proximity for one acquisition cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SidePoint {
    pub timestamp: u32,
    pub side_a: f32,
    pub side_b: f32,
    pub count_a: u8,
    pub count_b: u8,
}

impl SideMap {
    pub fn new(side_a_positions: &[u8]) -> Self {
        let mut side_a = [false; MAX_SENSORS as usize];
        for &p in side_a_positions {
            if let Some(slot) = side_a.get_mut(p as usize) {
                *slot = true;
            }
        }
        Self { side_a }
    }

    pub fn is_side_a(&self, position: u8) -> bool {
        self.side_a.get(position as usize).copied().unwrap_or(false)
    }

    /// Collapse time-ordered readings into one point per cycle timestamp.
    pub fn aggregate(&self, readings: &[Reading]) -> Vec<SidePoint> {
        let mut points: Vec<SidePoint> = Vec::new();
        for r in readings {
            if points.last().map_or(true, |last| last.timestamp != r.timestamp) {
                points.push(SidePoint {
                    timestamp: r.timestamp,
                    side_a: 0.0,
                    side_b: 0.0,
                    count_a: 0,
                    count_b: 0,
                });
            }
            let Some(point) = points.last_mut() else {
                continue;
            };
            if self.is_side_a(r.position) {
                point.side_a += r.proximity as f32;
                point.count_a += 1;
            } else {
                point.side_b += r.proximity as f32;
                point.count_b += 1;
            }
        }
        points
    }
}

// ---------------------------------------------------------------------------
// Single-window analysis
// ---------------------------------------------------------------------------

/// Trailing moving average; the first samples average what is available.
fn smooth(values: &[f32], window: usize) -> Vec<f32> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0f32;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= values[i - window];
        }
        out.push(sum / (i + 1).min(window) as f32);
    }
    out
}

fn low_quantile(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len().saturating_sub(1)) as f32 * BASELINE_QUANTILE) as usize;
    sorted.get(idx).copied().unwrap_or(0.0)
}

/// One side's wave inside the window. Offsets are µs from window start.
#[derive(Debug, Clone, Copy)]
struct Wave {
    rise: f32,
    peak_idx: usize,
    start_offset: f64,
    center_offset: f64,
}

fn peak(smoothed: &[f32], baseline: f32) -> (usize, f32) {
    let (idx, max) = smoothed
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best });
    (idx, max - baseline)
}

/// Envelope and center of mass around the side's peak. `None` when the
/// envelope carries too little weight above the noise floor.
fn wave(
    smoothed: &[f32],
    offsets: &[f64],
    baseline: f32,
    config: &DetectorConfig,
) -> Option<Wave> {
    let (peak_idx, rise) = peak(smoothed, baseline);
    let edge = baseline + config.envelope_fraction * rise.max(0.0);

    let mut start = peak_idx;
    while start > 0 && smoothed[start - 1] > edge {
        start -= 1;
    }
    let mut end = peak_idx;
    while end + 1 < smoothed.len() && smoothed[end + 1] > edge {
        end += 1;
    }

    let noise_floor = config.noise_floor();
    let mut total = 0.0f64;
    let mut weighted = 0.0f64;
    for i in start..=end {
        let excess = smoothed[i] - baseline;
        if excess > noise_floor {
            let w = (excess - noise_floor) as f64;
            total += w;
            weighted += offsets[i] * w;
        }
    }
    if total < config.min_center_weight as f64 {
        return None;
    }

    Some(Wave {
        rise,
        peak_idx,
        start_offset: offsets[start],
        center_offset: weighted / total,
    })
}

fn order(a: f64, b: f64, tolerance: f64) -> Option<Direction> {
    if b - a > tolerance {
        Some(Direction::SideAToB)
    } else if a - b > tolerance {
        Some(Direction::SideBToA)
    } else {
        None
    }
}

/// Analyse one window of time-ordered readings. Returns at most one event.
pub fn analyze_window(
    readings: &[Reading],
    config: &DetectorConfig,
    sides: &SideMap,
    baseline: Option<SideBaseline>,
) -> Option<DetectionEvent> {
    let points = sides.aggregate(readings);
    let first = points.first()?;
    let last = points.last()?;
    if !points.iter().any(|p| p.count_a > 0) || !points.iter().any(|p| p.count_b > 0) {
        return None;
    }

    let window_start = first.timestamp;
    let window_end = last.timestamp;
    let offsets: Vec<f64> = points
        .iter()
        .map(|p| elapsed_us(window_start, p.timestamp) as f64)
        .collect();

    let raw_a: Vec<f32> = points.iter().map(|p| p.side_a).collect();
    let raw_b: Vec<f32> = points.iter().map(|p| p.side_b).collect();
    let smooth_a = smooth(&raw_a, config.smoothing_window);
    let smooth_b = smooth(&raw_b, config.smoothing_window);

    let (base_a, base_b) = match baseline {
        Some(b) => (b.side_a, b.side_b),
        None => (low_quantile(&smooth_a), low_quantile(&smooth_b)),
    };

    let (_, rise_a) = peak(&smooth_a, base_a);
    let (_, rise_b) = peak(&smooth_b, base_b);
    if rise_a < config.min_rise && rise_b < config.min_rise {
        return None;
    }

    let a = wave(&smooth_a, &offsets, base_a, config)?;
    let b = wave(&smooth_b, &offsets, base_b, config)?;

    let tolerance = config.tie_tolerance_ms as f64 * 1000.0;
    let direction = order(a.center_offset, b.center_offset, tolerance)
        .or_else(|| order(a.start_offset, b.start_offset, tolerance))
        .or_else(|| order(offsets[a.peak_idx], offsets[b.peak_idx], tolerance))
        .unwrap_or(Direction::Unknown);

    let separation = (b.center_offset - a.center_offset).abs();
    let separation_term = (separation / (config.separation_scale_ms as f64 * 1000.0)).min(1.0) as f32;
    let magnitude_term = ((a.rise.max(0.0) + b.rise.max(0.0)) / config.saturation_scale).min(1.0);
    let confidence = match direction {
        // Indistinguishable centers: never more than half the separation term.
        Direction::Unknown => separation_term * magnitude_term / 2.0,
        _ => (separation_term + magnitude_term) / 2.0,
    };

    let at = |offset: f64| window_start.wrapping_add(offset.round() as u32);
    Some(DetectionEvent {
        direction,
        confidence: confidence.clamp(0.0, 1.0),
        window_start,
        window_end,
        peak_magnitude_a: a.rise.max(0.0),
        peak_magnitude_b: b.rise.max(0.0),
        peak_time_a: points[a.peak_idx].timestamp,
        peak_time_b: points[b.peak_idx].timestamp,
        center_a: at(a.center_offset),
        center_b: at(b.center_offset),
    })
}

// ---------------------------------------------------------------------------
// Stateful detector (overlapping windows)
// ---------------------------------------------------------------------------

pub struct DirectionDetector {
    config: DetectorConfig,
    sides: SideMap,
    baseline: Option<SideBaseline>,
    /// Best interpretation so far of the pass still inside the window.
    pending: Option<DetectionEvent>,
}

impl DirectionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let sides = SideMap::new(&config.side_a_positions);
        Self {
            config,
            sides,
            baseline: None,
            pending: None,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn side_map(&self) -> &SideMap {
        &self.sides
    }

    pub fn set_baseline(&mut self, baseline: SideBaseline) {
        self.baseline = Some(baseline);
    }

    pub fn baseline(&self) -> Option<SideBaseline> {
        self.baseline
    }

    pub fn pending(&self) -> Option<&DetectionEvent> {
        self.pending.as_ref()
    }

    pub fn analyze(&self, readings: &[Reading]) -> Option<DetectionEvent> {
        analyze_window(readings, &self.config, &self.sides, self.baseline)
    }

    fn same_pass(&self, a: &DetectionEvent, b: &DetectionEvent) -> bool {
        let gap = (b.peak_time().wrapping_sub(a.peak_time()) as i32).unsigned_abs();
        gap <= ms_to_us(self.config.peak_merge_tolerance_ms)
    }

    /// Merge `event` into the pending pass, or release the pending pass if
    /// `event` is a different one.
    pub fn offer(&mut self, event: DetectionEvent) -> Option<DetectionEvent> {
        match self.pending.take() {
            Some(pending) if self.same_pass(&pending, &event) => {
                self.pending = Some(if event.confidence > pending.confidence {
                    event
                } else {
                    pending
                });
                None
            }
            released => {
                self.pending = Some(event);
                released
            }
        }
    }

    /// Release the pending pass once no future window can still contain its
    /// peak.
    pub fn flush_stale(&mut self, now: u32) -> Option<DetectionEvent> {
        let pending = self.pending.as_ref()?;
        let age = now.wrapping_sub(pending.peak_time()) as i32;
        let horizon = i32::try_from(ms_to_us(self.config.analysis_window_ms)).unwrap_or(i32::MAX);
        if age > horizon {
            self.pending.take()
        } else {
            None
        }
    }

    /// One analysis pass over a rolling window. Returns a pass that is
    /// complete and ready to capture.
    pub fn process(&mut self, readings: &[Reading]) -> Option<DetectionEvent> {
        if let Some(event) = self.analyze(readings) {
            log::debug!(
                "Window event {} conf={:.2} peak@{}",
                event.direction.as_str(),
                event.confidence,
                event.peak_time()
            );
            if let Some(released) = self.offer(event) {
                return Some(released);
            }
        }
        let now = readings.last()?.timestamp;
        self.flush_stale(now)
    }

    /// Forget temporal state. Called after a capture clears the buffer.
    pub fn reset(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    const BASE: u16 = 20;

    fn config() -> DetectorConfig {
        DetectorConfig {
            side_a_positions: vec![1],
            ..DetectorConfig::default()
        }
    }

    /// Triangular pulse, `rise` high at `center_ms`, zero beyond `half_ms`.
    fn pulse(t_ms: u32, center_ms: u32, rise: f32, half_ms: u32) -> u16 {
        let d = (t_ms as f32 - center_ms as f32).abs();
        let v = rise * (1.0 - d / half_ms as f32);
        BASE + v.max(0.0).round() as u16
    }

    /// One sensor per side (position 1 = A, 0 = B), 1 ms cycles.
    fn window(len_ms: u32, mut a: impl FnMut(u32) -> u16, mut b: impl FnMut(u32) -> u16) -> Vec<Reading> {
        let mut readings = Vec::new();
        for t in 0..len_ms {
            let ts = t * 1000;
            readings.push(Reading::new(ts, 0, b(t), 0));
            readings.push(Reading::new(ts, 1, a(t), 0));
        }
        readings
    }

    #[test]
    fn a_then_b_is_a_to_b() {
        let readings = window(
            300,
            |t| pulse(t, 100, 280.0, 20),
            |t| pulse(t, 140, 260.0, 20),
        );
        let cfg = config();
        let event = analyze_window(&readings, &cfg, &SideMap::new(&cfg.side_a_positions), None).unwrap();
        assert_eq!(event.direction, Direction::SideAToB);
        assert!(event.confidence > 0.5, "confidence {}", event.confidence);
        assert!((event.peak_magnitude_a - 280.0).abs() < 20.0);
        assert!(event.center_a < event.center_b);
    }

    #[test]
    fn b_then_a_is_b_to_a() {
        let readings = window(
            300,
            |t| pulse(t, 150, 200.0, 20),
            |t| pulse(t, 110, 200.0, 20),
        );
        let event = DirectionDetector::new(config()).analyze(&readings).unwrap();
        assert_eq!(event.direction, Direction::SideBToA);
    }

    #[test]
    fn flat_noise_yields_nothing() {
        // Six sensors, three per side, each uniform in [18, 22].
        let mut rng = ChaCha8Rng::seed_from_u64(0x2545_f491);
        let mut noise = move || rng.gen_range(18..=22u16);
        let mut readings = Vec::new();
        for t in 0..500u32 {
            for p in 0..6 {
                readings.push(Reading::new(t * 1000, p, noise(), 0));
            }
        }
        let detector = DirectionDetector::new(DetectorConfig::default());
        assert!(detector.analyze(&readings).is_none());
    }

    #[test]
    fn simultaneous_peaks_are_unknown_with_low_confidence() {
        let readings = window(
            300,
            |t| pulse(t, 120, 150.0, 20),
            |t| pulse(t, 120, 150.0, 20),
        );
        let event = DirectionDetector::new(config()).analyze(&readings).unwrap();
        assert_eq!(event.direction, Direction::Unknown);
        assert!(event.confidence < 0.1);
    }

    #[test]
    fn confidence_grows_with_separation() {
        let detector = DirectionDetector::new(config());
        let mut last = 0.0f32;
        for gap in [0u32, 1, 3, 5, 10, 20, 30, 45, 60] {
            let readings = window(
                300,
                |t| pulse(t, 100, 30.0, 15),
                |t| pulse(t, 100 + gap, 30.0, 15),
            );
            let event = detector.analyze(&readings).unwrap();
            assert!(
                event.confidence >= last,
                "gap {gap}: {} < {last}",
                event.confidence
            );
            last = event.confidence;
        }
    }

    #[test]
    fn weak_center_weight_yields_nothing() {
        let mut cfg = config();
        cfg.min_center_weight = 1.0e9;
        let readings = window(
            300,
            |t| pulse(t, 100, 280.0, 20),
            |t| pulse(t, 140, 260.0, 20),
        );
        assert!(DirectionDetector::new(cfg).analyze(&readings).is_none());
    }

    #[test]
    fn calibrated_baseline_replaces_window_estimate() {
        let readings = window(
            300,
            |t| pulse(t, 100, 40.0, 20),
            |t| pulse(t, 140, 40.0, 20),
        );
        let mut detector = DirectionDetector::new(config());
        assert!(detector.analyze(&readings).is_some());

        detector.set_baseline(SideBaseline {
            side_a: 100.0,
            side_b: 100.0,
        });
        assert!(detector.analyze(&readings).is_none());
    }

    #[test]
    fn aggregate_sums_per_cycle_and_side() {
        let sides = SideMap::new(&[1, 3, 5]);
        let readings: Vec<Reading> = (0..6)
            .map(|p| Reading::new(7, p, 10 * (p as u16 + 1), 0))
            .chain([Reading::new(8, 0, 5, 0)])
            .collect();
        let points = sides.aggregate(&readings);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].side_a, 20.0 + 40.0 + 60.0);
        assert_eq!(points[0].side_b, 10.0 + 30.0 + 50.0);
        assert_eq!((points[1].count_a, points[1].count_b), (0, 1));
    }

    fn event_at(peak_ms: u32, confidence: f32) -> DetectionEvent {
        DetectionEvent {
            direction: Direction::SideAToB,
            confidence,
            window_start: 0,
            window_end: peak_ms * 1000,
            peak_magnitude_a: 100.0,
            peak_magnitude_b: 100.0,
            peak_time_a: peak_ms * 1000,
            peak_time_b: peak_ms * 1000,
            center_a: peak_ms * 1000,
            center_b: peak_ms * 1000,
        }
    }

    #[test]
    fn overlapping_windows_merge_into_best_interpretation() {
        let mut detector = DirectionDetector::new(config());
        assert!(detector.offer(event_at(100, 0.6)).is_none());
        assert!(detector.offer(event_at(130, 0.9)).is_none());
        assert!(detector.offer(event_at(120, 0.7)).is_none());

        let released = detector.offer(event_at(400, 0.5)).unwrap();
        assert_eq!(released.confidence, 0.9);
        assert_eq!(detector.pending().unwrap().confidence, 0.5);
    }

    #[test]
    fn close_but_distinct_passes_stay_distinct() {
        let mut detector = DirectionDetector::new(config());
        assert!(detector.offer(event_at(100, 0.8)).is_none());
        let released = detector.offer(event_at(151, 0.4)).unwrap();
        assert_eq!(released.peak_time(), 100_000);
    }

    #[test]
    fn stale_pending_pass_is_flushed() {
        let mut detector = DirectionDetector::new(config());
        detector.offer(event_at(100, 0.8));
        assert!(detector.flush_stale(300_000).is_none());
        assert!(detector.flush_stale(401_000).is_some());
        assert!(detector.pending().is_none());
    }

    #[test]
    fn process_releases_each_pass_once() {
        let mut detector = DirectionDetector::new(config());
        let stream = window(
            1200,
            |t| pulse(t, 200, 280.0, 20),
            |t| pulse(t, 240, 260.0, 20),
        );
        let per_cycle = 2;
        let mut released = Vec::new();
        // 300 ms windows every 100 ms.
        for end_ms in (300..=1200).step_by(100) {
            let end = end_ms as usize * per_cycle;
            let start = end - 300 * per_cycle;
            if let Some(event) = detector.process(&stream[start..end]) {
                released.push(event);
            }
        }
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].direction, Direction::SideAToB);
    }

    #[test]
    fn reset_drops_pending_pass() {
        let mut detector = DirectionDetector::new(config());
        detector.offer(event_at(100, 0.8));
        detector.reset();
        assert!(detector.pending().is_none());
    }
}
