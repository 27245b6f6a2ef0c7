// Motion Play — Baseline Calibration
//
// Per-side idle statistics gathered at boot. The detector subtracts the
// calibrated mean instead of estimating a baseline from each window.

use crate::detector::SideMap;
use crate::events::Reading;

/// Idle level of each side's aggregate signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SideBaseline {
    pub side_a: f32,
    pub side_b: f32,
}

/// Welford running statistics over one side's aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f32,
    max: f32,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        }
    }
}

impl RunningStats {
    pub fn push(&mut self, value: f32) {
        self.count += 1;
        let x = value as f64;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f32 {
        self.mean as f32
    }

    /// Population standard deviation.
    pub fn stddev(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        (self.m2 / self.count as f64).sqrt() as f32
    }

    pub fn min(&self) -> Option<f32> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f32> {
        (self.count > 0).then_some(self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub side_a: RunningStats,
    pub side_b: RunningStats,
}

impl Calibration {
    pub fn baseline(&self) -> SideBaseline {
        SideBaseline {
            side_a: self.side_a.mean(),
            side_b: self.side_b.mean(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BaselineCalibrator {
    sides: SideMap,
    side_a: RunningStats,
    side_b: RunningStats,
}

impl BaselineCalibrator {
    pub fn new(sides: SideMap) -> Self {
        Self {
            sides,
            side_a: RunningStats::default(),
            side_b: RunningStats::default(),
        }
    }

    /// Feed idle readings; each acquisition cycle contributes one sample per
    /// side.
    pub fn observe(&mut self, readings: &[Reading]) {
        for point in self.sides.aggregate(readings) {
            if point.count_a > 0 {
                self.side_a.push(point.side_a);
            }
            if point.count_b > 0 {
                self.side_b.push(point.side_b);
            }
        }
    }

    /// `None` until both sides have been seen.
    pub fn finish(&self) -> Option<Calibration> {
        if self.side_a.count() == 0 || self.side_b.count() == 0 {
            return None;
        }
        let calibration = Calibration {
            side_a: self.side_a,
            side_b: self.side_b,
        };
        log::info!(
            "Calibration: side A mean={:.1} std={:.1} ({} cycles), side B mean={:.1} std={:.1} ({} cycles)",
            self.side_a.mean(),
            self.side_a.stddev(),
            self.side_a.count(),
            self.side_b.mean(),
            self.side_b.stddev(),
            self.side_b.count()
        );
        Some(calibration)
    }
}
