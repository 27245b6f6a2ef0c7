// Motion Play — Simulated Proximity Array
//
// Stand-in for the hoop hardware on host builds. Every sensor idles at a
// noisy baseline; scripted passes raise the origin side first and the
// destination side `gap_us` later, each as a triangular pulse.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::SensorArray;
use crate::config::MAX_SENSORS;
use crate::detector::SideMap;
use crate::error::SensorReadError;
use crate::events::Direction;
use crate::platform::Clock;

const IDLE_LEVEL: u16 = 20;
const NOISE_SPAN: u16 = 5; // readings vary in [IDLE_LEVEL - 2, IDLE_LEVEL + 2]
const AMBIENT_LEVEL: u16 = 140;
const NOISE_SEED: u64 = 0x1234_5678;

/// One object crossing the hoop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pass {
    /// Clock time at which the origin side peaks.
    pub at_us: u64,
    pub direction: Direction,
    /// Delay before the destination side peaks.
    pub gap_us: u64,
    /// Peak rise per sensor.
    pub magnitude: u16,
    pub half_width_us: u64,
}

impl Pass {
    pub fn new(at_us: u64, direction: Direction) -> Self {
        Self {
            at_us,
            direction,
            gap_us: 40_000,
            magnitude: 120,
            half_width_us: 25_000,
        }
    }

    fn rise(&self, side_a: bool, now_us: u64) -> f32 {
        let origin_is_a = match self.direction {
            Direction::SideAToB => true,
            Direction::SideBToA => false,
            Direction::Unknown => side_a,
        };
        let peak = if side_a == origin_is_a {
            self.at_us
        } else {
            self.at_us + self.gap_us
        };
        let distance = now_us.abs_diff(peak) as f32;
        let shape = 1.0 - distance / self.half_width_us.max(1) as f32;
        self.magnitude as f32 * shape.max(0.0)
    }
}

pub struct SimulatedArray<C: Clock> {
    clock: C,
    sides: SideMap,
    count: u8,
    passes: Vec<Pass>,
    /// Repeat a pass every period, alternating direction.
    period_us: Option<u64>,
    inactive: [bool; MAX_SENSORS as usize],
    failing: [bool; MAX_SENSORS as usize],
    rng: ChaCha8Rng,
}

impl<C: Clock> SimulatedArray<C> {
    pub fn new(clock: C, sensor_count: u8, side_a_positions: &[u8]) -> Self {
        Self {
            clock,
            sides: SideMap::new(side_a_positions),
            count: sensor_count.min(MAX_SENSORS),
            passes: Vec::new(),
            period_us: None,
            inactive: [false; MAX_SENSORS as usize],
            failing: [false; MAX_SENSORS as usize],
            rng: ChaCha8Rng::seed_from_u64(NOISE_SEED),
        }
    }

    pub fn with_pass(mut self, pass: Pass) -> Self {
        self.passes.push(pass);
        self
    }

    pub fn with_periodic_passes(mut self, period_us: u64) -> Self {
        self.period_us = Some(period_us.max(1));
        self
    }

    pub fn deactivate(&mut self, position: u8) {
        if let Some(slot) = self.inactive.get_mut(position as usize) {
            *slot = true;
        }
    }

    /// Make reads of `position` fail with a bus error until cleared.
    pub fn set_failing(&mut self, position: u8, failing: bool) {
        if let Some(slot) = self.failing.get_mut(position as usize) {
            *slot = failing;
        }
    }

    fn periodic_pass(&self, now_us: u64) -> Option<Pass> {
        let period = self.period_us?;
        // Nearest scheduled pass; the first one comes a full period in.
        let k = ((now_us + period / 2) / period).max(1);
        let direction = if k % 2 == 1 {
            Direction::SideAToB
        } else {
            Direction::SideBToA
        };
        Some(Pass::new(k * period, direction))
    }

    /// Reseed the idle noise; runs with the same seed replay exactly.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    fn noise(&mut self) -> u16 {
        self.rng.gen_range(0..NOISE_SPAN)
    }
}

impl<C: Clock> SensorArray for SimulatedArray<C> {
    fn sensor_count(&self) -> u8 {
        self.count
    }

    fn is_active(&self, position: u8) -> bool {
        position < self.count && !self.inactive[position as usize]
    }

    fn read(&mut self, position: u8) -> Result<(u16, u16), SensorReadError> {
        if position >= self.count {
            return Err(SensorReadError::NoSuchPosition(position));
        }
        if self.inactive[position as usize] {
            return Err(SensorReadError::Inactive(position));
        }
        if self.failing[position as usize] {
            return Err(SensorReadError::Bus {
                position,
                message: "simulated NACK".into(),
            });
        }

        let now_us = self.clock.now_us();
        let side_a = self.sides.is_side_a(position);
        let rise: f32 = self
            .passes
            .iter()
            .copied()
            .chain(self.periodic_pass(now_us))
            .map(|p| p.rise(side_a, now_us))
            .sum();
        let proximity = IDLE_LEVEL - NOISE_SPAN / 2 + self.noise() + rise.round() as u16;
        Ok((proximity, AMBIENT_LEVEL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ManualClock;

    #[test]
    fn idle_readings_stay_in_noise_band() {
        let clock = ManualClock::starting_at(0);
        let mut array = SimulatedArray::new(clock.clone(), 6, &[1, 3, 5]);
        for _ in 0..200 {
            for p in 0..6 {
                let (prox, _) = array.read(p).unwrap();
                assert!((18..=22).contains(&prox), "{prox}");
            }
            clock.advance_us(1000);
        }
    }

    #[test]
    fn same_seed_replays_the_same_noise() {
        let clock = ManualClock::starting_at(0);
        let mut a = SimulatedArray::new(clock.clone(), 6, &[1, 3, 5]).with_seed(7);
        let mut b = SimulatedArray::new(clock, 6, &[1, 3, 5]).with_seed(7);
        let first: Vec<u16> = (0..50).map(|i| a.read(i % 6).unwrap().0).collect();
        let second: Vec<u16> = (0..50).map(|i| b.read(i % 6).unwrap().0).collect();
        assert_eq!(first, second);
        assert!(first.iter().any(|&v| v != first[0]));
    }

    #[test]
    fn pass_reaches_origin_side_first() {
        let clock = ManualClock::starting_at(100_000);
        let mut array = SimulatedArray::new(clock.clone(), 2, &[1])
            .with_pass(Pass::new(100_000, Direction::SideBToA));
        let (b, _) = array.read(0).unwrap();
        let (a, _) = array.read(1).unwrap();
        assert!(b > 130);
        assert!(a < 30);

        clock.set_us(140_000);
        assert!(array.read(1).unwrap().0 > 130);
    }

    #[test]
    fn faults_are_reported_per_position() {
        let clock = ManualClock::starting_at(0);
        let mut array = SimulatedArray::new(clock, 6, &[1, 3, 5]);
        array.deactivate(2);
        array.set_failing(4, true);
        assert_eq!(array.read(2), Err(SensorReadError::Inactive(2)));
        assert!(matches!(array.read(4), Err(SensorReadError::Bus { position: 4, .. })));
        assert_eq!(array.read(6), Err(SensorReadError::NoSuchPosition(6)));
        assert!(!array.metadata()[2].active);
        assert!(array.metadata()[4].active);
    }
}
