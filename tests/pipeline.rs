// End-to-end runs of the device pipeline on the host: simulated hoop,
// manual clock, recording transport. The sensor and control loops are
// stepped from the test thread, one sample interval per acquisition cycle.

use std::collections::HashSet;

use motionplay::buffer::{CaptureBuffer, SharedBuffer};
use motionplay::capture::{CaptureOrchestrator, CaptureReport, CaptureState, Session};
use motionplay::config::{Config, OverflowPolicy};
use motionplay::detector::DirectionDetector;
use motionplay::drivers::simulated::{Pass, SimulatedArray};
use motionplay::drivers::SensorArray;
use motionplay::error::CaptureError;
use motionplay::events::{CaptureReason, Direction};
use motionplay::ingest;
use motionplay::platform::{Clock, ManualClock};
use motionplay::tasks::control::ControlLoop;
use motionplay::tasks::sensor::AcquisitionLoop;
use motionplay::transport::Transport;
use motionplay::wire;

#[derive(Default)]
struct RecordingTransport {
    limit: usize,
    sent: Vec<Vec<u8>>,
}

impl Transport for RecordingTransport {
    fn max_payload(&self) -> usize {
        self.limit
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), CaptureError> {
        self.sent.push(payload.to_vec());
        Ok(())
    }
}

struct Rig {
    clock: ManualClock,
    buffer: SharedBuffer,
    acquisition: AcquisitionLoop<SimulatedArray<ManualClock>, ManualClock>,
    control: ControlLoop<RecordingTransport, ManualClock>,
    cycle_us: u64,
    interval_ms: u64,
    next_analysis_ms: u64,
}

impl Rig {
    fn new(config: Config, passes: &[Pass]) -> Self {
        let clock = ManualClock::starting_at(0);
        let buffer = SharedBuffer::new(CaptureBuffer::new(&config.buffer).unwrap());
        let mut sensors = SimulatedArray::new(
            clock.clone(),
            config.acquisition.sensor_count,
            &config.detector.side_a_positions,
        );
        for pass in passes {
            sensors = sensors.with_pass(*pass);
        }
        let orchestrator = CaptureOrchestrator::new(
            config.capture.clone(),
            buffer.clone(),
            RecordingTransport {
                limit: config.capture.transport_max_payload,
                sent: Vec::new(),
            },
            clock.clone(),
            Session::begin(&config.device.device_id, &clock),
            sensors.metadata(),
        );
        let control = ControlLoop::new(
            DirectionDetector::new(config.detector.clone()),
            orchestrator,
            buffer.clone(),
        );
        let acquisition = AcquisitionLoop::new(sensors, clock.clone(), buffer.clone(), config.acquisition.clone());
        let interval_ms = config.detector.analysis_interval_ms as u64;
        Self {
            clock,
            buffer,
            acquisition,
            control,
            cycle_us: config.acquisition.sample_interval_us as u64,
            interval_ms,
            next_analysis_ms: interval_ms,
        }
    }

    /// Acquisition only, no analysis.
    fn acquire_cycles(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.acquisition.run_cycle();
            self.clock.advance_us(self.cycle_us);
        }
    }

    /// Acquire for `ms` milliseconds, running an analysis pass on schedule.
    fn run_for(&mut self, ms: u64) -> Vec<Result<CaptureReport, CaptureError>> {
        let mut outcomes = Vec::new();
        let until = self.clock.now_ms() + ms;
        self.next_analysis_ms = self.next_analysis_ms.max(self.clock.now_ms() + self.interval_ms);
        while self.clock.now_ms() < until {
            self.acquire_cycles(1);
            if self.clock.now_ms() >= self.next_analysis_ms {
                self.next_analysis_ms += self.interval_ms;
                if let Some(outcome) = self.control.analysis_pass() {
                    outcomes.push(outcome);
                }
            }
        }
        outcomes
    }

    fn sent(&self) -> &[Vec<u8>] {
        &self.control.orchestrator().transport().sent
    }
}

fn idle_then_calibrate(rig: &mut Rig) {
    let cycles = 1_000_000 / rig.cycle_us;
    rig.acquire_cycles(cycles);
    let calibration = rig.control.calibrate().expect("idle readings on both sides");
    assert!((calibration.baseline().side_a - 60.0).abs() < 3.0);
}

#[test]
fn each_pass_is_captured_once_with_its_direction() {
    let passes = [
        Pass::new(1_500_000, Direction::SideAToB),
        Pass::new(4_000_000, Direction::SideBToA),
    ];
    let mut rig = Rig::new(Config::default(), &passes);
    idle_then_calibrate(&mut rig);

    let outcomes = rig.run_for(5_000);
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.is_ok()));

    let decoded: Vec<_> = rig.sent().iter().map(|m| wire::decode_capture(m).unwrap()).collect();
    let directions: Vec<_> = decoded.iter().map(|d| d.record.direction).collect();
    assert_eq!(directions, [Some(Direction::SideAToB), Some(Direction::SideBToA)]);
    assert!(decoded.iter().all(|d| d.record.confidence.unwrap() > 0.5));
    assert_eq!(decoded[0].record.capture_id + 1, decoded[1].record.capture_id);

    // The captured window contains the pass.
    let first = &decoded[0].record;
    let peak = first.readings.iter().map(|r| r.proximity).max().unwrap();
    assert!(peak > 100);
    assert!(first.readings.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(rig.control.orchestrator().state(), CaptureState::Acquiring);
}

#[test]
fn idle_hoop_sends_nothing() {
    let mut rig = Rig::new(Config::default(), &[]);
    idle_then_calibrate(&mut rig);
    assert!(rig.run_for(3_000).is_empty());
    assert!(rig.sent().is_empty());
}

#[test]
fn captured_rows_never_collide_in_the_store() {
    let mut rig = Rig::new(Config::default(), &[Pass::new(1_600_000, Direction::SideAToB)]);
    idle_then_calibrate(&mut rig);
    rig.run_for(1_500);

    let message = rig.sent().first().expect("one capture");
    let ingested = ingest::ingest(message).unwrap();
    assert!(ingested.unkeyed.is_empty());
    let keys: HashSet<u64> = ingested.rows.iter().map(|r| r.key).collect();
    assert_eq!(keys.len(), ingested.rows.len());
    assert_eq!(ingested.direction, Some(Direction::SideAToB));
}

#[test]
fn oversized_capture_is_refused_and_acquisition_continues() {
    let mut config = Config::default();
    config.capture.transport_max_payload = 2_048;
    let mut rig = Rig::new(config, &[Pass::new(1_500_000, Direction::SideAToB)]);
    idle_then_calibrate(&mut rig);

    let outcomes = rig.run_for(1_000);
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes[0],
        Err(CaptureError::SerializationOverflow { limit: 2_048, .. })
    ));
    assert!(rig.sent().is_empty());
    assert_eq!(rig.control.orchestrator().stats().overflows, 1);
    assert_eq!(rig.control.orchestrator().state(), CaptureState::Acquiring);

    let before = rig.acquisition.stats().cycles;
    rig.acquire_cycles(100);
    assert_eq!(rig.acquisition.stats().cycles, before + 100);
}

#[test]
fn missed_event_captures_trailing_seconds() {
    let mut rig = Rig::new(Config::default(), &[]);
    idle_then_calibrate(&mut rig);
    rig.run_for(6_000);

    let report = rig.control.missed_event().unwrap();
    assert_eq!(report.reason, CaptureReason::MissedEvent);
    // 5 s window inclusive of both ends, six sensors per cycle.
    let cycles = 5_000_000 / rig.cycle_us + 1;
    assert_eq!(report.readings as u64, cycles * 6);
    assert!(report.bytes <= 128 * 1024);

    let decoded = wire::decode_capture(&rig.sent()[0]).unwrap();
    assert_eq!(decoded.record.direction, None);
    assert_eq!(decoded.sensors.len(), 6);
}

#[test]
fn reject_new_buffer_freezes_and_counts() {
    let mut config = Config::default();
    config.buffer.capacity = 600;
    config.buffer.overflow_policy = OverflowPolicy::RejectNew;
    let mut rig = Rig::new(config, &[]);

    rig.acquire_cycles(150);
    let stats = rig.buffer.stats();
    assert_eq!(stats.len, 600);
    assert_eq!(stats.rejected, 150 * 6 - 600);
    assert_eq!(rig.acquisition.stats().rejected, stats.rejected);
    let last_kept = 99 * rig.cycle_us as u32;
    assert_eq!(rig.buffer.lock().newest().unwrap().timestamp, last_kept);
}
