// Motion Play — Control Task
//
// Lower-priority half of the firmware. Calibrates the per-side baseline at
// boot, then every analysis interval runs the detector over the most recent
// window of the buffer and captures each pass it reports. A missed-event
// trigger from the button captures the trailing few seconds instead.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::buffer::SharedBuffer;
use crate::calibration::{BaselineCalibrator, Calibration};
use crate::capture::{CaptureOrchestrator, CaptureReport};
use crate::config::ms_to_us;
use crate::detector::DirectionDetector;
use crate::error::CaptureError;
use crate::events::ControlEvent;
use crate::platform::{Clock, Watchdog};
use crate::transport::Transport;

pub struct ControlLoop<T: Transport, C: Clock> {
    detector: DirectionDetector,
    orchestrator: CaptureOrchestrator<T, C>,
    buffer: SharedBuffer,
}

impl<T: Transport, C: Clock> ControlLoop<T, C> {
    pub fn new(detector: DirectionDetector, orchestrator: CaptureOrchestrator<T, C>, buffer: SharedBuffer) -> Self {
        Self {
            detector,
            orchestrator,
            buffer,
        }
    }

    pub fn detector(&self) -> &DirectionDetector {
        &self.detector
    }

    pub fn orchestrator(&self) -> &CaptureOrchestrator<T, C> {
        &self.orchestrator
    }

    /// Derive the baseline from whatever the buffer holds for the
    /// calibration period. Call while the hoop is idle.
    pub fn calibrate(&mut self) -> Option<Calibration> {
        let span_us = ms_to_us(self.detector.config().calibration_duration_ms);
        let mut calibrator = BaselineCalibrator::new(self.detector.side_map().clone());
        calibrator.observe(&self.buffer.recent(span_us));
        let calibration = calibrator.finish()?;
        self.detector.set_baseline(calibration.baseline());
        Some(calibration)
    }

    /// One detector pass over the rolling window; captures a completed pass.
    pub fn analysis_pass(&mut self) -> Option<Result<CaptureReport, CaptureError>> {
        let window_us = ms_to_us(self.detector.config().analysis_window_ms);
        let recent = self.buffer.recent(window_us);
        let event = self.detector.process(&recent)?;

        log::info!(
            "Detected {} (confidence {:.2}, rise A {:.0} / B {:.0})",
            event.direction.as_str(),
            event.confidence,
            event.peak_magnitude_a,
            event.peak_magnitude_b
        );
        let outcome = self.orchestrator.capture_detection(&event);
        // The consumed readings are gone; earlier windows no longer apply.
        self.detector.reset();
        Some(outcome)
    }

    pub fn missed_event(&mut self) -> Result<CaptureReport, CaptureError> {
        let outcome = self.orchestrator.capture_missed_event();
        self.detector.reset();
        outcome
    }

    /// Serve events and analysis passes until shutdown or until every sender
    /// is gone.
    pub fn run<W: Watchdog + ?Sized>(&mut self, events: &Receiver<ControlEvent>, watchdog: &W) {
        let config = self.detector.config();
        let interval = Duration::from_millis(config.analysis_interval_ms as u64);
        let settle = Duration::from_millis(config.calibration_duration_ms as u64);

        // Let the buffer fill with idle readings before calibrating.
        let start = Instant::now();
        while start.elapsed() < settle {
            watchdog.feed();
            thread::sleep(interval.min(settle));
        }
        if self.calibrate().is_none() {
            log::warn!("Calibration saw no readings; using per-window baselines");
        }

        loop {
            watchdog.feed();
            match events.recv_timeout(interval) {
                Ok(ControlEvent::MissedEvent) => {
                    let _ = self.missed_event();
                }
                Ok(ControlEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    let _ = self.analysis_pass();
                }
            }
        }

        let stats = self.orchestrator.stats();
        log::info!(
            "Control task stopping: {} captures sent, {} failed",
            stats.sent,
            stats.attempted - stats.sent
        );
    }
}

/// Task entry point. The watchdog is subscribed from inside the task.
pub fn control_task<T, C, W, F>(mut control: ControlLoop<T, C>, events: Receiver<ControlEvent>, subscribe: F)
where
    T: Transport,
    C: Clock,
    W: Watchdog,
    F: FnOnce() -> anyhow::Result<W>,
{
    log::info!("Control task started");
    let watchdog = match subscribe() {
        Ok(w) => w,
        Err(e) => {
            log::error!("Control task watchdog subscription failed: {e:#}");
            return;
        }
    };
    control.run(&events, &watchdog);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    use crate::buffer::CaptureBuffer;
    use crate::capture::Session;
    use crate::config::{BufferConfig, CaptureConfig, DetectorConfig};
    use crate::events::{CaptureReason, Reading, SensorMetadata};
    use crate::platform::{ManualClock, SoftWatchdog};
    use crate::wire;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<Vec<u8>>,
    }

    impl Transport for Recorder {
        fn max_payload(&self) -> usize {
            usize::MAX
        }

        fn send(&mut self, payload: &[u8]) -> Result<(), CaptureError> {
            self.sent.push(payload.to_vec());
            Ok(())
        }
    }

    /// Control loop over 6 s of idle readings, with short real-time settle
    /// and analysis periods.
    fn idle_control() -> ControlLoop<Recorder, ManualClock> {
        let clock = ManualClock::starting_at(0);
        let buffer = SharedBuffer::new(CaptureBuffer::new(&BufferConfig::default()).unwrap());
        for _ in 0..1000 {
            let ts = clock.timestamp();
            let cycle: Vec<Reading> = (0..6).map(|p| Reading::new(ts, p, 20, 140)).collect();
            buffer.append_cycle(&cycle);
            clock.advance_us(6000);
        }
        let detector = DirectionDetector::new(DetectorConfig {
            calibration_duration_ms: 20,
            analysis_interval_ms: 5,
            ..DetectorConfig::default()
        });
        let sensors = (0..6).map(|p| SensorMetadata::for_position(p, true)).collect();
        let orchestrator = CaptureOrchestrator::new(
            CaptureConfig::default(),
            buffer.clone(),
            Recorder::default(),
            clock.clone(),
            Session::begin("hoop", &clock),
            sensors,
        );
        ControlLoop::new(detector, orchestrator, buffer)
    }

    #[test]
    fn run_serves_missed_event_then_stops_on_shutdown() {
        let mut control = idle_control();
        let (tx, rx) = mpsc::channel();
        let watchdog = SoftWatchdog::new();
        let task = {
            let watchdog = watchdog.clone();
            std::thread::spawn(move || {
                control.run(&rx, &watchdog);
                control
            })
        };

        tx.send(ControlEvent::MissedEvent).unwrap();
        tx.send(ControlEvent::Shutdown).unwrap();
        let control = task.join().unwrap();

        let stats = control.orchestrator().stats();
        assert_eq!(stats.attempted, 1);
        assert_eq!(stats.sent, 1);
        let sent = &control.orchestrator().transport().sent;
        let decoded = wire::decode_capture(&sent[0]).unwrap();
        assert_eq!(decoded.record.reason, CaptureReason::MissedEvent);
        assert!(control.detector().baseline().is_some());
        assert!(watchdog.feeds() > 0);
        // Shutdown ended the loop with the sender still alive.
        drop(tx);
    }

    #[test]
    fn run_exits_when_every_sender_is_gone() {
        let mut control = idle_control();
        let (tx, rx) = mpsc::channel::<ControlEvent>();
        let watchdog = SoftWatchdog::new();
        let task = {
            let watchdog = watchdog.clone();
            std::thread::spawn(move || {
                control.run(&rx, &watchdog);
                control
            })
        };

        drop(tx);
        let control = task.join().unwrap();
        assert_eq!(control.orchestrator().stats().attempted, 0);
        assert!(watchdog.feeds() > 0);
    }
}
