// Motion Play — Sensor Task
//
// Sweeps every active sensor once per cycle and appends the readings to the
// capture buffer under one shared cycle timestamp. Read failures are counted
// and skipped. Each cycle also honours pause requests, feeds the task
// watchdog every liveness interval, and yields briefly every few cycles so
// lower-priority tasks on the core get to run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::buffer::SharedBuffer;
use crate::config::AcquisitionConfig;
use crate::drivers::SensorArray;
use crate::error::SensorReadError;
use crate::events::Reading;
use crate::platform::{Clock, Watchdog};

/// Consecutive failures logged individually before rate limiting starts.
const FAILURE_LOG_BURST: u32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    pub cycles: u64,
    pub readings: u64,
    pub read_failures: u64,
    /// Failures since the last successful read.
    pub failure_streak: u32,
    /// Readings the buffer refused under the reject-new policy.
    pub rejected: u64,
    /// Completed cycles per second over the last liveness interval.
    pub cycle_rate_hz: u32,
}

pub struct AcquisitionLoop<S: SensorArray, C: Clock> {
    sensors: S,
    clock: C,
    buffer: SharedBuffer,
    config: AcquisitionConfig,
    cycle: Vec<Reading>,
    stats: AcquisitionStats,
    last_failure_log_ms: u64,
}

impl<S: SensorArray, C: Clock> AcquisitionLoop<S, C> {
    pub fn new(sensors: S, clock: C, buffer: SharedBuffer, config: AcquisitionConfig) -> Self {
        let width = sensors.sensor_count() as usize;
        Self {
            sensors,
            clock,
            buffer,
            config,
            cycle: Vec::with_capacity(width),
            stats: AcquisitionStats::default(),
            last_failure_log_ms: 0,
        }
    }

    pub fn stats(&self) -> &AcquisitionStats {
        &self.stats
    }

    pub fn sensors_mut(&mut self) -> &mut S {
        &mut self.sensors
    }

    /// One sweep of all active sensors. Returns the readings appended.
    pub fn run_cycle(&mut self) -> usize {
        let timestamp = self.clock.timestamp();
        self.cycle.clear();

        let count = self.sensors.sensor_count().min(self.config.sensor_count);
        for position in 0..count {
            if !self.sensors.is_active(position) {
                continue;
            }
            match self.sensors.read(position) {
                Ok((proximity, ambient)) => {
                    self.stats.failure_streak = 0;
                    self.cycle.push(Reading::new(timestamp, position, proximity, ambient));
                }
                Err(e) => self.record_failure(&e),
            }
        }

        let rejected = self.buffer.append_cycle(&self.cycle);
        self.stats.cycles += 1;
        self.stats.readings += (self.cycle.len() - rejected) as u64;
        self.stats.rejected += rejected as u64;
        self.cycle.len() - rejected
    }

    fn record_failure(&mut self, error: &SensorReadError) {
        self.stats.read_failures += 1;
        self.stats.failure_streak += 1;

        let now_ms = self.clock.now_ms();
        if self.stats.failure_streak <= FAILURE_LOG_BURST {
            log::warn!("Sensor read failed: {}", error);
            self.last_failure_log_ms = now_ms;
        } else if now_ms.saturating_sub(self.last_failure_log_ms) >= self.config.read_failure_log_interval_ms as u64 {
            log::warn!(
                "Sensor read failed: {} ({} consecutive, {} total)",
                error,
                self.stats.failure_streak,
                self.stats.read_failures
            );
            self.last_failure_log_ms = now_ms;
        }
    }

    /// Sample until `stop` is set.
    pub fn run<W: Watchdog + ?Sized>(&mut self, watchdog: &W, stop: &AtomicBool) {
        let buffer = self.buffer.clone();
        let _attached = buffer.gate().attach();

        let interval = Duration::from_micros(self.config.sample_interval_us as u64);
        let liveness_ms = self.config.liveness_interval_ms as u64;
        let mut last_feed_ms = self.clock.now_ms();
        let mut cycles_at_feed = self.stats.cycles;
        watchdog.feed();

        while !stop.load(Ordering::Relaxed) {
            let started_us = self.clock.now_us();
            self.run_cycle();

            buffer.gate().checkpoint(watchdog);

            let now_ms = self.clock.now_ms();
            let since_feed = now_ms.saturating_sub(last_feed_ms);
            if since_feed >= liveness_ms {
                watchdog.feed();
                self.stats.cycle_rate_hz = ((self.stats.cycles - cycles_at_feed) * 1000 / since_feed.max(1)) as u32;
                last_feed_ms = now_ms;
                cycles_at_feed = self.stats.cycles;
            }

            if self.config.yield_every_cycles > 0 && self.stats.cycles % self.config.yield_every_cycles as u64 == 0 {
                thread::sleep(Duration::from_millis(1));
            }

            let elapsed = Duration::from_micros(self.clock.now_us().saturating_sub(started_us));
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        log::info!(
            "Sensor task stopping: {} cycles, {} readings, {} failures",
            self.stats.cycles,
            self.stats.readings,
            self.stats.read_failures
        );
    }
}

/// Task entry point. The watchdog is subscribed from inside the task.
pub fn sensor_task<S, C, W, F>(mut acquisition: AcquisitionLoop<S, C>, subscribe: F, stop: &AtomicBool)
where
    S: SensorArray,
    C: Clock,
    W: Watchdog,
    F: FnOnce() -> anyhow::Result<W>,
{
    log::info!("Sensor task started");
    let watchdog = match subscribe() {
        Ok(w) => w,
        Err(e) => {
            log::error!("Sensor task watchdog subscription failed: {e:#}");
            return;
        }
    };
    acquisition.run(&watchdog, stop);
}
