// Motion Play — Capture Buffer
//
// Bounded, append-ordered store of readings shared between the sensor task
// (single writer) and the control task. Storage comes from a `ReadingPool`
// reserved once at boot.
//
// Overflow policy is configurable; the firmware default is drop-oldest so the
// buffer always represents the most recent interval. Evictions and
// rejections are counted and reported in `BufferStats`.
//
// Readers that need a torn-free multi-reading view pause the sensor task
// through the `PauseGate` for the duration of one copy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::{BufferConfig, OverflowPolicy};
use crate::error::{BufferError, CaptureError};
use crate::events::{elapsed_us, Reading};
use crate::memory::{MemoryRegion, ReadingPool};
use crate::platform::Watchdog;

/// How long a parked sensor task sleeps between watchdog feeds.
const PARK_SLICE: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Ring storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct BufferStats {
    pub len: usize,
    pub capacity: usize,
    pub appended: u64,
    pub evicted: u64,
    pub rejected: u64,
    pub policy: OverflowPolicy,
    pub reserved_bytes: usize,
    pub region: MemoryRegion,
}

#[derive(Debug)]
pub struct CaptureBuffer {
    pool: ReadingPool,
    /// Index of the oldest reading.
    head: usize,
    len: usize,
    policy: OverflowPolicy,
    appended: u64,
    evicted: u64,
    rejected: u64,
}

impl CaptureBuffer {
    pub fn new(config: &BufferConfig) -> Result<Self, BufferError> {
        let pool = ReadingPool::reserve(config.capacity)?;
        Ok(Self::with_pool(pool, config.overflow_policy))
    }

    pub fn with_pool(pool: ReadingPool, policy: OverflowPolicy) -> Self {
        Self {
            pool,
            head: 0,
            len: 0,
            policy,
            appended: 0,
            evicted: 0,
            rejected: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.pool.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Append one reading. Amortised O(1); never grows past capacity.
    pub fn append(&mut self, reading: Reading) -> Result<(), BufferError> {
        let capacity = self.capacity();
        if self.len == capacity {
            match self.policy {
                OverflowPolicy::RejectNew => {
                    self.rejected += 1;
                    if self.rejected.is_power_of_two() {
                        log::warn!(
                            "Capture buffer full ({} readings) — {} readings rejected so far",
                            capacity,
                            self.rejected
                        );
                    }
                    return Err(BufferError::Full { capacity });
                }
                OverflowPolicy::DropOldest => {
                    self.head = (self.head + 1) % capacity;
                    self.len -= 1;
                    self.evicted += 1;
                    if self.evicted.is_power_of_two() {
                        log::debug!("Capture buffer wrapped — {} readings evicted so far", self.evicted);
                    }
                }
            }
        }

        let tail = (self.head + self.len) % capacity;
        self.pool.as_mut_slice()[tail] = reading;
        self.len += 1;
        self.appended += 1;
        Ok(())
    }

    /// Readings oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Reading> + '_ {
        let (front, back) = self.as_slices();
        front.iter().chain(back.iter())
    }

    fn as_slices(&self) -> (&[Reading], &[Reading]) {
        let storage = self.pool.as_slice();
        let end = self.head + self.len;
        if end <= storage.len() {
            (&storage[self.head..end], &[])
        } else {
            (&storage[self.head..], &storage[..end - storage.len()])
        }
    }

    pub fn oldest(&self) -> Option<&Reading> {
        self.iter().next()
    }

    pub fn newest(&self) -> Option<&Reading> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + self.len - 1) % self.capacity();
        self.pool.as_slice().get(idx)
    }

    /// Readings with `from <= timestamp <= to` on the wrapping clock, in
    /// acquisition order.
    pub fn slice_by_time(&self, from: u32, to: u32) -> Vec<Reading> {
        let mut out = Vec::new();
        self.slice_into(from, to, &mut out);
        out
    }

    pub fn slice_into(&self, from: u32, to: u32, out: &mut Vec<Reading>) {
        let span = elapsed_us(from, to);
        let in_range = |r: &&Reading| elapsed_us(from, r.timestamp) <= span;
        out.extend(
            self.iter()
                .skip_while(|r| !in_range(r))
                .take_while(in_range)
                .copied(),
        );
    }

    /// Readings taken within `span_us` of the newest one, oldest first. Walks
    /// back from the newest reading only as far as the span reaches.
    pub fn recent(&self, span_us: u32) -> Vec<Reading> {
        let Some(newest) = self.newest().map(|r| r.timestamp) else {
            return Vec::new();
        };
        let (front, back) = self.as_slices();
        let count = back
            .iter()
            .rev()
            .chain(front.iter().rev())
            .take_while(|r| elapsed_us(r.timestamp, newest) <= span_us)
            .count();
        self.iter().skip(self.len - count).copied().collect()
    }

    /// Drop leading readings taken at or before `to`. Returns how many went.
    pub fn discard_through(&mut self, to: u32) -> usize {
        let mut dropped = 0;
        while let Some(oldest) = self.oldest() {
            if (to.wrapping_sub(oldest.timestamp) as i32) < 0 {
                break;
            }
            self.head = (self.head + 1) % self.capacity();
            self.len -= 1;
            dropped += 1;
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            len: self.len,
            capacity: self.capacity(),
            appended: self.appended,
            evicted: self.evicted,
            rejected: self.rejected,
            policy: self.policy,
            reserved_bytes: self.pool.bytes(),
            region: self.pool.region(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pause / resume handshake
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct GateState {
    /// A sensor task is running and will honour pause requests.
    attached: bool,
    requested: bool,
    acknowledged: bool,
}

/// Flag-with-acknowledgement handshake between the control task and the
/// sensor task.
#[derive(Debug, Default)]
pub struct PauseGate {
    pending: AtomicBool,
    state: Mutex<GateState>,
    cv: Condvar,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the sensor task. Pause requests wait for its acknowledgement
    /// until the returned handle is dropped.
    pub fn attach(&self) -> Attachment<'_> {
        self.state().attached = true;
        Attachment { gate: self }
    }

    pub fn is_paused(&self) -> bool {
        self.state().acknowledged
    }

    /// Sensor-task side, called once per cycle. If a pause is pending the
    /// task acknowledges it and parks, feeding its watchdog, until resumed.
    /// Returns whether it parked.
    pub fn checkpoint<W: Watchdog + ?Sized>(&self, watchdog: &W) -> bool {
        if !self.pending.load(Ordering::Acquire) {
            return false;
        }

        let mut state = self.state();
        if !state.requested {
            return false;
        }
        state.acknowledged = true;
        self.cv.notify_all();

        while state.requested {
            let (next, _) = self
                .cv
                .wait_timeout(state, PARK_SLICE)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
            watchdog.feed();
        }
        state.acknowledged = false;
        true
    }

    /// Control-task side: request a pause and wait until the sensor task is
    /// parked. Resumes when the guard drops.
    pub fn pause(&self, timeout: Duration) -> Result<PauseGuard<'_>, CaptureError> {
        let mut state = self.state();
        state.requested = true;
        self.pending.store(true, Ordering::Release);

        let deadline = Instant::now() + timeout;
        while state.attached && !state.acknowledged {
            let now = Instant::now();
            if now >= deadline {
                state.requested = false;
                self.pending.store(false, Ordering::Release);
                self.cv.notify_all();
                return Err(CaptureError::PauseTimeout(timeout.as_millis() as u32));
            }
            let (next, _) = self
                .cv
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
        Ok(PauseGuard { gate: self })
    }

    fn resume(&self) {
        let mut state = self.state();
        state.requested = false;
        self.pending.store(false, Ordering::Release);
        self.cv.notify_all();
    }

    fn detach(&self) {
        let mut state = self.state();
        state.attached = false;
        state.acknowledged = false;
        self.cv.notify_all();
    }
}

/// Held by the sensor task while it runs.
#[derive(Debug)]
pub struct Attachment<'a> {
    gate: &'a PauseGate,
}

impl Drop for Attachment<'_> {
    fn drop(&mut self) {
        self.gate.detach();
    }
}

/// Acquisition stays suspended while this guard lives.
#[derive(Debug)]
pub struct PauseGuard<'a> {
    gate: &'a PauseGate,
}

impl PauseGuard<'_> {
    pub fn resume(self) {}
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.gate.resume();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// The only state shared between the sensor task and the control task.
#[derive(Debug, Clone)]
pub struct SharedBuffer {
    buffer: Arc<Mutex<CaptureBuffer>>,
    gate: Arc<PauseGate>,
}

impl SharedBuffer {
    pub fn new(buffer: CaptureBuffer) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(buffer)),
            gate: Arc::new(PauseGate::new()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, CaptureBuffer> {
        // A panic mid-append leaves indices consistent; keep going.
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn gate(&self) -> &PauseGate {
        &self.gate
    }

    /// Append one acquisition cycle under a single lock. Returns how many
    /// readings the overflow policy refused.
    pub fn append_cycle(&self, readings: &[Reading]) -> usize {
        let mut buffer = self.lock();
        readings
            .iter()
            .filter(|r| buffer.append(**r).is_err())
            .count()
    }

    /// Most recent `span_us` of readings, without pausing acquisition. The
    /// tail may still be growing; callers treat the result as advisory.
    pub fn recent(&self, span_us: u32) -> Vec<Reading> {
        self.lock().recent(span_us)
    }

    /// Pause acquisition, copy `[from, to]`, resume. The copy is exactly
    /// what the caller will transmit.
    pub fn snapshot(&self, from: u32, to: u32, timeout: Duration) -> Result<Vec<Reading>, CaptureError> {
        let guard = self.gate.pause(timeout)?;
        let readings = self.lock().slice_by_time(from, to);
        guard.resume();
        Ok(readings)
    }

    pub fn newest_timestamp(&self) -> Option<u32> {
        self.lock().newest().map(|r| r.timestamp)
    }

    pub fn discard_through(&self, to: u32) -> usize {
        self.lock().discard_through(to)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> BufferStats {
        self.lock().stats()
    }
}
