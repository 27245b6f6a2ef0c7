// Motion Play — Platform Services
//
// Clock and task-watchdog access. The ESP-IDF implementations are used on
// the device; host builds get equivalents with the same contracts so the
// pipeline runs unchanged in tests and in the simulated firmware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Monotonic microsecond clock. The 64-bit value never wraps in practice;
/// readings carry its low 32 bits.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> u64;

    /// Device timestamp for a reading taken now.
    fn timestamp(&self) -> u32 {
        self.now_us() as u32
    }

    fn now_ms(&self) -> u64 {
        self.now_us() / 1000
    }
}

/// Microseconds since boot (device) or since construction (host).
#[derive(Debug, Clone)]
pub struct SystemClock {
    #[cfg(not(target_os = "espidf"))]
    origin: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            origin: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[cfg(target_os = "espidf")]
    fn now_us(&self) -> u64 {
        // SAFETY: esp_timer is started by the IDF before app_main.
        unsafe { esp_idf_sys::esp_timer_get_time() as u64 }
    }

    #[cfg(not(target_os = "espidf"))]
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Clock advanced explicitly. Drives simulations and tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn starting_at(now_us: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now_us)),
        }
    }

    pub fn advance_us(&self, delta: u64) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set_us(&self, now_us: u64) {
        self.now.store(now_us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

/// Supervisory liveness signal. A task that stops feeding its watchdog for
/// longer than the configured bound gets the whole system restarted.
pub trait Watchdog {
    fn feed(&self);
}

/// Subscription of the calling FreeRTOS task to the IDF task watchdog.
/// Must be created on the task it supervises.
#[cfg(target_os = "espidf")]
pub struct TaskWatchdog {
    _not_send: std::marker::PhantomData<*const ()>,
}

#[cfg(target_os = "espidf")]
impl TaskWatchdog {
    pub fn subscribe_current() -> anyhow::Result<Self> {
        // SAFETY: a null handle means "the calling task".
        let ret = unsafe { esp_idf_sys::esp_task_wdt_add(core::ptr::null_mut()) };
        if ret != esp_idf_sys::ESP_OK {
            anyhow::bail!("esp_task_wdt_add failed ({ret})");
        }
        Ok(Self {
            _not_send: std::marker::PhantomData,
        })
    }
}

#[cfg(target_os = "espidf")]
impl Watchdog for TaskWatchdog {
    fn feed(&self) {
        // SAFETY: the calling task subscribed in `subscribe_current`.
        unsafe {
            esp_idf_sys::esp_task_wdt_reset();
        }
    }
}

#[cfg(target_os = "espidf")]
impl Drop for TaskWatchdog {
    fn drop(&mut self) {
        // SAFETY: unsubscribes the task that subscribed.
        unsafe {
            esp_idf_sys::esp_task_wdt_delete(core::ptr::null_mut());
        }
    }
}

/// Host-side watchdog: records feeds so a supervisor or a test can see
/// whether a task kept signalling.
#[derive(Debug, Clone, Default)]
pub struct SoftWatchdog {
    feeds: Arc<AtomicU64>,
}

impl SoftWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feeds(&self) -> u64 {
        self.feeds.load(Ordering::Relaxed)
    }
}

impl Watchdog for SoftWatchdog {
    fn feed(&self) {
        self.feeds.fetch_add(1, Ordering::Relaxed);
    }
}
