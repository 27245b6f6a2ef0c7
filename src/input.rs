// Motion Play — Missed-Event Button
//
// Debounced push button. A press tells the control task that a pass went
// by without a detection, and it captures the last few seconds.
// Polled at ~100 Hz from the input task.

use std::sync::mpsc::Sender;
use std::thread;
use std::time::{Duration, Instant};

use crate::events::ControlEvent;
use crate::platform::Watchdog;

pub struct MissedEventButton<P: FnMut() -> bool> {
    /// Returns true while the button is held.
    is_pressed: P,
    control_tx: Sender<ControlEvent>,
    debounce: Duration,

    last_raw: bool,
    last_change: Instant,
    button_down: bool,
    presses: u32,
}

impl<P: FnMut() -> bool> MissedEventButton<P> {
    pub fn new(is_pressed: P, control_tx: Sender<ControlEvent>, debounce: Duration) -> Self {
        Self {
            is_pressed,
            control_tx,
            debounce,
            last_raw: false,
            last_change: Instant::now(),
            button_down: false,
            presses: 0,
        }
    }

    pub fn presses(&self) -> u32 {
        self.presses
    }

    /// Sample the pin once. Returns false once the control task is gone.
    pub fn update(&mut self) -> bool {
        self.update_at(Instant::now())
    }

    pub fn update_at(&mut self, now: Instant) -> bool {
        let raw = (self.is_pressed)();
        if raw != self.last_raw {
            self.last_raw = raw;
            self.last_change = now;
            return true;
        }
        if now.duration_since(self.last_change) < self.debounce {
            return true;
        }

        if raw && !self.button_down {
            self.button_down = true;
            self.presses += 1;
            log::info!("Missed-event button pressed (#{})", self.presses);
            if self.control_tx.send(ControlEvent::MissedEvent).is_err() {
                return false;
            }
        } else if !raw && self.button_down {
            self.button_down = false;
        }
        true
    }
}

/// Task entry point: poll the button every `poll` until the control task is
/// gone, feeding the watchdog on every pass.
pub fn input_task<P, W, F>(mut button: MissedEventButton<P>, poll: Duration, subscribe: F)
where
    P: FnMut() -> bool,
    W: Watchdog,
    F: FnOnce() -> anyhow::Result<W>,
{
    log::info!("Input task started");
    let watchdog = match subscribe() {
        Ok(w) => w,
        Err(e) => {
            log::error!("Input task watchdog subscription failed: {e:#}");
            return;
        }
    };
    while button.update() {
        watchdog.feed();
        thread::sleep(poll);
    }
    log::warn!("Control channel closed, exiting input task");
}
