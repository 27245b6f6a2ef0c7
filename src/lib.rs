// Motion Play — Device Core
//
// Sensor acquisition, direction detection and capture transmission for the
// Motion Play hoop, plus the ingest-side decoding of what the hoop sends.
// The firmware binary wires these into FreeRTOS tasks; on the host the same
// pipeline runs against a simulated sensor array.

pub mod buffer;
pub mod calibration;
pub mod capture;
pub mod config;
pub mod detector;
pub mod drivers;
pub mod error;
pub mod events;
pub mod ingest;
pub mod input;
pub mod keys;
pub mod memory;
pub mod platform;
pub mod tasks;
pub mod transport;
pub mod wire;
