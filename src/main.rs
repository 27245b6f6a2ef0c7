// Motion Play — Firmware Entry Point
//
// Boot sequence:
//   1. Initialise logging and load the configuration.
//   2. Reserve the capture buffer (PSRAM on the device).
//   3. Bring up the sensor array: the VCNL4040 mux tree on the device, a
//      simulated array on the host.
//   4. Start the capture transport (MQTT when a broker is configured).
//   5. Spawn the sensor, control and input tasks.
//
// The sensor task runs at the highest priority on its own core; everything
// else (detection, captures, MQTT) runs on the control task.

use std::sync::mpsc;

use motionplay::buffer::{CaptureBuffer, SharedBuffer};
use motionplay::capture::{CaptureOrchestrator, Session};
use motionplay::config::*;
use motionplay::detector::DirectionDetector;
use motionplay::drivers::SensorArray;
use motionplay::platform::SystemClock;
use motionplay::tasks::control::ControlLoop;
use motionplay::transport::{LogTransport, Transport};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------
fn main() -> anyhow::Result<()> {
    init_logging();
    log::info!("Motion Play firmware starting…");

    let config = load_config()?;
    log::info!(
        "Device {} — {} sensors, buffer {} readings ({:?})",
        config.device.device_id,
        config.acquisition.sensor_count,
        config.buffer.capacity,
        config.buffer.overflow_policy
    );

    let buffer = SharedBuffer::new(CaptureBuffer::new(&config.buffer)?);
    let clock = SystemClock::new();
    let session = Session::begin(&config.device.device_id, &clock);
    log::info!("Session {}", session.session_id);

    board::run(config, buffer, clock, session)
}

/// Assemble the control side once the sensor array is known.
fn control_loop(
    config: &Config,
    buffer: &SharedBuffer,
    clock: SystemClock,
    session: Session,
    sensors: &dyn SensorArray,
    transport: Box<dyn Transport + Send>,
) -> ControlLoop<Box<dyn Transport + Send>, SystemClock> {
    let orchestrator = CaptureOrchestrator::new(
        config.capture.clone(),
        buffer.clone(),
        transport,
        clock,
        session,
        sensors.metadata(),
    );
    ControlLoop::new(DirectionDetector::new(config.detector.clone()), orchestrator, buffer.clone())
}

fn log_diagnostics(buffer: &SharedBuffer) {
    let stats = buffer.stats();
    log::info!(
        "Buffer {}/{} readings, {} appended, {} evicted, {} rejected ({} bytes in {})",
        stats.len,
        stats.capacity,
        stats.appended,
        stats.evicted,
        stats.rejected,
        stats.reserved_bytes,
        stats.region
    );
}

// ---------------------------------------------------------------------------
// Device (ESP32-S3)
// ---------------------------------------------------------------------------
#[cfg(target_os = "espidf")]
fn init_logging() {
    // Link esp-idf-sys runtime patches and initialise logging.
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
}

/// Overrides are baked in at build time from `MOTIONPLAY_CONFIG_JSON`.
#[cfg(target_os = "espidf")]
fn load_config() -> anyhow::Result<Config> {
    let config = match option_env!("MOTIONPLAY_CONFIG_JSON") {
        Some(json) => Config::from_json(json)?,
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}

#[cfg(target_os = "espidf")]
mod board {
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    use esp_idf_hal::cpu::Core;
    use esp_idf_hal::gpio::{PinDriver, Pull};
    use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
    use esp_idf_hal::prelude::*;
    use esp_idf_hal::task::thread::ThreadSpawnConfiguration;

    use motionplay::drivers::proximity::ProximityArray;
    use motionplay::input::MissedEventButton;
    use motionplay::platform::TaskWatchdog;
    use motionplay::tasks::sensor::AcquisitionLoop;
    use motionplay::transport::MqttTransport;

    use super::*;

    static STOP: AtomicBool = AtomicBool::new(false);

    pub fn run(config: Config, buffer: SharedBuffer, clock: SystemClock, session: Session) -> anyhow::Result<()> {
        let peripherals = Peripherals::take()?;

        // ---- I2C bus (root mux, board muxes, sensors) ---------------------
        let i2c_config = I2cConfig::new().baudrate(I2C_BAUDRATE_HZ.Hz());
        let i2c = I2cDriver::new(
            peripherals.i2c0,
            peripherals.pins.gpio43, // SDA
            peripherals.pins.gpio44, // SCL
            &i2c_config,
        )?;
        let sensors = ProximityArray::probe(i2c, config.acquisition.sensor_count, &config.sensor)?;

        // ---- Missed-event button (active LOW, internal pull-up) -----------
        let mut button_pin = PinDriver::input(peripherals.pins.gpio14)?;
        button_pin.set_pull(Pull::Up)?;

        // ---- Transport ---------------------------------------------------
        // Network bring-up happens before this point in the product image.
        let transport: Box<dyn Transport + Send> = match &config.capture.broker_url {
            Some(url) => Box::new(MqttTransport::connect(
                url,
                &config.device.device_id,
                &config.capture.topic,
                config.capture.transport_max_payload,
            )?),
            None => {
                log::warn!("No MQTT broker configured — captures will only be logged");
                Box::new(LogTransport::new(config.capture.transport_max_payload))
            }
        };

        let (control_tx, control_rx) = mpsc::channel();
        let control = control_loop(&config, &buffer, clock.clone(), session, &sensors, transport);
        let acquisition = AcquisitionLoop::new(sensors, clock, buffer.clone(), config.acquisition.clone());

        // ---- Spawn tasks (map to FreeRTOS tasks via std::thread) -----------

        // Sensor task: highest priority, alone on core 1.
        ThreadSpawnConfiguration {
            name: Some(b"sensor\0"),
            stack_size: STACK_SENSOR,
            priority: PRIORITY_SENSOR,
            pin_to_core: Some(Core::Core1),
            ..Default::default()
        }
        .set()?;
        thread::Builder::new()
            .name("sensor".into())
            .stack_size(STACK_SENSOR)
            .spawn(move || {
                motionplay::tasks::sensor::sensor_task(acquisition, TaskWatchdog::subscribe_current, &STOP);
            })?;

        // Control task: detection, captures, MQTT.
        ThreadSpawnConfiguration {
            name: Some(b"control\0"),
            stack_size: STACK_CONTROL,
            priority: PRIORITY_CONTROL,
            pin_to_core: Some(Core::Core0),
            ..Default::default()
        }
        .set()?;
        thread::Builder::new()
            .name("control".into())
            .stack_size(STACK_CONTROL)
            .spawn(move || {
                motionplay::tasks::control::control_task(control, control_rx, TaskWatchdog::subscribe_current);
            })?;

        // Input task: missed-event button.
        ThreadSpawnConfiguration {
            name: Some(b"input\0"),
            stack_size: STACK_INPUT,
            priority: PRIORITY_INPUT,
            pin_to_core: Some(Core::Core0),
            ..Default::default()
        }
        .set()?;
        thread::Builder::new()
            .name("input".into())
            .stack_size(STACK_INPUT)
            .spawn(move || {
                let debounce = Duration::from_millis(DEBOUNCE_MS);
                let button = MissedEventButton::new(move || button_pin.is_low(), control_tx, debounce);
                let poll = Duration::from_millis(BUTTON_POLL_INTERVAL_MS);
                motionplay::input::input_task(button, poll, TaskWatchdog::subscribe_current);
            })?;

        ThreadSpawnConfiguration::default().set()?;

        // Main thread has nothing left to do but report memory health.
        loop {
            thread::sleep(Duration::from_secs(DIAGNOSTICS_INTERVAL_S));
            log_diagnostics(&buffer);
            // SAFETY: plain heap queries.
            let (heap, psram) = unsafe {
                (
                    esp_idf_sys::esp_get_free_heap_size(),
                    esp_idf_sys::heap_caps_get_free_size(esp_idf_sys::MALLOC_CAP_SPIRAM),
                )
            };
            log::info!("Free heap {} bytes, free PSRAM {} bytes", heap, psram);
        }
    }
}

// ---------------------------------------------------------------------------
// Host (simulation)
// ---------------------------------------------------------------------------
#[cfg(not(target_os = "espidf"))]
fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Optional JSON file named by `MOTIONPLAY_CONFIG`.
#[cfg(not(target_os = "espidf"))]
fn load_config() -> anyhow::Result<Config> {
    use anyhow::Context;

    match std::env::var("MOTIONPLAY_CONFIG") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            Config::from_json(&json).with_context(|| format!("loading {path}"))
        }
        Err(_) => {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

#[cfg(not(target_os = "espidf"))]
mod board {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use motionplay::drivers::simulated::SimulatedArray;
    use motionplay::events::ControlEvent;
    use motionplay::platform::SoftWatchdog;
    use motionplay::tasks::sensor::AcquisitionLoop;

    use super::*;

    /// Run the pipeline against simulated passes for `MOTIONPLAY_RUN_SECS`,
    /// then request one missed-event capture and shut down.
    pub fn run(config: Config, buffer: SharedBuffer, clock: SystemClock, session: Session) -> anyhow::Result<()> {
        let run_secs = std::env::var("MOTIONPLAY_RUN_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(SIM_RUN_SECS);

        let sensors = SimulatedArray::new(
            clock.clone(),
            config.acquisition.sensor_count,
            &config.detector.side_a_positions,
        )
        .with_periodic_passes(SIM_PASS_PERIOD_US);
        let transport: Box<dyn Transport + Send> = Box::new(LogTransport::new(config.capture.transport_max_payload));

        let (control_tx, control_rx) = mpsc::channel();
        let control = control_loop(&config, &buffer, clock.clone(), session, &sensors, transport);
        let acquisition = AcquisitionLoop::new(sensors, clock, buffer.clone(), config.acquisition.clone());

        let stop = Arc::new(AtomicBool::new(false));
        let sensor = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("sensor".into())
                .stack_size(STACK_SENSOR.max(64 * 1024))
                .spawn(move || {
                    motionplay::tasks::sensor::sensor_task(acquisition, || Ok(SoftWatchdog::new()), &stop);
                })?
        };
        let control = thread::Builder::new()
            .name("control".into())
            .stack_size(STACK_CONTROL.max(256 * 1024))
            .spawn(move || {
                motionplay::tasks::control::control_task(control, control_rx, || Ok(SoftWatchdog::new()));
            })?;

        thread::sleep(Duration::from_secs(run_secs));
        log_diagnostics(&buffer);

        let _ = control_tx.send(ControlEvent::MissedEvent);
        let _ = control_tx.send(ControlEvent::Shutdown);
        if control.join().is_err() {
            log::error!("Control task panicked");
        }
        stop.store(true, Ordering::Relaxed);
        if sensor.join().is_err() {
            log::error!("Sensor task panicked");
        }
        Ok(())
    }
}
