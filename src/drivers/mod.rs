pub mod simulated;
pub mod vcnl4040;

#[cfg(target_os = "espidf")]
pub mod proximity;

use crate::error::SensorReadError;
use crate::events::SensorMetadata;

/// The fixed set of proximity sensors on the hoop.
pub trait SensorArray: Send {
    fn sensor_count(&self) -> u8;

    /// Sensors that failed to initialise stay inactive and are never read.
    fn is_active(&self, position: u8) -> bool;

    /// One synchronous read: `(proximity, ambient)`.
    fn read(&mut self, position: u8) -> Result<(u16, u16), SensorReadError>;

    fn metadata(&self) -> Vec<SensorMetadata> {
        (0..self.sensor_count())
            .map(|p| SensorMetadata::for_position(p, self.is_active(p)))
            .collect()
    }
}
