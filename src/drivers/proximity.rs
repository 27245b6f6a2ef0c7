// Motion Play — VCNL4040 Proximity Array Driver
//
// Register-level driver for six VCNL4040 sensors on one I2C bus:
//
//   TCA9548A (0x70) ── channel b ──▶ PCA9546A (0x74..0x76) ── channel s ──▶ VCNL4040 (0x60)
//
// Board b (0..3) hangs off root channel b; its sensors S1/S2 sit on the
// board mux channels 0/1. Position p = 2b + s.

use esp_idf_hal::i2c::I2cDriver;

use super::vcnl4040::{self, ALS_CONF_ON, DEVICE_ID, REG_ALS_CONF, REG_ALS_DATA, REG_ID, REG_PS_CONF1_2, REG_PS_CONF3_MS, REG_PS_DATA};
use super::SensorArray;
use crate::config::*;
use crate::error::SensorReadError;

const SENSORS_PER_BOARD: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Route {
    root_channel: u8,
    board_mux: u8,
    board_channel: u8,
}

pub struct ProximityArray {
    bus: I2cDriver<'static>,
    routes: Vec<Option<Route>>,
    /// Route currently switched in, to skip redundant mux writes.
    selected: Option<Route>,
}

impl ProximityArray {
    /// Probe every board and sensor. Missing hardware leaves its positions
    /// inactive; the array is still usable with the rest.
    pub fn probe(bus: I2cDriver<'static>, sensor_count: u8, settings: &SensorSettings) -> anyhow::Result<Self> {
        let mut array = Self {
            bus,
            routes: vec![None; sensor_count as usize],
            selected: None,
        };

        array.bus.write(I2C_ADDR_TCA9548A, &[0x00], I2C_TIMEOUT_TICKS)?;
        log::info!("TCA9548A found at 0x{:02X}", I2C_ADDR_TCA9548A);
        log::info!(
            "Sensor settings: LED {:?}, integration {:?}, high resolution {}",
            settings.led_current,
            settings.integration_time,
            settings.high_resolution
        );

        let boards = sensor_count.div_ceil(SENSORS_PER_BOARD);
        for board in 0..boards {
            array.bus.write(I2C_ADDR_TCA9548A, &[1 << board], I2C_TIMEOUT_TICKS)?;
            let Some(board_mux) = array.find_board_mux() else {
                log::warn!("Board P{}: no PCA9546A", board + 1);
                continue;
            };
            for channel in 0..SENSORS_PER_BOARD {
                let position = board * SENSORS_PER_BOARD + channel;
                if position >= sensor_count {
                    break;
                }
                let route = Route {
                    root_channel: board,
                    board_mux,
                    board_channel: channel,
                };
                array.selected = None;
                match array.init_sensor(route, settings) {
                    Ok(()) => {
                        array.routes[position as usize] = Some(route);
                        log::info!("Sensor P{}S{} (pos {}) ready", board + 1, channel + 1, position);
                    }
                    Err(e) => log::warn!("Sensor P{}S{} (pos {}) inactive: {}", board + 1, channel + 1, position, e),
                }
            }
            let _ = array.bus.write(board_mux, &[0x00], I2C_TIMEOUT_TICKS);
        }
        array.selected = None;

        let active = array.routes.iter().filter(|r| r.is_some()).count();
        log::info!("Proximity array: {}/{} sensors active", active, sensor_count);
        Ok(array)
    }

    fn find_board_mux(&mut self) -> Option<u8> {
        I2C_ADDR_PCA9546A
            .iter()
            .copied()
            .find(|&addr| self.bus.write(addr, &[0x00], I2C_TIMEOUT_TICKS).is_ok())
    }

    fn select(&mut self, route: Route) -> Result<(), esp_idf_sys::EspError> {
        if self.selected == Some(route) {
            return Ok(());
        }
        if let Some(prev) = self.selected.take() {
            // Close the previous board's channel so two sensors never share 0x60.
            if prev.root_channel != route.root_channel {
                self.bus.write(prev.board_mux, &[0x00], I2C_TIMEOUT_TICKS)?;
            }
        }
        self.bus.write(I2C_ADDR_TCA9548A, &[1 << route.root_channel], I2C_TIMEOUT_TICKS)?;
        self.bus.write(route.board_mux, &[1 << route.board_channel], I2C_TIMEOUT_TICKS)?;
        self.selected = Some(route);
        Ok(())
    }

    fn read_register(&mut self, reg: u8) -> Result<u16, esp_idf_sys::EspError> {
        let mut buf = [0u8; 2];
        self.bus.write_read(I2C_ADDR_VCNL4040, &[reg], &mut buf, I2C_TIMEOUT_TICKS)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn write_register(&mut self, reg: u8, value: u16) -> Result<(), esp_idf_sys::EspError> {
        let [lsb, msb] = value.to_le_bytes();
        self.bus.write(I2C_ADDR_VCNL4040, &[reg, lsb, msb], I2C_TIMEOUT_TICKS)
    }

    fn init_sensor(&mut self, route: Route, settings: &SensorSettings) -> anyhow::Result<()> {
        self.select(route)?;
        let id = self.read_register(REG_ID)?;
        if id != DEVICE_ID {
            anyhow::bail!("unexpected device id 0x{id:04X}");
        }
        let conf1_2 = vcnl4040::ps_conf1_2(settings);
        self.write_register(REG_PS_CONF1_2, conf1_2)?;
        self.write_register(REG_PS_CONF3_MS, vcnl4040::ps_conf3_ms(settings))?;
        self.write_register(REG_ALS_CONF, ALS_CONF_ON)?;

        let readback = self.read_register(REG_PS_CONF1_2)?;
        if readback != conf1_2 {
            anyhow::bail!(
                "PS_CONF readback 0x{readback:04X} (integration {:?}, high resolution {}), wrote 0x{conf1_2:04X}",
                vcnl4040::integration_time(readback),
                vcnl4040::high_resolution(readback)
            );
        }
        Ok(())
    }
}

impl SensorArray for ProximityArray {
    fn sensor_count(&self) -> u8 {
        self.routes.len() as u8
    }

    fn is_active(&self, position: u8) -> bool {
        matches!(self.routes.get(position as usize), Some(Some(_)))
    }

    fn read(&mut self, position: u8) -> Result<(u16, u16), SensorReadError> {
        let route = match self.routes.get(position as usize) {
            Some(Some(route)) => *route,
            Some(None) => return Err(SensorReadError::Inactive(position)),
            None => return Err(SensorReadError::NoSuchPosition(position)),
        };
        let result = self.select(route).and_then(|()| {
            let proximity = self.read_register(REG_PS_DATA)?;
            let ambient = self.read_register(REG_ALS_DATA)?;
            Ok((proximity, ambient))
        });
        if result.is_err() {
            // Mux state unknown; re-select on the next read.
            self.selected = None;
        }
        result.map_err(|e| SensorReadError::Bus {
            position,
            message: e.to_string(),
        })
    }
}
