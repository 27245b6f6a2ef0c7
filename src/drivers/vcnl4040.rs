// Motion Play — VCNL4040 Register Map
//
// Register words are 16-bit little-endian: the low byte is the first named
// register (PS_CONF1, PS_CONF3), the high byte the second (PS_CONF2, PS_MS).

use crate::config::{IntegrationTime, SensorSettings};

pub const REG_ALS_CONF: u8 = 0x00;
pub const REG_PS_CONF1_2: u8 = 0x03;
pub const REG_PS_CONF3_MS: u8 = 0x04;
pub const REG_PS_DATA: u8 = 0x08;
pub const REG_ALS_DATA: u8 = 0x09;
pub const REG_ID: u8 = 0x0C;
pub const DEVICE_ID: u16 = 0x0186;

// PS_CONF1 (low byte of 0x03)
const PS_IT_SHIFT: u16 = 1;
const PS_IT_MASK: u16 = 0b111 << PS_IT_SHIFT;
// PS_CONF2 (high byte of 0x03)
const PS_HD: u16 = 1 << 11;
// PS_MS (high byte of 0x04)
const LED_I_SHIFT: u16 = 8;

/// ALS on, 80 ms integration, no interrupt.
pub const ALS_CONF_ON: u16 = 0x0000;

/// PS_CONF1/PS_CONF2 word: proximity powered on (PS_SD clear), duty 1/40,
/// no interrupts, with the requested integration time and resolution.
pub fn ps_conf1_2(settings: &SensorSettings) -> u16 {
    let mut word = (settings.integration_time.bits() << PS_IT_SHIFT) & PS_IT_MASK;
    if settings.high_resolution {
        word |= PS_HD;
    }
    word
}

/// PS_CONF3/PS_MS word: normal operation, white channel on, LED current.
pub fn ps_conf3_ms(settings: &SensorSettings) -> u16 {
    settings.led_current.bits() << LED_I_SHIFT
}

/// Integration time as read back from a PS_CONF1/PS_CONF2 word.
pub fn integration_time(word: u16) -> IntegrationTime {
    IntegrationTime::from_bits((word & PS_IT_MASK) >> PS_IT_SHIFT)
}

pub fn high_resolution(word: u16) -> bool {
    word & PS_HD != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedCurrent;

    #[test]
    fn default_settings_program_200ma_1t_16_bit() {
        let settings = SensorSettings::default();
        let conf1_2 = ps_conf1_2(&settings);
        let conf3_ms = ps_conf3_ms(&settings);

        // PS_SD clear: proximity is on.
        assert_eq!(conf1_2 & 1, 0);
        assert_eq!(conf1_2, 0x0800);
        assert_eq!(conf3_ms, 0x0700);
        assert_eq!(integration_time(conf1_2), IntegrationTime::T1);
        assert!(high_resolution(conf1_2));
    }

    #[test]
    fn fields_land_in_their_bits() {
        let settings = SensorSettings {
            led_current: LedCurrent::Ma120,
            integration_time: IntegrationTime::T8,
            high_resolution: false,
        };
        let conf1_2 = ps_conf1_2(&settings);
        assert_eq!(conf1_2, 0b1110);
        assert_eq!(ps_conf3_ms(&settings), 0b011 << 8);
        assert_eq!(integration_time(conf1_2), IntegrationTime::T8);
        assert!(!high_resolution(conf1_2));
    }
}
