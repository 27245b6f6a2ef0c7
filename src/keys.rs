// Motion Play — Composite Storage Keys
//
// The store addresses readings by `relative_timestamp * 10 + position`.
// Two generations of keys coexist in it and carry no format flag:
//
//   legacy   relative time in 100 µs ticks   (key < LEGACY_KEY_THRESHOLD)
//   current  relative time in microseconds   (key >= LEGACY_KEY_THRESHOLD)
//
// Legacy keys collide for cycles closer than one tick, and the store is
// last-write-wins, so new records are always written with the current scheme.
// Decoding picks the scheme from the key's magnitude alone.

use crate::config::MAX_SENSORS;
use crate::error::KeyError;

/// Keys below this value are legacy.
pub const LEGACY_KEY_THRESHOLD: u64 = 1_000_000;

/// Microseconds per legacy timestamp unit.
pub const LEGACY_TICK_US: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScheme {
    Legacy,
    Current,
}

impl KeyScheme {
    pub fn of(key: u64) -> Self {
        if key < LEGACY_KEY_THRESHOLD {
            Self::Legacy
        } else {
            Self::Current
        }
    }

    fn unit_us(self) -> u64 {
        match self {
            Self::Legacy => LEGACY_TICK_US,
            Self::Current => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedKey {
    pub scheme: KeyScheme,
    /// Session-relative time, truncated to whole milliseconds.
    pub canonical_ms: u64,
    pub position: u8,
}

fn compose(relative: u64, position: u8) -> Result<u64, KeyError> {
    if position >= MAX_SENSORS {
        return Err(KeyError::PositionOutOfRange(position));
    }
    relative
        .checked_mul(10)
        .and_then(|k| k.checked_add(position as u64))
        .ok_or(KeyError::Overflow(relative))
}

/// Current-scheme key for a reading `relative_us` into its session.
pub fn encode(relative_us: u64, position: u8) -> Result<u64, KeyError> {
    let key = compose(relative_us, position)?;
    if KeyScheme::of(key) != KeyScheme::Current {
        return Err(KeyError::Ambiguous { key });
    }
    Ok(key)
}

/// Legacy-scheme key. Only for reproducing stored records.
pub fn encode_legacy(relative_ticks: u64, position: u8) -> Result<u64, KeyError> {
    let key = compose(relative_ticks, position)?;
    if KeyScheme::of(key) != KeyScheme::Legacy {
        return Err(KeyError::Ambiguous { key });
    }
    Ok(key)
}

pub fn decode(key: u64) -> DecodedKey {
    let scheme = KeyScheme::of(key);
    let relative = key / 10;
    DecodedKey {
        scheme,
        canonical_ms: relative * scheme.unit_us() / 1000,
        position: (key % 10) as u8,
    }
}
