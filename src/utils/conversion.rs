//! Conversion utilities for the sensor node
//!
//! - Frequency to AD5933 24-bit frequency code (and back)
//! - Settling time word packing
//! - Host value clamping and decimal formatting for the legacy period getters
//!
//! All limits come from `config::constants` so the protocol and driver layers
//! agree on them.

use crate::config::constants::{impedance, periods};

/// Convert a frequency in Hz to the chip's 24-bit frequency code.
///
/// `code = (freq / (clock_hz / 4)) * 2^27`, computed as `freq * 2^29 / clock_hz`
/// in integer arithmetic. Returns `None` when the code does not fit in 24 bits.
pub fn frequency_to_code(frequency_hz: u32, clock_hz: u32) -> Option<u32> {
    if clock_hz == 0 {
        return None;
    }
    let code = (u64::from(frequency_hz) << 29) / u64::from(clock_hz);
    if code > u64::from(impedance::MAX_FREQUENCY_CODE) {
        None
    } else {
        Some(code as u32)
    }
}

/// Inverse of [`frequency_to_code`], for logging and diagnostics.
pub fn code_to_frequency(code: u32, clock_hz: u32) -> f64 {
    f64::from(code) * f64::from(clock_hz) / f64::from(1u32 << 29)
}

/// Split a 24-bit code into the three register bytes, most significant first.
pub fn code_to_bytes(code: u32) -> [u8; 3] {
    let [_, high, mid, low] = code.to_be_bytes();
    [high, mid, low]
}

pub fn bytes_to_code(bytes: [u8; 3]) -> u32 {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}

/// Clamp a host supplied value to the largest accepted period.
pub fn clamp_period(value: u16) -> u16 {
    value.min(periods::MAX_PERIOD)
}

/// Write `value` as decimal ASCII into `out`, NUL padded.
///
/// Digits that do not fit are truncated from the right, matching what the host
/// has always received from the four-byte period getters. Returns the number of
/// digits written.
pub fn format_decimal(value: u16, out: &mut [u8]) -> usize {
    out.fill(0);

    let mut digits = [0u8; 5];
    let mut remaining = value;
    let mut count = 0;
    loop {
        digits[count] = b'0' + (remaining % 10) as u8;
        count += 1;
        remaining /= 10;
        if remaining == 0 {
            break;
        }
    }

    let written = count.min(out.len());
    for (slot, digit) in out.iter_mut().zip(digits[..count].iter().rev()).take(written) {
        *slot = *digit;
    }
    written
}
