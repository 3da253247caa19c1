//! Common utility functions for the sensor node
//!
//! Frequency code arithmetic for the impedance analyzer and the value
//! formatting used by the host protocol. Limits are taken from the
//! constants in the config module.

pub mod conversion;

pub use conversion::{
    bytes_to_code,
    clamp_period,
    code_to_bytes,
    code_to_frequency,
    format_decimal,
    frequency_to_code,
};
