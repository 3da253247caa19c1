// src/drivers/mod.rs
//! Sensor chip drivers, generic over an embedded-hal I2C bus

pub mod ad5933;
pub mod max30205;

pub use ad5933::{Ad5933, Ad5933Error, ClockSource, OutputRange, PgaGain, SweepController};
pub use max30205::{Max30205, Max30205Error, TemperatureReading};
