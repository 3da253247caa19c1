// src/hal/traits.rs
//! HAL traits the node needs beyond what embedded-hal provides
//!
//! Sensor transports, routing lines, indicators and delays use the
//! embedded-hal 1.0 traits directly. embedded-hal has no ADC or I2C target
//! abstraction, so those two seams are defined here.

use std::fmt::Debug;

use crate::hal::types::BusAction;

/// EMG analog front end sampled on demand
pub trait EmgAdc {
    type Error: Debug;

    /// Perform one conversion and return it as the two bytes served to the host
    fn read_sample(&mut self) -> Result<[u8; 2], Self::Error>;
}

/// Register-level access to the I2C slave peripheral.
///
/// Implemented by the board glue on the consumer side of the bus inbox; the
/// protocol engine decides what to do and the responder performs it.
pub trait SlaveResponder {
    fn respond(&mut self, action: BusAction);
}

impl<F: FnMut(BusAction)> SlaveResponder for F {
    fn respond(&mut self, action: BusAction) {
        self(action)
    }
}
