// src/hal/mod.rs
//! Hardware abstraction for the sensor node

pub mod traits;
pub mod types;

#[cfg(feature = "simulation")]
pub mod simulator;


pub use traits::*;
pub use types::*;
