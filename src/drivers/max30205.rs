//! MAX30205 body temperature sensor
//!
//! Only three registers are used: the presence scan reads the hysteresis
//! register, `begin` clears the configuration register (continuous
//! conversion, comparator mode) and a reading is the raw temperature register.

use embedded_hal::i2c::I2c;
use thiserror::Error;
use tracing::debug;

use crate::config::constants::temperature;

pub const MAX30205_ADDRESS: u8 = 0x48;

mod reg {
    pub const TEMPERATURE: u8 = 0x00;
    pub const CONFIGURATION: u8 = 0x01;
    pub const HYSTERESIS: u8 = 0x02;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Max30205Error<E> {
    #[error("bus transfer failed: {0:?}")]
    Bus(E),

    #[error("hysteresis register reads {found:#06x} instead of the reset value")]
    NotPresent { found: u16 },
}

/// Raw temperature register, most significant byte first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TemperatureReading {
    pub raw: [u8; 2],
}

impl TemperatureReading {
    pub fn from_celsius(celsius: f32) -> Self {
        let counts = (celsius / temperature::CELSIUS_PER_LSB).round() as i16;
        Self { raw: counts.to_be_bytes() }
    }

    pub fn celsius(&self) -> f32 {
        f32::from(i16::from_be_bytes(self.raw)) * temperature::CELSIUS_PER_LSB
    }
}

pub struct Max30205<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> Max30205<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            i2c,
            address: MAX30205_ADDRESS,
        }
    }

    pub fn release(self) -> I {
        self.i2c
    }

    pub fn scan(&mut self) -> Result<(), Max30205Error<I::Error>> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(self.address, &[reg::HYSTERESIS], &mut buf)
            .map_err(Max30205Error::Bus)?;
        let found = u16::from_be_bytes(buf);
        if found == temperature::POST_RESET_HYSTERESIS {
            debug!("MAX30205 found in reset state");
            Ok(())
        } else {
            Err(Max30205Error::NotPresent { found })
        }
    }

    pub fn begin(&mut self) -> Result<(), Max30205Error<I::Error>> {
        self.i2c
            .write(self.address, &[reg::CONFIGURATION, 0x00, 0x00])
            .map_err(Max30205Error::Bus)
    }

    pub fn read_temperature(&mut self) -> Result<TemperatureReading, Max30205Error<I::Error>> {
        let mut raw = [0u8; 2];
        self.i2c
            .write_read(self.address, &[reg::TEMPERATURE], &mut raw)
            .map_err(Max30205Error::Bus)?;
        Ok(TemperatureReading { raw })
    }
}
