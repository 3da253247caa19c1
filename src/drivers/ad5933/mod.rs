//! AD5933 impedance analyzer driver
//!
//! Registers are reached one byte at a time through the address pointer:
//! a read is `[ADDRESS_POINTER, reg]` followed by a one byte read, a write is
//! `[reg, value]`. Multi-byte registers are stored most significant byte first.
//!
//! Every method that touches the bus returns as soon as a transfer fails.
//! Nothing is rolled back; the next caller re-establishes the state it needs.
//! Validation errors are reported before the first transfer.

pub mod registers;
pub mod sweep;

pub use registers::{Register, RegisterDescriptor, REGISTER_TABLE};
pub use sweep::{ImpedanceSample, SweepController, SweepPhase};

use embedded_hal::i2c::I2c;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::constants::impedance;
use crate::config::ImpedanceSettings;
use crate::utils::conversion::{bytes_to_code, code_to_bytes, frequency_to_code};
use registers::{control, status, ADDRESS_POINTER, MAX_REGISTER_LEN};

/// Fixed 7-bit bus address of the AD5933
pub const AD5933_ADDRESS: u8 = 0x0D;

/// Errors raised by the impedance analyzer driver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Ad5933Error<E> {
    #[error("bus transfer failed: {0:?}")]
    Bus(E),

    #[error("{frequency_hz} Hz does not fit a 24-bit code at a {clock_hz} Hz clock")]
    FrequencyOutOfRange { frequency_hz: u32, clock_hz: u32 },

    #[error("increment count {0} exceeds 511")]
    IncrementCountOutOfRange(u16),

    #[error("settling cycle count {0} exceeds 511")]
    SettlingCyclesOutOfRange(u16),

    #[error("settling multiplier x{0} is not one of x1, x2, x4")]
    InvalidSettlingMultiplier(u8),

    #[error("PGA gain x{0} is not one of x1, x5")]
    InvalidGain(u16),

    #[error("output range selector {0} is not one of 1-4")]
    InvalidRange(u16),

    #[error("control register reads {found:#06x} instead of the reset value")]
    NotPresent { found: u16 },

    #[error("status bit {bit:#04x} not set after {polls} polls")]
    Timeout { bit: u8, polls: u32 },

    #[error("start frequency code read back as {read:#08x} after writing {written:#08x}")]
    ReadbackMismatch { written: u32, read: u32 },
}

/// System clock feeding the DDS core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    Internal,
    #[default]
    External,
}

impl ClockSource {
    pub const fn hz(self) -> u32 {
        match self {
            ClockSource::Internal => impedance::INTERNAL_CLOCK_HZ,
            ClockSource::External => impedance::EXTERNAL_CLOCK_HZ,
        }
    }

    const fn bits(self) -> u8 {
        match self {
            ClockSource::Internal => control::CLOCK_INTERNAL,
            ClockSource::External => control::CLOCK_EXTERNAL,
        }
    }
}

/// Excitation output voltage range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputRange {
    /// Range 1, 2 V peak-to-peak
    TwoVolts,
    /// Range 2, 1 V peak-to-peak
    #[default]
    OneVolt,
    /// Range 3, 400 mV peak-to-peak
    FourHundredMillivolts,
    /// Range 4, 200 mV peak-to-peak
    TwoHundredMillivolts,
}

impl OutputRange {
    /// Map the host selector (1-4) to a range
    pub const fn from_selector(selector: u16) -> Option<Self> {
        match selector {
            1 => Some(OutputRange::TwoVolts),
            2 => Some(OutputRange::OneVolt),
            3 => Some(OutputRange::FourHundredMillivolts),
            4 => Some(OutputRange::TwoHundredMillivolts),
            _ => None,
        }
    }

    pub const fn bits(self) -> u8 {
        match self {
            OutputRange::TwoVolts => control::OUTPUT_RANGE_1,
            OutputRange::OneVolt => control::OUTPUT_RANGE_2,
            OutputRange::FourHundredMillivolts => control::OUTPUT_RANGE_3,
            OutputRange::TwoHundredMillivolts => control::OUTPUT_RANGE_4,
        }
    }

    /// Decode the range bits of the control register high byte
    pub const fn from_bits(high: u8) -> Self {
        match high & control::RANGE_MASK {
            control::OUTPUT_RANGE_1 => OutputRange::TwoVolts,
            control::OUTPUT_RANGE_2 => OutputRange::OneVolt,
            control::OUTPUT_RANGE_3 => OutputRange::FourHundredMillivolts,
            _ => OutputRange::TwoHundredMillivolts,
        }
    }
}

/// Programmable gain amplifier setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PgaGain {
    #[default]
    X1,
    X5,
}

impl PgaGain {
    /// Map the host gain factor (1 or 5) to a setting
    pub const fn from_factor(factor: u16) -> Option<Self> {
        match factor {
            1 => Some(PgaGain::X1),
            5 => Some(PgaGain::X5),
            _ => None,
        }
    }

    pub const fn bits(self) -> u8 {
        match self {
            PgaGain::X1 => control::PGA_GAIN_X1,
            PgaGain::X5 => control::PGA_GAIN_X5,
        }
    }

    pub const fn from_bits(high: u8) -> Self {
        if high & control::PGA_MASK == control::PGA_GAIN_X1 {
            PgaGain::X1
        } else {
            PgaGain::X5
        }
    }
}

/// Power states reachable through the control mode nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    On,
    Standby,
    PowerDown,
}

/// Control mode nibble commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    NoOperation,
    InitStartFrequency,
    StartFrequencySweep,
    IncrementFrequency,
    RepeatFrequency,
    MeasureTemperature,
    PowerDown,
    Standby,
}

impl ControlMode {
    pub const fn bits(self) -> u8 {
        match self {
            ControlMode::NoOperation => control::NO_OPERATION,
            ControlMode::InitStartFrequency => control::INIT_START_FREQUENCY,
            ControlMode::StartFrequencySweep => control::START_FREQUENCY_SWEEP,
            ControlMode::IncrementFrequency => control::INCREMENT_FREQUENCY,
            ControlMode::RepeatFrequency => control::REPEAT_FREQUENCY,
            ControlMode::MeasureTemperature => control::MEASURE_TEMPERATURE,
            ControlMode::PowerDown => control::POWER_DOWN_MODE,
            ControlMode::Standby => control::STANDBY_MODE,
        }
    }
}

impl From<PowerMode> for ControlMode {
    fn from(mode: PowerMode) -> Self {
        match mode {
            PowerMode::On => ControlMode::NoOperation,
            PowerMode::Standby => ControlMode::Standby,
            PowerMode::PowerDown => ControlMode::PowerDown,
        }
    }
}

/// Settling time multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlingMultiplier {
    X1,
    X2,
    X4,
}

impl SettlingMultiplier {
    pub const fn from_factor(factor: u8) -> Option<Self> {
        match factor {
            1 => Some(SettlingMultiplier::X1),
            2 => Some(SettlingMultiplier::X2),
            4 => Some(SettlingMultiplier::X4),
            _ => None,
        }
    }

    /// Two-bit field stored in D10..D9 of the settling register
    pub const fn code(self) -> u16 {
        match self {
            SettlingMultiplier::X1 => 0b00,
            SettlingMultiplier::X2 => 0b01,
            SettlingMultiplier::X4 => 0b11,
        }
    }

    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            0b00 => Some(SettlingMultiplier::X1),
            0b01 => Some(SettlingMultiplier::X2),
            0b11 => Some(SettlingMultiplier::X4),
            _ => None,
        }
    }

    pub const fn factor(self) -> u8 {
        match self {
            SettlingMultiplier::X1 => 1,
            SettlingMultiplier::X2 => 2,
            SettlingMultiplier::X4 => 4,
        }
    }
}

/// Validated settling time: output cycles plus multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlingTime {
    cycles: u16,
    multiplier: SettlingMultiplier,
}

impl SettlingTime {
    pub fn new<E>(cycles: u16, factor: u8) -> Result<Self, Ad5933Error<E>> {
        if cycles > impedance::MAX_SETTLING_CYCLES {
            return Err(Ad5933Error::SettlingCyclesOutOfRange(cycles));
        }
        let multiplier =
            SettlingMultiplier::from_factor(factor).ok_or(Ad5933Error::InvalidSettlingMultiplier(factor))?;
        Ok(Self { cycles, multiplier })
    }

    pub fn cycles(&self) -> u16 {
        self.cycles
    }

    pub fn multiplier(&self) -> SettlingMultiplier {
        self.multiplier
    }

    /// Register image, most significant byte first
    pub fn to_bytes(self) -> [u8; 2] {
        (self.multiplier.code() << 9 | self.cycles).to_be_bytes()
    }

    pub fn from_bytes(bytes: [u8; 2]) -> Option<Self> {
        let word = u16::from_be_bytes(bytes);
        let multiplier = SettlingMultiplier::from_code((word >> 9) & 0b11)?;
        Some(Self {
            cycles: word & 0x01FF,
            multiplier,
        })
    }
}

/// AD5933 on an embedded-hal I2C bus.
///
/// The bus is shared with the temperature sensor on real boards; hand in a
/// shared bus device (for example from embedded-hal-bus) rather than the bus
/// itself.
pub struct Ad5933<I> {
    i2c: I,
    address: u8,
    clock: ClockSource,
}

impl<I: I2c> Ad5933<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            i2c,
            address: AD5933_ADDRESS,
            clock: ClockSource::Internal,
        }
    }

    /// Give the bus back
    pub fn release(self) -> I {
        self.i2c
    }

    /// Clock source used for frequency encoding
    pub fn clock_source(&self) -> ClockSource {
        self.clock
    }

    /// Presence scan: the chip must answer and hold its post-reset control value
    pub fn scan(&mut self) -> Result<(), Ad5933Error<I::Error>> {
        let found = self.read_control()?;
        if found == impedance::POST_RESET_CONTROL {
            debug!("AD5933 found in reset state");
            Ok(())
        } else {
            Err(Ad5933Error::NotPresent { found })
        }
    }

    /// Run the attach-time configuration sequence and park the chip in standby
    pub fn configure(&mut self, settings: &ImpedanceSettings) -> Result<(), Ad5933Error<I::Error>> {
        self.reset()?;
        self.set_clock_source(settings.clock)?;
        self.set_start_frequency(settings.start_frequency_hz)?;
        self.set_increment_frequency(settings.increment_frequency_hz)?;
        self.set_increment_count(settings.increment_count)?;
        self.set_settling_cycles(settings.settling_cycles, settings.settling_multiplier)?;
        self.set_output_range(settings.output_range)?;
        self.set_pga_gain(settings.pga_gain)?;
        self.set_power_mode(PowerMode::Standby)
    }

    pub fn reset(&mut self) -> Result<(), Ad5933Error<I::Error>> {
        let [high, low] = self.read_control_bytes()?;
        self.write_control_bytes([high, low | control::RESET])
    }

    pub fn set_control_mode(&mut self, mode: ControlMode) -> Result<(), Ad5933Error<I::Error>> {
        let [high, low] = self.read_control_bytes()?;
        trace!(?mode, "AD5933 control mode");
        self.write_control_bytes([(high & !control::MODE_MASK) | mode.bits(), low])
    }

    pub fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), Ad5933Error<I::Error>> {
        self.set_control_mode(mode.into())
    }

    pub fn set_clock_source(&mut self, clock: ClockSource) -> Result<(), Ad5933Error<I::Error>> {
        self.clock = clock;
        let [high, _] = self.read_control_bytes()?;
        self.write_control_bytes([high, clock.bits()])
    }

    /// Program the start frequency and read it back
    pub fn set_start_frequency(&mut self, frequency_hz: u32) -> Result<(), Ad5933Error<I::Error>> {
        let code = self.encode_frequency(frequency_hz)?;
        self.write_register(Register::StartFrequency, &code_to_bytes(code))?;
        let read = self.start_frequency_code()?;
        if read != code {
            return Err(Ad5933Error::ReadbackMismatch { written: code, read });
        }
        debug!(frequency_hz, code, "AD5933 start frequency");
        Ok(())
    }

    pub fn set_increment_frequency(&mut self, frequency_hz: u32) -> Result<(), Ad5933Error<I::Error>> {
        let code = self.encode_frequency(frequency_hz)?;
        self.write_register(Register::FrequencyIncrement, &code_to_bytes(code))
    }

    pub fn start_frequency_code(&mut self) -> Result<u32, Ad5933Error<I::Error>> {
        let mut buf = [0u8; 3];
        self.read_register(Register::StartFrequency, &mut buf)?;
        Ok(bytes_to_code(buf))
    }

    pub fn increment_frequency_code(&mut self) -> Result<u32, Ad5933Error<I::Error>> {
        let mut buf = [0u8; 3];
        self.read_register(Register::FrequencyIncrement, &mut buf)?;
        Ok(bytes_to_code(buf))
    }

    pub fn set_increment_count(&mut self, count: u16) -> Result<(), Ad5933Error<I::Error>> {
        if count > impedance::MAX_INCREMENT_COUNT {
            return Err(Ad5933Error::IncrementCountOutOfRange(count));
        }
        self.write_register(Register::IncrementCount, &count.to_be_bytes())
    }

    /// Program the settling time; invalid counts or multipliers are rejected
    /// before any transfer
    pub fn set_settling_cycles(&mut self, cycles: u16, multiplier: u8) -> Result<(), Ad5933Error<I::Error>> {
        let settling = SettlingTime::new(cycles, multiplier)?;
        self.set_settling_time(settling)
    }

    pub fn set_settling_time(&mut self, settling: SettlingTime) -> Result<(), Ad5933Error<I::Error>> {
        self.write_register(Register::SettlingCycles, &settling.to_bytes())
    }

    pub fn settling_time(&mut self) -> Result<Option<SettlingTime>, Ad5933Error<I::Error>> {
        let mut buf = [0u8; 2];
        self.read_register(Register::SettlingCycles, &mut buf)?;
        Ok(SettlingTime::from_bytes(buf))
    }

    pub fn set_output_range(&mut self, range: OutputRange) -> Result<(), Ad5933Error<I::Error>> {
        let [high, low] = self.read_control_bytes()?;
        self.write_control_bytes([(high & !control::RANGE_MASK) | range.bits(), low])
    }

    /// Apply a host range selector (1-4)
    pub fn set_output_range_selector(&mut self, selector: u16) -> Result<(), Ad5933Error<I::Error>> {
        let range = OutputRange::from_selector(selector).ok_or(Ad5933Error::InvalidRange(selector))?;
        self.set_output_range(range)
    }

    pub fn set_pga_gain(&mut self, gain: PgaGain) -> Result<(), Ad5933Error<I::Error>> {
        let [high, low] = self.read_control_bytes()?;
        self.write_control_bytes([(high & !control::PGA_MASK) | gain.bits(), low])
    }

    /// Apply a host gain factor (1 or 5)
    pub fn set_pga_gain_factor(&mut self, factor: u16) -> Result<(), Ad5933Error<I::Error>> {
        let gain = PgaGain::from_factor(factor).ok_or(Ad5933Error::InvalidGain(factor))?;
        self.set_pga_gain(gain)
    }

    pub fn read_control(&mut self) -> Result<u16, Ad5933Error<I::Error>> {
        Ok(u16::from_be_bytes(self.read_control_bytes()?))
    }

    pub fn read_status(&mut self) -> Result<u8, Ad5933Error<I::Error>> {
        let mut buf = [0u8; 1];
        self.read_register(Register::Status, &mut buf)?;
        Ok(buf[0])
    }

    /// Poll the status register until `bit` is set.
    ///
    /// A budget of zero polls forever. Returns the number of reads it took.
    pub fn poll_status(&mut self, bit: u8, budget: u32) -> Result<u32, Ad5933Error<I::Error>> {
        let mut polls: u32 = 0;
        loop {
            let value = self.read_status()?;
            polls = polls.saturating_add(1);
            if value & bit == bit {
                return Ok(polls);
            }
            if budget != 0 && polls >= budget {
                return Err(Ad5933Error::Timeout { bit, polls });
            }
        }
    }

    /// Raw real and imaginary result registers
    pub fn read_result(&mut self) -> Result<ImpedanceSample, Ad5933Error<I::Error>> {
        let mut real = [0u8; 2];
        let mut imaginary = [0u8; 2];
        self.read_register(Register::Real, &mut real)?;
        self.read_register(Register::Imaginary, &mut imaginary)?;
        Ok(ImpedanceSample { real, imaginary })
    }

    /// On-die temperature in degrees Celsius
    pub fn measure_temperature(&mut self, budget: u32) -> Result<f32, Ad5933Error<I::Error>> {
        self.set_control_mode(ControlMode::MeasureTemperature)?;
        self.poll_status(status::TEMPERATURE_VALID, budget)?;
        let mut buf = [0u8; 2];
        self.read_register(Register::Temperature, &mut buf)?;
        // 14-bit two's complement, 1/32 degree per LSB
        let raw = (i16::from_be_bytes(buf) << 2) >> 2;
        Ok(f32::from(raw) / 32.0)
    }

    fn encode_frequency(&self, frequency_hz: u32) -> Result<u32, Ad5933Error<I::Error>> {
        let clock_hz = self.clock.hz();
        frequency_to_code(frequency_hz, clock_hz).ok_or(Ad5933Error::FrequencyOutOfRange { frequency_hz, clock_hz })
    }

    fn read_control_bytes(&mut self) -> Result<[u8; 2], Ad5933Error<I::Error>> {
        let mut buf = [0u8; 2];
        self.read_register(Register::Control, &mut buf)?;
        Ok(buf)
    }

    fn write_control_bytes(&mut self, value: [u8; 2]) -> Result<(), Ad5933Error<I::Error>> {
        self.write_register(Register::Control, &value)
    }

    fn read_register(&mut self, register: Register, value: &mut [u8]) -> Result<(), Ad5933Error<I::Error>> {
        let descriptor = register.descriptor();
        let len = descriptor.len.min(value.len()).min(MAX_REGISTER_LEN);
        for (offset, byte) in value.iter_mut().take(len).enumerate() {
            let pointer = [ADDRESS_POINTER, descriptor.address + offset as u8];
            self.i2c.write(self.address, &pointer).map_err(Ad5933Error::Bus)?;
            let mut single = [0u8; 1];
            self.i2c.read(self.address, &mut single).map_err(Ad5933Error::Bus)?;
            *byte = single[0];
        }
        Ok(())
    }

    fn write_register(&mut self, register: Register, value: &[u8]) -> Result<(), Ad5933Error<I::Error>> {
        let descriptor = register.descriptor();
        for (offset, byte) in value.iter().take(descriptor.len).enumerate() {
            let frame = [descriptor.address + offset as u8, *byte];
            self.i2c.write(self.address, &frame).map_err(Ad5933Error::Bus)?;
        }
        Ok(())
    }
}
