// src/hal/simulator.rs
//! Host-side simulation of the node's hardware
//!
//! - [`SimSensorBus`]: the sensor I2C bus with register-level models of the
//!   AD5933 and the MAX30205, presence toggles, status latency, a stalled
//!   status register and transfer fault injection.
//! - [`SimAdc`]: EMG converter, constant or noisy.
//! - [`SimPin`]: output pin that records its levels.
//! - [`SimDelay`]: delay that only accumulates the requested time.
//! - [`SimHost`]: the host side of the slave bus, feeding raw conditions
//!   through the inbox and collecting the engine's reactions.
//!
//! Every handle is a cheap clone sharing one model, so a test can keep a copy
//! for inspection after handing another to a driver.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType as PinErrorType, OutputPin, StatefulOutputPin};
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::config::constants::{impedance, temperature};
use crate::drivers::ad5933::registers::{control, status, Register, ADDRESS_POINTER};
use crate::drivers::ad5933::AD5933_ADDRESS;
use crate::drivers::max30205::{TemperatureReading, MAX30205_ADDRESS};
use crate::hal::traits::EmgAdc;
use crate::hal::types::{BusAction, BusEvent, Direction};
use crate::protocol::{BusInbox, BusTask, CommandCode};

#[derive(Debug)]
struct FaultPlan {
    skip: usize,
    count: usize,
}

#[derive(Debug)]
struct Ad5933Model {
    present: bool,
    registers: [u8; 256],
    pointer: u8,
    stalled: bool,
    latency: u32,
    pending: Option<(u8, u32)>,
    results: VecDeque<(i16, i16)>,
    default_result: (i16, i16),
    point: u16,
    die_temperature: f32,
    mode_history: Vec<u8>,
    stuck: Vec<u8>,
    writes: usize,
}

impl Ad5933Model {
    fn new() -> Self {
        let mut registers = [0u8; 256];
        let [high, low] = impedance::POST_RESET_CONTROL.to_be_bytes();
        registers[Register::Control.address() as usize] = high;
        registers[Register::Control.address() as usize + 1] = low;
        Self {
            present: true,
            registers,
            pointer: 0,
            stalled: false,
            latency: 0,
            pending: None,
            results: VecDeque::new(),
            default_result: (0, 0),
            point: 0,
            die_temperature: 25.0,
            mode_history: Vec::new(),
            stuck: Vec::new(),
            writes: 0,
        }
    }

    fn status(&self) -> u8 {
        self.registers[Register::Status.address() as usize]
    }

    fn set_status(&mut self, value: u8) {
        self.registers[Register::Status.address() as usize] = value;
    }

    fn schedule(&mut self, bits: u8) {
        if self.latency == 0 {
            self.set_status(self.status() | bits);
            self.pending = None;
        } else {
            self.pending = Some((bits, self.latency));
        }
    }

    fn read_status(&mut self) -> u8 {
        if self.stalled {
            return 0;
        }
        if let Some((bits, remaining)) = self.pending {
            if remaining == 0 {
                self.set_status(self.status() | bits);
                self.pending = None;
            } else {
                self.pending = Some((bits, remaining - 1));
            }
        }
        self.status()
    }

    fn load_result(&mut self) {
        let (real, imaginary) = self.results.pop_front().unwrap_or(self.default_result);
        let base = Register::Real.address() as usize;
        self.registers[base..base + 2].copy_from_slice(&real.to_be_bytes());
        let base = Register::Imaginary.address() as usize;
        self.registers[base..base + 2].copy_from_slice(&imaginary.to_be_bytes());
    }

    fn increment_count(&self) -> u16 {
        let base = Register::IncrementCount.address() as usize;
        u16::from_be_bytes([self.registers[base], self.registers[base + 1]]) & 0x01FF
    }

    fn control_written(&mut self, high: u8) {
        let mode = high & control::MODE_MASK;
        self.mode_history.push(mode);
        let cleared = self.status() & !(status::DATA_VALID | status::SWEEP_COMPLETE);
        match mode {
            control::INIT_START_FREQUENCY => {
                self.point = 0;
                self.pending = None;
                self.set_status(0);
            }
            control::START_FREQUENCY_SWEEP | control::REPEAT_FREQUENCY => {
                self.set_status(cleared);
                self.load_result();
                self.schedule(status::DATA_VALID);
            }
            control::INCREMENT_FREQUENCY => {
                self.set_status(self.status() & !status::DATA_VALID);
                self.point += 1;
                if self.point > self.increment_count() {
                    self.schedule(status::SWEEP_COMPLETE);
                } else {
                    self.load_result();
                    self.schedule(status::DATA_VALID);
                }
            }
            control::MEASURE_TEMPERATURE => {
                let counts = (self.die_temperature * 32.0).round() as i16 & 0x3FFF;
                let base = Register::Temperature.address() as usize;
                self.registers[base..base + 2].copy_from_slice(&(counts as u16).to_be_bytes());
                self.schedule(status::TEMPERATURE_VALID);
            }
            _ => {}
        }
    }

    fn write_register(&mut self, address: u8, value: u8) {
        self.writes += 1;
        if self.stuck.contains(&address) {
            return;
        }
        let control_low = Register::Control.address() + 1;
        if address == control_low && value & control::RESET != 0 {
            self.point = 0;
            self.pending = None;
            self.set_status(0);
            self.registers[address as usize] = value & !control::RESET;
            return;
        }
        self.registers[address as usize] = value;
        if address == Register::Control.address() {
            self.control_written(value);
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        match bytes {
            [ADDRESS_POINTER, address] => self.pointer = *address,
            [address] => self.pointer = *address,
            [address, data @ ..] => {
                for (offset, value) in data.iter().enumerate() {
                    self.write_register(address.wrapping_add(offset as u8), *value);
                }
            }
            [] => {}
        }
    }

    fn read(&mut self, buffer: &mut [u8]) {
        for (offset, byte) in buffer.iter_mut().enumerate() {
            let address = self.pointer.wrapping_add(offset as u8);
            *byte = if address == Register::Status.address() {
                self.read_status()
            } else {
                self.registers[address as usize]
            };
        }
    }
}

#[derive(Debug)]
struct Max30205Model {
    present: bool,
    pointer: u8,
    temperature: [u8; 2],
    configuration: u8,
    hysteresis: u16,
    overtemperature: u16,
    reads: usize,
}

impl Max30205Model {
    fn new() -> Self {
        Self {
            present: true,
            pointer: 0,
            temperature: TemperatureReading::from_celsius(36.5).raw,
            configuration: 0,
            hysteresis: temperature::POST_RESET_HYSTERESIS,
            overtemperature: 0x5000,
            reads: 0,
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        let Some((&pointer, data)) = bytes.split_first() else {
            return;
        };
        self.pointer = pointer;
        match (pointer, data) {
            (0x01, [value, ..]) => self.configuration = *value,
            (0x02, [high, low, ..]) => self.hysteresis = u16::from_be_bytes([*high, *low]),
            (0x03, [high, low, ..]) => self.overtemperature = u16::from_be_bytes([*high, *low]),
            _ => {}
        }
    }

    fn read(&mut self, buffer: &mut [u8]) {
        self.reads += 1;
        let register: Vec<u8> = match self.pointer {
            0x00 => self.temperature.to_vec(),
            0x01 => vec![self.configuration],
            0x02 => self.hysteresis.to_be_bytes().to_vec(),
            0x03 => self.overtemperature.to_be_bytes().to_vec(),
            _ => Vec::new(),
        };
        for (index, byte) in buffer.iter_mut().enumerate() {
            *byte = register.get(index).copied().unwrap_or(0xFF);
        }
    }
}

#[derive(Debug)]
struct BusModel {
    impedance: Ad5933Model,
    temperature: Max30205Model,
    transfers: usize,
    fault: Option<FaultPlan>,
}

impl BusModel {
    fn check_fault(&mut self) -> Result<(), ErrorKind> {
        let Some(plan) = self.fault.as_mut() else {
            return Ok(());
        };
        if plan.skip > 0 {
            plan.skip -= 1;
            return Ok(());
        }
        if plan.count > 0 {
            plan.count -= 1;
            return Err(ErrorKind::Bus);
        }
        self.fault = None;
        Ok(())
    }
}

/// Simulated sensor bus carrying an AD5933 and a MAX30205
#[derive(Debug, Clone)]
pub struct SimSensorBus {
    model: Arc<Mutex<BusModel>>,
}

impl SimSensorBus {
    pub fn new() -> Self {
        Self {
            model: Arc::new(Mutex::new(BusModel {
                impedance: Ad5933Model::new(),
                temperature: Max30205Model::new(),
                transfers: 0,
                fault: None,
            })),
        }
    }

    pub fn set_impedance_present(&self, present: bool) {
        self.model.lock().impedance.present = present;
    }

    pub fn set_temperature_present(&self, present: bool) {
        self.model.lock().temperature.present = present;
    }

    /// A stalled chip never sets a status bit
    pub fn set_impedance_stalled(&self, stalled: bool) {
        self.model.lock().impedance.stalled = stalled;
    }

    /// Status reads that return nothing before a scheduled bit appears
    pub fn set_impedance_latency(&self, polls: u32) {
        self.model.lock().impedance.latency = polls;
    }

    /// Result for the next measured point; points without a queued result
    /// use the default result
    pub fn queue_impedance_result(&self, real: i16, imaginary: i16) {
        self.model.lock().impedance.results.push_back((real, imaginary));
    }

    pub fn set_default_impedance_result(&self, real: i16, imaginary: i16) {
        self.model.lock().impedance.default_result = (real, imaginary);
    }

    /// The register at `address` acknowledges writes but keeps its value
    pub fn stick_impedance_register(&self, address: u8) {
        self.model.lock().impedance.stuck.push(address);
    }

    pub fn set_impedance_die_temperature(&self, celsius: f32) {
        self.model.lock().impedance.die_temperature = celsius;
    }

    pub fn set_body_temperature(&self, celsius: f32) {
        self.model.lock().temperature.temperature = TemperatureReading::from_celsius(celsius).raw;
    }

    pub fn set_temperature_hysteresis(&self, value: u16) {
        self.model.lock().temperature.hysteresis = value;
    }

    /// Let `skip` transfers through, then fail the next `count`
    pub fn fail_transfers(&self, skip: usize, count: usize) {
        self.model.lock().fault = Some(FaultPlan { skip, count });
    }

    pub fn clear_faults(&self) {
        self.model.lock().fault = None;
    }

    pub fn transfers(&self) -> usize {
        self.model.lock().transfers
    }

    /// Register writes accepted by the AD5933
    pub fn impedance_writes(&self) -> usize {
        self.model.lock().impedance.writes
    }

    pub fn impedance_register(&self, address: u8) -> u8 {
        self.model.lock().impedance.registers[address as usize]
    }

    pub fn impedance_control(&self) -> u16 {
        let base = Register::Control.address();
        u16::from_be_bytes([self.impedance_register(base), self.impedance_register(base + 1)])
    }

    /// Control mode nibbles in the order they were written
    pub fn mode_history(&self) -> Vec<u8> {
        self.model.lock().impedance.mode_history.clone()
    }

    pub fn clear_mode_history(&self) {
        self.model.lock().impedance.mode_history.clear();
    }

    pub fn temperature_configuration(&self) -> u8 {
        self.model.lock().temperature.configuration
    }

    pub fn temperature_reads(&self) -> usize {
        self.model.lock().temperature.reads
    }
}

impl Default for SimSensorBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorType for SimSensorBus {
    type Error = ErrorKind;
}

impl I2c for SimSensorBus {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        let mut model = self.model.lock();
        model.transfers += 1;
        model.check_fault()?;

        let present = match address {
            AD5933_ADDRESS => model.impedance.present,
            MAX30205_ADDRESS => model.temperature.present,
            _ => false,
        };
        if !present {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }

        for operation in operations.iter_mut() {
            match (address, operation) {
                (AD5933_ADDRESS, Operation::Write(bytes)) => model.impedance.write(bytes),
                (AD5933_ADDRESS, Operation::Read(buffer)) => model.impedance.read(buffer),
                (_, Operation::Write(bytes)) => model.temperature.write(bytes),
                (_, Operation::Read(buffer)) => model.temperature.read(buffer),
            }
        }
        Ok(())
    }
}

/// Conversion failure injected into [`SimAdc`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("simulated conversion failure")]
pub struct SimAdcFault;

#[derive(Debug)]
struct AdcModel {
    level: u16,
    noise: u16,
    rng: StdRng,
    conversions: usize,
    failing: bool,
}

/// 12-bit EMG converter returning its result low byte first
#[derive(Debug, Clone)]
pub struct SimAdc {
    model: Arc<Mutex<AdcModel>>,
}

impl SimAdc {
    pub const FULL_SCALE: u16 = 0x0FFF;

    pub fn constant(level: u16) -> Self {
        Self::noisy(level, 0, 0)
    }

    /// Uniform noise of `amplitude` counts around `level`, reproducible per seed
    pub fn noisy(level: u16, amplitude: u16, seed: u64) -> Self {
        Self {
            model: Arc::new(Mutex::new(AdcModel {
                level: level.min(Self::FULL_SCALE),
                noise: amplitude,
                rng: StdRng::seed_from_u64(seed),
                conversions: 0,
                failing: false,
            })),
        }
    }

    pub fn set_level(&self, level: u16) {
        self.model.lock().level = level.min(Self::FULL_SCALE);
    }

    pub fn set_failing(&self, failing: bool) {
        self.model.lock().failing = failing;
    }

    pub fn conversions(&self) -> usize {
        self.model.lock().conversions
    }
}

impl EmgAdc for SimAdc {
    type Error = SimAdcFault;

    fn read_sample(&mut self) -> Result<[u8; 2], Self::Error> {
        let mut model = self.model.lock();
        if model.failing {
            return Err(SimAdcFault);
        }
        model.conversions += 1;
        let noise = i32::from(model.noise);
        let offset = if noise == 0 { 0 } else { model.rng.gen_range(-noise..=noise) };
        let value = (i32::from(model.level) + offset).clamp(0, i32::from(Self::FULL_SCALE)) as u16;
        Ok(value.to_le_bytes())
    }
}

#[derive(Debug, Default)]
struct PinModel {
    level: bool,
    history: Vec<bool>,
}

/// Output pin recording every level it is driven to
#[derive(Debug, Clone, Default)]
pub struct SimPin {
    model: Arc<Mutex<PinModel>>,
}

impl SimPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self) -> bool {
        self.model.lock().level
    }

    pub fn history(&self) -> Vec<bool> {
        self.model.lock().history.clone()
    }

    /// Number of level changes
    pub fn edges(&self) -> usize {
        let model = self.model.lock();
        let mut previous = false;
        model
            .history
            .iter()
            .filter(|&&level| {
                let changed = level != previous;
                previous = level;
                changed
            })
            .count()
    }

    fn drive(&self, level: bool) {
        let mut model = self.model.lock();
        model.level = level;
        model.history.push(level);
    }
}

impl PinErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(true);
        Ok(())
    }
}

impl StatefulOutputPin for SimPin {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.level())
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.level())
    }
}

/// Delay that records the requested time instead of waiting
#[derive(Debug, Clone, Default)]
pub struct SimDelay {
    elapsed_ns: Arc<AtomicU64>,
}

impl SimDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed_ns(&self) -> u64 {
        self.elapsed_ns.load(Ordering::Relaxed)
    }

    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_ns() / 1_000
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns.fetch_add(u64::from(ns), Ordering::Relaxed);
    }
}

/// Host side of the slave bus
pub struct SimHost {
    inbox: Arc<BusInbox>,
    task: BusTask,
    actions: Vec<BusAction>,
}

impl SimHost {
    pub fn new(inbox: Arc<BusInbox>, task: BusTask) -> Self {
        Self {
            inbox,
            task,
            actions: Vec::new(),
        }
    }

    pub fn task(&self) -> &BusTask {
        &self.task
    }

    /// Every reaction the engine produced so far
    pub fn actions(&self) -> &[BusAction] {
        &self.actions
    }

    fn raise(&mut self, event: BusEvent) -> Option<BusAction> {
        self.inbox.push(event);
        let start = self.actions.len();
        let actions = &mut self.actions;
        self.task.service(&mut |action: BusAction| actions.push(action));
        self.actions.get(start).copied()
    }

    /// Write transaction closed by a stop
    pub fn write(&mut self, bytes: &[u8]) -> Vec<BusAction> {
        let mut actions = Vec::with_capacity(bytes.len() + 2);
        actions.extend(self.raise(BusEvent::AddressMatch(Direction::HostWrite)));
        for byte in bytes {
            actions.extend(self.raise(BusEvent::ByteReceived(*byte)));
        }
        actions.extend(self.raise(BusEvent::Stop));
        actions
    }

    /// Read transaction closed by a stop
    pub fn read(&mut self, len: usize) -> Vec<u8> {
        self.raise(BusEvent::AddressMatch(Direction::HostRead));
        let bytes = self.clock_out(len);
        self.raise(BusEvent::Stop);
        bytes
    }

    /// Write then read joined by a repeated start
    pub fn write_read(&mut self, bytes: &[u8], len: usize) -> Vec<u8> {
        self.raise(BusEvent::AddressMatch(Direction::HostWrite));
        for byte in bytes {
            self.raise(BusEvent::ByteReceived(*byte));
        }
        self.raise(BusEvent::AddressMatch(Direction::HostRead));
        let data = self.clock_out(len);
        self.raise(BusEvent::Stop);
        data
    }

    fn clock_out(&mut self, len: usize) -> Vec<u8> {
        (0..len)
            .map(|_| match self.raise(BusEvent::ByteRequested) {
                Some(BusAction::Transmit { byte, .. }) => byte,
                _ => 0xFF,
            })
            .collect()
    }

    pub fn command(&mut self, code: CommandCode) {
        self.write(&[u8::from(code)]);
    }

    /// Command followed by a read of `len` bytes in a separate transaction
    pub fn query(&mut self, code: CommandCode, len: usize) -> Vec<u8> {
        self.command(code);
        self.read(len)
    }

    /// Setter command followed by its little-endian value
    pub fn set(&mut self, code: CommandCode, value: u16) {
        self.command(code);
        self.write(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_reports_absent_devices() {
        let mut bus = SimSensorBus::new();
        bus.set_temperature_present(false);
        let err = bus.write(MAX30205_ADDRESS, &[0x00]).unwrap_err();
        assert_eq!(err, ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        assert!(bus.write(0x50, &[0x00]).is_err());
        assert!(bus.write(AD5933_ADDRESS, &[ADDRESS_POINTER, 0x80]).is_ok());
    }

    #[test]
    fn test_fault_plan() {
        let mut bus = SimSensorBus::new();
        bus.fail_transfers(1, 2);
        assert!(bus.write(AD5933_ADDRESS, &[ADDRESS_POINTER, 0x80]).is_ok());
        assert_eq!(bus.write(AD5933_ADDRESS, &[ADDRESS_POINTER, 0x80]), Err(ErrorKind::Bus));
        assert_eq!(bus.write(AD5933_ADDRESS, &[ADDRESS_POINTER, 0x80]), Err(ErrorKind::Bus));
        assert!(bus.write(AD5933_ADDRESS, &[ADDRESS_POINTER, 0x80]).is_ok());
        assert_eq!(bus.transfers(), 4);
    }

    #[test]
    fn test_status_latency() {
        let mut bus = SimSensorBus::new();
        bus.set_impedance_latency(2);
        bus.write(AD5933_ADDRESS, &[0x80, control::START_FREQUENCY_SWEEP]).unwrap();
        bus.write(AD5933_ADDRESS, &[ADDRESS_POINTER, 0x8F]).unwrap();

        let mut status_byte = [0u8];
        let mut seen = Vec::new();
        for _ in 0..3 {
            bus.read(AD5933_ADDRESS, &mut status_byte).unwrap();
            seen.push(status_byte[0] & status::DATA_VALID != 0);
        }
        assert_eq!(seen, vec![false, false, true]);
    }

    #[test]
    fn test_adc_noise_stays_in_range() {
        let mut adc = SimAdc::noisy(SimAdc::FULL_SCALE - 2, 50, 7);
        for _ in 0..100 {
            let value = u16::from_le_bytes(adc.read_sample().unwrap());
            assert!(value <= SimAdc::FULL_SCALE);
            assert!(value >= SimAdc::FULL_SCALE - 52);
        }
        assert_eq!(adc.conversions(), 100);
        adc.set_failing(true);
        assert_eq!(adc.read_sample(), Err(SimAdcFault));
    }

    #[test]
    fn test_pin_records_edges() {
        let mut pin = SimPin::new();
        pin.set_high().unwrap();
        pin.toggle().unwrap();
        pin.set_low().unwrap();
        pin.toggle().unwrap();
        assert_eq!(pin.history(), vec![true, false, false, true]);
        assert_eq!(pin.edges(), 3);
        assert!(pin.level());
    }

    #[test]
    fn test_delay_accumulates() {
        let mut delay = SimDelay::new();
        let probe = delay.clone();
        delay.delay_us(750);
        delay.delay_ms(2);
        assert_eq!(probe.elapsed_us(), 2_750);
    }
}
