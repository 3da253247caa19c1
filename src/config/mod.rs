// src/config/mod.rs
//! Node configuration
//!
//! Everything here is read once at start-up. Values the host can change at
//! runtime (periods, range, gain, reference switch) start from this
//! configuration and then live in the shared store.

pub mod constants;
pub mod loader;

pub use constants::*;
pub use loader::{ConfigError, ConfigLoader};

use serde::{Deserialize, Serialize};

use crate::drivers::ad5933::{ClockSource, OutputRange, PgaGain, SettlingMultiplier};
use crate::utils::frequency_to_code;

/// Complete node configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub identity: IdentitySettings,
    #[serde(default)]
    pub protocol: ProtocolSettings,
    #[serde(default)]
    pub periods: PeriodSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub impedance: ImpedanceSettings,
}

/// Address of the node on the host bus
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct IdentitySettings {
    #[serde(default = "defaults::slave_address")]
    pub slave_address: u8,

    /// The node with this address starts its acquisition counters in phase
    #[serde(default = "defaults::canonical_address")]
    pub canonical_address: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ProtocolSettings {
    #[serde(default = "defaults::inbox_capacity")]
    pub inbox_capacity: usize,
}

/// Start-up periods; 0 disables the periodic path
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PeriodSettings {
    #[serde(default = "defaults::impedance_ms")]
    pub impedance_ms: u16,

    #[serde(default = "defaults::temperature_ms")]
    pub temperature_ms: u16,

    /// Legacy EMG interval, used as the settle delay before a conversion
    #[serde(default = "defaults::emg_us")]
    pub emg_us: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    #[serde(default = "defaults::heartbeat_period_ms")]
    pub heartbeat_period_ms: u16,

    #[serde(default = "defaults::indicator_period_ms")]
    pub indicator_period_ms: u16,
}

/// Impedance analyzer attach settings and sweep policy
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ImpedanceSettings {
    #[serde(default)]
    pub clock: ClockSource,

    #[serde(default = "defaults::start_frequency_hz")]
    pub start_frequency_hz: u32,

    #[serde(default = "defaults::increment_frequency_hz")]
    pub increment_frequency_hz: u32,

    #[serde(default = "defaults::increment_count")]
    pub increment_count: u16,

    #[serde(default = "defaults::settling_cycles")]
    pub settling_cycles: u16,

    #[serde(default = "defaults::settling_multiplier")]
    pub settling_multiplier: u8,

    #[serde(default)]
    pub output_range: OutputRange,

    #[serde(default)]
    pub pga_gain: PgaGain,

    /// Status reads per polling phase; 0 polls forever
    #[serde(default = "defaults::poll_budget")]
    pub poll_budget: u32,

    /// Sweep runs per electrode pair before the pass is abandoned
    #[serde(default = "defaults::sweep_attempts")]
    pub sweep_attempts: u32,

    /// Delay between switching electrodes and starting a sweep
    #[serde(default = "defaults::switch_settle_us")]
    pub switch_settle_us: u32,
}

/// Default value providers using constants
mod defaults {
    use crate::config::constants::*;

    pub fn slave_address() -> u8 { identity::DEFAULT_SLAVE_ADDRESS }
    pub fn canonical_address() -> u8 { identity::CANONICAL_SLAVE_ADDRESS }

    pub fn inbox_capacity() -> usize { protocol::DEFAULT_INBOX_CAPACITY }

    pub fn impedance_ms() -> u16 { periods::DEFAULT_IMPEDANCE_PERIOD_MS }
    pub fn temperature_ms() -> u16 { periods::DEFAULT_TEMPERATURE_PERIOD_MS }
    pub fn emg_us() -> u16 { periods::DEFAULT_EMG_PERIOD_US }

    pub fn heartbeat_period_ms() -> u16 { scheduler::DEFAULT_HEARTBEAT_PERIOD_MS }
    pub fn indicator_period_ms() -> u16 { scheduler::DEFAULT_ABSENT_INDICATOR_PERIOD_MS }

    pub fn start_frequency_hz() -> u32 { impedance::DEFAULT_START_FREQUENCY_HZ }
    pub fn increment_frequency_hz() -> u32 { impedance::DEFAULT_INCREMENT_FREQUENCY_HZ }
    pub fn increment_count() -> u16 { impedance::DEFAULT_INCREMENT_COUNT }
    pub fn settling_cycles() -> u16 { impedance::DEFAULT_SETTLING_CYCLES }
    pub fn settling_multiplier() -> u8 { impedance::DEFAULT_SETTLING_MULTIPLIER }
    pub fn poll_budget() -> u32 { impedance::DEFAULT_POLL_BUDGET }
    pub fn sweep_attempts() -> u32 { impedance::DEFAULT_SWEEP_ATTEMPTS }
    pub fn switch_settle_us() -> u32 { impedance::DEFAULT_SWITCH_SETTLE_US }
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            slave_address: defaults::slave_address(),
            canonical_address: defaults::canonical_address(),
        }
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            inbox_capacity: defaults::inbox_capacity(),
        }
    }
}

impl Default for PeriodSettings {
    fn default() -> Self {
        Self {
            impedance_ms: defaults::impedance_ms(),
            temperature_ms: defaults::temperature_ms(),
            emg_us: defaults::emg_us(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            heartbeat_period_ms: defaults::heartbeat_period_ms(),
            indicator_period_ms: defaults::indicator_period_ms(),
        }
    }
}

impl Default for ImpedanceSettings {
    fn default() -> Self {
        Self {
            clock: ClockSource::default(),
            start_frequency_hz: defaults::start_frequency_hz(),
            increment_frequency_hz: defaults::increment_frequency_hz(),
            increment_count: defaults::increment_count(),
            settling_cycles: defaults::settling_cycles(),
            settling_multiplier: defaults::settling_multiplier(),
            output_range: OutputRange::default(),
            pga_gain: PgaGain::default(),
            poll_budget: defaults::poll_budget(),
            sweep_attempts: defaults::sweep_attempts(),
            switch_settle_us: defaults::switch_settle_us(),
        }
    }
}

impl NodeConfig {
    /// Check every value against the hardware and protocol limits.
    /// All violations are reported, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (name, address) in [
            ("slave_address", self.identity.slave_address),
            ("canonical_address", self.identity.canonical_address),
        ] {
            if !(identity::MIN_SLAVE_ADDRESS..=identity::MAX_SLAVE_ADDRESS).contains(&address) {
                errors.push(format!(
                    "{name} {address:#04x} outside {:#04x}..={:#04x}",
                    identity::MIN_SLAVE_ADDRESS,
                    identity::MAX_SLAVE_ADDRESS
                ));
            }
        }

        if self.protocol.inbox_capacity < protocol::MIN_INBOX_CAPACITY {
            errors.push(format!(
                "inbox_capacity {} below minimum {}",
                self.protocol.inbox_capacity,
                protocol::MIN_INBOX_CAPACITY
            ));
        }

        for (name, value) in [
            ("impedance_ms", self.periods.impedance_ms),
            ("temperature_ms", self.periods.temperature_ms),
            ("emg_us", self.periods.emg_us),
        ] {
            if value > periods::MAX_PERIOD {
                errors.push(format!("{name} {value} exceeds {}", periods::MAX_PERIOD));
            }
        }

        if self.scheduler.heartbeat_period_ms == 0 || self.scheduler.indicator_period_ms == 0 {
            errors.push("scheduler periods must be non-zero".to_string());
        }

        let imp = &self.impedance;
        let clock_hz = imp.clock.hz();
        for (name, hz) in [
            ("start_frequency_hz", imp.start_frequency_hz),
            ("increment_frequency_hz", imp.increment_frequency_hz),
        ] {
            if frequency_to_code(hz, clock_hz).is_none() {
                errors.push(format!("{name} {hz} Hz does not fit a 24-bit code at {clock_hz} Hz"));
            }
        }
        if imp.increment_count > impedance::MAX_INCREMENT_COUNT {
            errors.push(format!(
                "increment_count {} exceeds {}",
                imp.increment_count,
                impedance::MAX_INCREMENT_COUNT
            ));
        }
        if imp.settling_cycles > impedance::MAX_SETTLING_CYCLES {
            errors.push(format!(
                "settling_cycles {} exceeds {}",
                imp.settling_cycles,
                impedance::MAX_SETTLING_CYCLES
            ));
        }
        if SettlingMultiplier::from_factor(imp.settling_multiplier).is_none() {
            errors.push(format!("settling_multiplier {} is not 1, 2 or 4", imp.settling_multiplier));
        }
        if imp.sweep_attempts == 0 {
            errors.push("sweep_attempts must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Whether this node is the canonical (in-phase) node
    pub fn in_phase(&self) -> bool {
        self.identity.slave_address == self.identity.canonical_address
    }
}
