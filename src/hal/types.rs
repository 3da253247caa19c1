// src/hal/types.rs
//! Core types shared between the bus interrupt, the tick interrupt and the main loop

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sensor subsystems hosted by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
    Emg,
    Impedance,
    Temperature,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subsystem::Emg => write!(f, "EMG"),
            Subsystem::Impedance => write!(f, "impedance analyzer"),
            Subsystem::Temperature => write!(f, "temperature sensor"),
        }
    }
}

/// Direction of the data phase, seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host writes, node receives
    HostWrite,
    /// Host reads, node transmits
    HostRead,
}

/// Raw condition raised by the slave peripheral.
///
/// The bus interrupt records these and nothing else; interpretation happens
/// in the protocol engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// Our address was matched, either after a start or a repeated start
    AddressMatch(Direction),
    /// The host clocked in a data byte
    ByteReceived(u8),
    /// The host is waiting for the next data byte
    ByteRequested,
    /// Stop condition, the transaction is over
    Stop,
}

/// Reaction the slave peripheral must perform for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusAction {
    /// Acknowledge and keep the transaction running
    Ack,
    /// Acknowledge the final accepted byte and wait for the stop condition
    AckAndComplete,
    /// Refuse the byte
    Nack,
    /// Drive `byte` on the bus; `last` issues the end-of-transfer command
    Transmit { byte: u8, last: bool },
    /// No peripheral action needed
    Idle,
}

/// Level of the four electrode routing lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoutingState {
    pub sw_1: bool,
    pub sw_2: bool,
    pub sw_ref: bool,
    pub sw_imp: bool,
}

impl RoutingState {
    /// Electrodes wired straight to the EMG front end
    pub const EMG_PASSTHROUGH: Self = Self::new(false, false, false, false);
    /// Pair 1 on the impedance analyzer, periodic acquisition
    pub const PERIODIC_PAIR_1: Self = Self::new(true, false, true, true);
    /// Pair 2 on the impedance analyzer, periodic acquisition
    pub const PERIODIC_PAIR_2: Self = Self::new(false, true, true, false);
    /// Pair 1 on the impedance analyzer, host requested acquisition
    pub const REQUESTED_PAIR_1: Self = Self::new(true, true, true, true);
    /// Pair 2 on the impedance analyzer, host requested acquisition
    pub const REQUESTED_PAIR_2: Self = Self::new(true, true, true, false);

    pub const fn new(sw_1: bool, sw_2: bool, sw_ref: bool, sw_imp: bool) -> Self {
        Self { sw_1, sw_2, sw_ref, sw_imp }
    }
}
