// src/error.rs
//! Unified error handling for the sensor node
//!
//! Driver errors are generic over the bus error type of the transport they
//! run on. Once an error leaves a driver it is normalised into [`NodeError`],
//! which only keeps the portable [`ErrorKind`] so the acquisition loop, the
//! attach sequence and the tests can all handle one concrete type.
//!
//! Two classes of failure exist:
//! - transport failures, propagated immediately from the failing transfer;
//! - configuration validation failures, rejected before any register is touched.
//!
//! Malformed host protocol input is never an error: the protocol has no way to
//! report one, so the engine drops it.

use embedded_hal::i2c::{Error as I2cError, ErrorKind};
use thiserror::Error;

use crate::drivers::ad5933::Ad5933Error;
use crate::drivers::max30205::Max30205Error;
use crate::hal::Subsystem;

/// Result alias used across the node
pub type NodeResult<T> = Result<T, NodeError>;

/// Error type shared by the attach sequence and the acquisition loop
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// A bus transfer to a sensor chip failed
    #[error("{subsystem} bus transfer failed: {kind:?}")]
    Transport {
        subsystem: Subsystem,
        kind: ErrorKind,
    },

    /// A configuration value was rejected before reaching the hardware
    #[error("{subsystem} rejected configuration: {reason}")]
    InvalidConfiguration {
        subsystem: Subsystem,
        reason: String,
    },

    /// The presence scan did not find the chip in its reset state
    #[error("{subsystem} not detected (scan read {found:#06x})")]
    NotPresent {
        subsystem: Subsystem,
        found: u16,
    },

    /// A status bit never asserted within the polling budget
    #[error("{subsystem} timed out waiting for status bit {bit:#04x} after {polls} polls")]
    Timeout {
        subsystem: Subsystem,
        bit: u8,
        polls: u32,
    },

    /// The subsystem was not attached, so the request was skipped
    #[error("{subsystem} is disabled")]
    Disabled {
        subsystem: Subsystem,
    },

    /// The EMG converter failed to deliver a sample
    #[error("EMG conversion failed")]
    Adc,

    /// Driving an electrode routing line failed
    #[error("electrode routing line could not be driven")]
    Routing,
}

impl NodeError {
    /// Subsystem the error originated from, if it belongs to one
    pub fn subsystem(&self) -> Option<Subsystem> {
        match self {
            NodeError::Transport { subsystem, .. }
            | NodeError::InvalidConfiguration { subsystem, .. }
            | NodeError::NotPresent { subsystem, .. }
            | NodeError::Timeout { subsystem, .. }
            | NodeError::Disabled { subsystem } => Some(*subsystem),
            NodeError::Adc => Some(Subsystem::Emg),
            NodeError::Routing => None,
        }
    }

    /// Whether retrying the whole operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, NodeError::Transport { .. } | NodeError::Timeout { .. })
    }
}

impl<E: I2cError> From<Ad5933Error<E>> for NodeError {
    fn from(err: Ad5933Error<E>) -> Self {
        let subsystem = Subsystem::Impedance;
        match err {
            Ad5933Error::Bus(e) => NodeError::Transport { subsystem, kind: e.kind() },
            Ad5933Error::NotPresent { found } => NodeError::NotPresent { subsystem, found },
            Ad5933Error::Timeout { bit, polls } => NodeError::Timeout { subsystem, bit, polls },
            Ad5933Error::ReadbackMismatch { .. } => NodeError::Transport {
                subsystem,
                kind: ErrorKind::Other,
            },
            other => NodeError::InvalidConfiguration {
                subsystem,
                reason: other.to_string(),
            },
        }
    }
}

impl<E: I2cError> From<Max30205Error<E>> for NodeError {
    fn from(err: Max30205Error<E>) -> Self {
        let subsystem = Subsystem::Temperature;
        match err {
            Max30205Error::Bus(e) => NodeError::Transport { subsystem, kind: e.kind() },
            Max30205Error::NotPresent { found } => NodeError::NotPresent { subsystem, found },
        }
    }
}
