//! EMG sensor node: I2C peripheral core for an EMG, bio-impedance and skin
//! temperature sensor node
//!
//! The node answers a register-addressed command protocol on the host I2C bus
//! and schedules impedance and temperature acquisition on its own between host
//! polls. It features:
//!
//! - A slave protocol engine fed by a lock-free inbox of raw bus conditions
//! - A millisecond scheduler raising acquisition flags with identity-keyed phase offsets
//! - Drivers for the AD5933 impedance analyzer and the MAX30205 temperature sensor
//! - A shared sample store with whole-value publication across contexts
//! - Host-side simulation of every peripheral
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use emg_sensor_node::config::NodeConfig;
//! use emg_sensor_node::hal::simulator::{SimAdc, SimDelay, SimHost, SimPin, SimSensorBus};
//! use emg_sensor_node::node::{Peripherals, SensorNode};
//! use emg_sensor_node::protocol::CommandCode;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = SensorNode::new(NodeConfig::default())?;
//!     let bus = SimSensorBus::new();
//!     let (mut acquisition, _report) = node.attach(Peripherals {
//!         impedance_bus: bus.clone(),
//!         temperature_bus: bus,
//!         adc: SimAdc::constant(0x0800),
//!         sw_1: SimPin::new(),
//!         sw_2: SimPin::new(),
//!         sw_ref: SimPin::new(),
//!         sw_imp: SimPin::new(),
//!         delay: SimDelay::new(),
//!     })?;
//!
//!     let mut host = SimHost::new(node.inbox().clone(), node.bus_task());
//!     host.command(CommandCode::Emg);
//!     acquisition.run_once();
//!     let sample = host.query(CommandCode::Emg, 2);
//!     println!("EMG sample: {:?}", sample);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

pub mod acquisition;
pub mod config;
pub mod drivers;
pub mod error;
pub mod hal;
pub mod node;
pub mod protocol;
pub mod utils;

// Re-export commonly used types for convenience
pub use acquisition::{AcquisitionLoop, Scheduler, SharedSampleStore};
pub use config::NodeConfig;
pub use error::{NodeError, NodeResult};
pub use hal::{BusAction, BusEvent, Direction, EmgAdc, RoutingState, SlaveResponder, Subsystem};
pub use node::{AttachReport, Peripherals, SensorNode};
pub use protocol::{BusInbox, BusTask, CommandCode, SlaveProtocolEngine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: "I2C peripheral core for an EMG, bio-impedance and skin temperature sensor node".to_string(),
        features: vec![
            "I2C slave command protocol".to_string(),
            "Millisecond acquisition scheduler".to_string(),
            "AD5933 impedance sweep".to_string(),
            "MAX30205 temperature readout".to_string(),
            "Lock-free shared sample store".to_string(),
        ],
    }
}

/// Library version information
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// Library name
    pub name: String,
    /// Version string
    pub version: String,
    /// Description
    pub description: String,
    /// List of features
    pub features: Vec<String>,
}
