// src/node.rs
//! Sensor node assembly
//!
//! [`SensorNode`] owns the state shared by the three execution contexts and
//! hands out the per-context pieces: the bus inbox for the slave interrupt,
//! the [`BusTask`] that consumes it, the tick [`Scheduler`] and, after the
//! attach sequence, the [`AcquisitionLoop`].

use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{OutputPin, StatefulOutputPin};
use embedded_hal::i2c::I2c;
use tracing::{error, info, warn};

use crate::acquisition::{AcquisitionLoop, ElectrodeRouter, Scheduler, SharedSampleStore};
use crate::config::constants::diagnostics::FAULT_BLINK_INTERVAL_MS;
use crate::config::loader::ConfigError;
use crate::config::{ImpedanceSettings, NodeConfig};
use crate::drivers::ad5933::Ad5933;
use crate::drivers::max30205::Max30205;
use crate::error::{NodeError, NodeResult};
use crate::hal::{EmgAdc, Subsystem};
use crate::protocol::{BusInbox, BusTask, CommandDispatcher, SlaveProtocolEngine};

/// Board resources consumed by the attach sequence
pub struct Peripherals<I, A, P, D> {
    /// Bus handle for the impedance analyzer
    pub impedance_bus: I,
    /// Bus handle for the temperature sensor
    pub temperature_bus: I,
    pub adc: A,
    pub sw_1: P,
    pub sw_2: P,
    pub sw_ref: P,
    pub sw_imp: P,
    pub delay: D,
}

/// Outcome of the attach sequence per sensor chip
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachReport {
    pub impedance_fault: Option<NodeError>,
    pub temperature_fault: Option<NodeError>,
}

impl AttachReport {
    pub fn is_clean(&self) -> bool {
        self.impedance_fault.is_none() && self.temperature_fault.is_none()
    }

    /// True when the diagnostic build must stop on this report
    pub fn halt_requested(&self) -> bool {
        cfg!(feature = "halt-on-fault") && !self.is_clean()
    }

    /// Diagnostic halt. With the `halt-on-fault` feature and a failed attach
    /// this blinks `indicator` forever; otherwise it returns immediately.
    pub fn enforce<L, D>(&self, indicator: &mut L, delay: &mut D)
    where
        L: StatefulOutputPin,
        D: DelayNs,
    {
        if !self.halt_requested() {
            return;
        }
        error!(report = ?self, "sensor attach failed, halting");
        loop {
            let _ = indicator.toggle();
            delay.delay_ms(FAULT_BLINK_INTERVAL_MS);
        }
    }
}

pub struct SensorNode {
    config: NodeConfig,
    store: Arc<SharedSampleStore>,
    inbox: Arc<BusInbox>,
}

impl SensorNode {
    pub fn new(config: NodeConfig) -> Result<Self, ConfigError> {
        config.validate().map_err(ConfigError::Validation)?;
        let store = Arc::new(SharedSampleStore::new(&config.periods));
        let inbox = Arc::new(BusInbox::new(config.protocol.inbox_capacity));
        info!(
            slave_address = config.identity.slave_address,
            in_phase = config.in_phase(),
            "sensor node created"
        );
        Ok(Self { config, store, inbox })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn slave_address(&self) -> u8 {
        self.config.identity.slave_address
    }

    pub fn store(&self) -> &Arc<SharedSampleStore> {
        &self.store
    }

    /// Interrupt side of the slave bus
    pub fn inbox(&self) -> &Arc<BusInbox> {
        &self.inbox
    }

    /// Consumer of the bus inbox. Create exactly one per node.
    pub fn bus_task(&self) -> BusTask {
        let engine = SlaveProtocolEngine::new(CommandDispatcher::new(Arc::clone(&self.store)));
        BusTask::new(Arc::clone(&self.inbox), engine)
    }

    /// Tick context scheduler, seeded from the node identity
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(Arc::clone(&self.store), &self.config.scheduler, self.config.in_phase())
    }

    /// Probe and configure both sensor chips, then build the acquisition loop.
    ///
    /// A chip that fails its scan or configuration is left out and its
    /// subsystem disabled; the failure is reported, not returned. Only a
    /// routing line that cannot be driven fails the whole attach.
    pub fn attach<I, A, P, D>(
        &self,
        peripherals: Peripherals<I, A, P, D>,
    ) -> NodeResult<(AcquisitionLoop<I, A, P, D>, AttachReport)>
    where
        I: I2c,
        A: EmgAdc,
        P: OutputPin,
        D: DelayNs,
    {
        let Peripherals {
            impedance_bus,
            temperature_bus,
            adc,
            sw_1,
            sw_2,
            sw_ref,
            sw_imp,
            delay,
        } = peripherals;

        let router = ElectrodeRouter::new(sw_1, sw_2, sw_ref, sw_imp).map_err(|_| NodeError::Routing)?;
        let mut report = AttachReport::default();
        let control = self.store.control();

        let impedance = match attach_impedance(impedance_bus, &self.config.impedance) {
            Ok(chip) => Some(chip),
            Err(err) => {
                warn!(%err, "impedance analyzer disabled");
                report.impedance_fault = Some(err);
                None
            }
        };
        control.set_present(Subsystem::Impedance, impedance.is_some());

        let temperature = match attach_temperature(temperature_bus) {
            Ok(sensor) => Some(sensor),
            Err(err) => {
                warn!(%err, "temperature sensor disabled");
                report.temperature_fault = Some(err);
                None
            }
        };
        control.set_present(Subsystem::Temperature, temperature.is_some());

        info!(
            impedance = impedance.is_some(),
            temperature = temperature.is_some(),
            "sensors attached"
        );
        self.store.set_ready(false);

        let acquisition = AcquisitionLoop::new(
            Arc::clone(&self.store),
            impedance,
            temperature,
            adc,
            router,
            delay,
            &self.config.impedance,
        );
        Ok((acquisition, report))
    }
}

fn attach_impedance<I: I2c>(bus: I, settings: &ImpedanceSettings) -> NodeResult<Ad5933<I>> {
    let mut chip = Ad5933::new(bus);
    chip.scan()?;
    chip.configure(settings)?;
    Ok(chip)
}

fn attach_temperature<I: I2c>(bus: I) -> NodeResult<Max30205<I>> {
    let mut sensor = Max30205::new(bus);
    sensor.scan()?;
    sensor.begin()?;
    Ok(sensor)
}

#[cfg(all(test, feature = "simulation"))]
mod tests {
    use super::*;
    use crate::drivers::ad5933::registers::control;
    use crate::hal::simulator::{SimAdc, SimDelay, SimPin, SimSensorBus};

    type SimLoop = AcquisitionLoop<SimSensorBus, SimAdc, SimPin, SimDelay>;

    fn peripherals(bus: &SimSensorBus) -> Peripherals<SimSensorBus, SimAdc, SimPin, SimDelay> {
        Peripherals {
            impedance_bus: bus.clone(),
            temperature_bus: bus.clone(),
            adc: SimAdc::constant(0x0123),
            sw_1: SimPin::new(),
            sw_2: SimPin::new(),
            sw_ref: SimPin::new(),
            sw_imp: SimPin::new(),
            delay: SimDelay::new(),
        }
    }

    fn attach(bus: &SimSensorBus) -> (SensorNode, SimLoop, AttachReport) {
        let node = SensorNode::new(NodeConfig::default()).unwrap();
        let (acquisition, report) = node.attach(peripherals(bus)).unwrap();
        (node, acquisition, report)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = NodeConfig::default();
        config.impedance.settling_multiplier = 3;
        assert!(matches!(SensorNode::new(config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_attach_configures_both_chips() {
        let bus = SimSensorBus::new();
        bus.set_temperature_hysteresis(0x4B00);
        let (node, _acquisition, report) = attach(&bus);

        assert!(report.is_clean());
        assert!(!report.halt_requested());
        assert!(node.store().control().is_present(Subsystem::Impedance));
        assert!(node.store().control().is_present(Subsystem::Temperature));
        assert_eq!(bus.impedance_control() >> 8 & u16::from(control::MODE_MASK), u16::from(control::STANDBY_MODE));
        assert_eq!(bus.temperature_configuration(), 0);
    }

    #[test]
    fn test_absent_impedance_chip_is_disabled() {
        let bus = SimSensorBus::new();
        bus.set_impedance_present(false);
        let (node, _acquisition, report) = attach(&bus);

        assert!(matches!(
            report.impedance_fault,
            Some(NodeError::Transport { subsystem: Subsystem::Impedance, .. })
        ));
        assert!(report.temperature_fault.is_none());
        assert_eq!(report.halt_requested(), cfg!(feature = "halt-on-fault"));
        assert!(!node.store().control().is_present(Subsystem::Impedance));
        assert!(!node.store().control().is_periodic(Subsystem::Impedance));
        assert!(node.store().control().is_present(Subsystem::Temperature));
    }

    #[test]
    fn test_wrong_temperature_chip_is_disabled() {
        let bus = SimSensorBus::new();
        bus.set_temperature_hysteresis(0x1234);
        let (node, _acquisition, report) = attach(&bus);

        assert_eq!(
            report.temperature_fault,
            Some(NodeError::NotPresent { subsystem: Subsystem::Temperature, found: 0x1234 })
        );
        assert!(!node.store().control().is_present(Subsystem::Temperature));
    }

    #[test]
    fn test_enforce_returns_without_fault() {
        let report = AttachReport::default();
        let mut indicator = SimPin::new();
        let mut delay = SimDelay::new();
        report.enforce(&mut indicator, &mut delay);
        assert!(indicator.history().is_empty());
        assert_eq!(delay.elapsed_ns(), 0);
    }
}
