// tests/acquisition_integration.rs
//! Integration tests for the acquisition path: host commands, scheduler ticks
//! and the main loop running against the simulated sensor chips

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, Operation};

use emg_sensor_node::acquisition::{AcquisitionLoop, Flag, ImpedanceFrame, ImpedanceView, SharedSampleStore};
use emg_sensor_node::config::NodeConfig;
use emg_sensor_node::drivers::ad5933::registers::control;
use emg_sensor_node::drivers::ad5933::SweepPhase;
use emg_sensor_node::hal::simulator::{SimAdc, SimAdcFault, SimDelay, SimHost, SimPin, SimSensorBus};
use emg_sensor_node::hal::{EmgAdc, RoutingState, Subsystem};
use emg_sensor_node::node::{AttachReport, Peripherals, SensorNode};
use emg_sensor_node::protocol::{CommandCode, CommandDispatcher};
use emg_sensor_node::NodeError;

struct Rig {
    node: SensorNode,
    bus: SimSensorBus,
    adc: SimAdc,
    delay: SimDelay,
    sw_1: SimPin,
    sw_ref: SimPin,
    sw_imp: SimPin,
    acquisition: AcquisitionLoop<SimSensorBus, SimAdc, SimPin, SimDelay>,
    report: AttachReport,
    host: SimHost,
}

fn rig_with(config: NodeConfig, prepare: impl FnOnce(&SimSensorBus)) -> Rig {
    let node = SensorNode::new(config).unwrap();
    let bus = SimSensorBus::new();
    prepare(&bus);

    let adc = SimAdc::constant(0x0123);
    let delay = SimDelay::new();
    let (sw_1, sw_2, sw_ref, sw_imp) = (SimPin::new(), SimPin::new(), SimPin::new(), SimPin::new());

    let (acquisition, report) = node
        .attach(Peripherals {
            impedance_bus: bus.clone(),
            temperature_bus: bus.clone(),
            adc: adc.clone(),
            sw_1: sw_1.clone(),
            sw_2,
            sw_ref: sw_ref.clone(),
            sw_imp: sw_imp.clone(),
            delay: delay.clone(),
        })
        .unwrap();
    let host = SimHost::new(node.inbox().clone(), node.bus_task());

    Rig {
        node,
        bus,
        adc,
        delay,
        sw_1,
        sw_ref,
        sw_imp,
        acquisition,
        report,
        host,
    }
}

fn rig() -> Rig {
    rig_with(NodeConfig::default(), |_| {})
}

#[test]
fn test_emg_trigger_then_read() {
    let mut rig = rig();

    rig.host.command(CommandCode::Emg);
    let report = rig.acquisition.run_once();

    assert!(report.emg);
    assert!(report.last_error.is_none());
    assert_eq!(rig.host.read(2), vec![0x23, 0x01]);
    // settle delay before the conversion
    assert_eq!(rig.delay.elapsed_us(), 750);
    assert!(!rig.node.store().flags().is_raised(Flag::Emg));
}

#[test]
fn test_emg_conversion_failure_clears_flag() {
    let mut rig = rig();
    rig.adc.set_failing(true);

    rig.host.command(CommandCode::Emg);
    let report = rig.acquisition.run_once();

    assert_eq!(report.last_error, Some(NodeError::Adc));
    assert!(!rig.node.store().flags().is_raised(Flag::Emg));
    assert!(rig.acquisition.run_once().is_idle());
}

#[test]
fn test_requested_read_publishes_both_pairs_and_temperature() {
    let mut rig = rig();
    assert!(rig.report.is_clean());
    rig.bus.queue_impedance_result(1234, -567);
    rig.bus.queue_impedance_result(2345, -678);
    rig.bus.set_body_temperature(36.75);

    rig.host.command(CommandCode::RequestRead);
    assert_eq!(rig.host.query(CommandCode::ReadReady, 1), vec![0]);

    let report = rig.acquisition.run_once();
    assert!(report.request);
    assert!(report.last_error.is_none());

    assert_eq!(rig.host.query(CommandCode::ReadReady, 1), vec![1]);
    assert_eq!(
        rig.host.query(CommandCode::ImpAll, 8),
        vec![0x04, 0xD2, 0xFD, 0xC9, 0x09, 0x29, 0xFD, 0x5A]
    );
    assert_eq!(rig.host.query(CommandCode::Temperature, 2), vec![0x24, 0xC0]);
    assert_eq!(rig.host.query(CommandCode::ReadReady, 1), vec![0]);

    let flags = rig.node.store().flags();
    assert!(!flags.is_raised(Flag::RequestRead));
    assert!(!flags.is_raised(Flag::Impedance));
    assert!(!flags.is_raised(Flag::Temperature));
}

#[test]
fn test_requested_read_routing_sequence() {
    let mut rig = rig();
    rig.host.command(CommandCode::RequestRead);
    rig.acquisition.run_once();

    // passthrough at attach, requested pair 1, requested pair 2, passthrough
    assert_eq!(rig.sw_1.history(), vec![false, true, true, false]);
    assert_eq!(rig.sw_imp.history(), vec![false, true, false, false]);
    assert_eq!(rig.sw_ref.history(), vec![false, true, true, false]);
    assert_eq!(rig.acquisition.router().state(), RoutingState::EMG_PASSTHROUGH);
    assert_eq!(rig.acquisition.sweep_phase(), SweepPhase::Complete);
}

#[test]
fn test_absent_impedance_chip_still_serves_emg_and_temperature() {
    let mut rig = rig_with(NodeConfig::default(), |bus| bus.set_impedance_present(false));
    assert!(rig.report.impedance_fault.is_some());
    assert!(!rig.node.store().control().is_periodic(Subsystem::Impedance));
    rig.bus.set_body_temperature(30.0);

    rig.host.command(CommandCode::RequestRead);
    let report = rig.acquisition.run_once();
    assert!(report.last_error.is_none());

    assert_eq!(rig.host.query(CommandCode::ReadReady, 1), vec![1]);
    assert_eq!(rig.host.query(CommandCode::ImpAll, 8), ImpedanceFrame::placeholder().bytes().to_vec());
    assert_eq!(rig.host.query(CommandCode::Temperature, 2), vec![0x1E, 0x00]);

    rig.host.command(CommandCode::Emg);
    rig.acquisition.run_once();
    assert_eq!(rig.host.read(2), vec![0x23, 0x01]);
    // the routing lines never left passthrough
    assert_eq!(rig.sw_1.history(), vec![false]);
}

#[test]
fn test_output_range_setter_reaches_control_register() {
    let mut rig = rig();

    rig.host.set(CommandCode::SetOutputRange, 4);
    assert_eq!(rig.acquisition.run_once().settings_applied, 1);
    let high = (rig.bus.impedance_control() >> 8) as u8;
    assert_eq!(high & control::RANGE_MASK, control::OUTPUT_RANGE_4);

    rig.host.set(CommandCode::SetOutputRange, 2);
    rig.acquisition.run_once();
    let high = (rig.bus.impedance_control() >> 8) as u8;
    assert_eq!(high & control::RANGE_MASK, control::OUTPUT_RANGE_2);
    assert_eq!(high & control::MODE_MASK, control::STANDBY_MODE);
}

#[test]
fn test_pga_and_reference_switch_setters() {
    let mut rig = rig();

    rig.host.set(CommandCode::SetPgaGain, 5);
    rig.host.set(CommandCode::SetReferenceSwitch, 1);
    assert_eq!(rig.acquisition.run_once().settings_applied, 2);

    let high = (rig.bus.impedance_control() >> 8) as u8;
    assert_eq!(high & control::PGA_MASK, control::PGA_GAIN_X5);
    assert!(rig.sw_ref.level());
    assert!(rig.acquisition.router().state().sw_ref);
}

#[test]
fn test_periodic_impedance_from_scheduler() {
    let mut config = NodeConfig::default();
    config.identity.slave_address = config.identity.canonical_address;
    config.periods.impedance_ms = 5;
    let mut rig = rig_with(config, |bus| bus.set_default_impedance_result(10, -20));
    let mut scheduler = rig.node.scheduler();

    let due: Vec<u32> = (1..=10).filter(|_| scheduler.tick().impedance_due).collect();
    assert_eq!(due, vec![5, 10]);
    assert!(rig.node.store().flags().is_raised(Flag::Impedance));

    let report = rig.acquisition.run_once();
    assert!(report.impedance);
    assert!(report.last_error.is_none());
    assert_eq!(
        rig.node.store().impedance().bytes(),
        &[0x00, 0x0A, 0xFF, 0xEC, 0x00, 0x0A, 0xFF, 0xEC]
    );
    // periodic acquisition does not touch readiness
    assert!(!rig.node.store().is_ready());
    // periodic routing: pair 1 (1,0,1,1), pair 2 (0,1,1,0)
    assert_eq!(rig.sw_imp.history(), vec![false, true, false, false]);
}

#[test]
fn test_stop_periodic_silences_the_scheduler() {
    let mut config = NodeConfig::default();
    config.periods.impedance_ms = 4;
    config.periods.temperature_ms = 4;
    let mut rig = rig_with(config, |_| {});
    let mut scheduler = rig.node.scheduler();

    rig.host.command(CommandCode::StopPeriodic);
    let fired = (0..20).map(|_| scheduler.tick()).any(|events| events.impedance_due || events.temperature_due);
    assert!(!fired);

    rig.host.command(CommandCode::StartPeriodic);
    let fired = (0..20).filter(|_| scheduler.tick().impedance_due).count();
    assert_eq!(fired, 5);
}

#[test]
fn test_transport_failure_keeps_previous_results() {
    let mut rig = rig();
    rig.bus.fail_transfers(0, 100);

    rig.host.command(CommandCode::RequestRead);
    let report = rig.acquisition.run_once();

    assert!(matches!(report.last_error, Some(NodeError::Transport { .. })));
    assert_eq!(rig.host.query(CommandCode::ReadReady, 1), vec![0]);
    assert_eq!(rig.node.store().impedance(), ImpedanceFrame::placeholder());
    assert!(!rig.node.store().flags().is_raised(Flag::RequestRead));
    assert_eq!(rig.acquisition.router().state(), RoutingState::EMG_PASSTHROUGH);

    rig.bus.clear_faults();
    rig.host.command(CommandCode::RequestRead);
    assert!(rig.acquisition.run_once().last_error.is_none());
    assert_eq!(rig.host.query(CommandCode::ReadReady, 1), vec![1]);
}

#[test]
fn test_single_transport_glitch_is_retried() {
    let mut rig = rig();
    rig.bus.queue_impedance_result(7, 8);
    rig.bus.fail_transfers(0, 1);

    rig.host.command(CommandCode::RequestRead);
    let report = rig.acquisition.run_once();

    assert!(report.last_error.is_none());
    assert_eq!(rig.node.store().impedance().view(ImpedanceView::Pair1Real), &[0, 7]);
    assert!(rig.node.store().is_ready());
}

#[test]
fn test_stalled_chip_times_out_after_retries() {
    let mut config = NodeConfig::default();
    config.impedance.poll_budget = 10;
    config.impedance.sweep_attempts = 2;
    let mut rig = rig_with(config, |_| {});
    rig.bus.set_impedance_stalled(true);

    rig.host.command(CommandCode::RequestRead);
    let report = rig.acquisition.run_once();

    assert_eq!(
        report.last_error,
        Some(NodeError::Timeout {
            subsystem: Subsystem::Impedance,
            bit: 0x02,
            polls: 10
        })
    );
    assert_eq!(rig.acquisition.sweep_phase(), SweepPhase::PollValid);
    assert!(!rig.node.store().is_ready());

    rig.bus.set_impedance_stalled(false);
    rig.host.command(CommandCode::RequestRead);
    assert!(rig.acquisition.run_once().last_error.is_none());
    assert!(rig.node.store().is_ready());
}

/// Sensor bus on which the host issues a command after a set number of
/// further transfers, standing in for a bus interrupt landing mid-pass
#[derive(Clone)]
struct HostInterruptBus {
    bus: SimSensorBus,
    dispatcher: Arc<CommandDispatcher>,
    command: CommandCode,
    countdown: Arc<AtomicUsize>,
}

impl HostInterruptBus {
    fn arm(&self, transfers: usize) {
        self.countdown.store(transfers, Ordering::SeqCst);
    }
}

impl ErrorType for HostInterruptBus {
    type Error = ErrorKind;
}

impl I2c for HostInterruptBus {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        let remaining = self.countdown.load(Ordering::SeqCst);
        if remaining > 0 {
            self.countdown.store(remaining - 1, Ordering::SeqCst);
            if remaining == 1 {
                self.dispatcher.select(self.command);
            }
        }
        self.bus.transaction(address, operations)
    }
}

/// ADC whose conversion is followed by the host asking for another sample
struct RetriggeringAdc {
    adc: SimAdc,
    store: Arc<SharedSampleStore>,
    retriggers: usize,
}

impl EmgAdc for RetriggeringAdc {
    type Error = SimAdcFault;

    fn read_sample(&mut self) -> Result<[u8; 2], Self::Error> {
        let sample = self.adc.read_sample();
        if self.retriggers > 0 {
            self.retriggers -= 1;
            self.store.flags().raise(Flag::Emg);
        }
        sample
    }
}

fn peripherals<I, A>(bus: I, adc: A) -> Peripherals<I, A, SimPin, SimDelay>
where
    I: Clone,
{
    Peripherals {
        impedance_bus: bus.clone(),
        temperature_bus: bus,
        adc,
        sw_1: SimPin::new(),
        sw_2: SimPin::new(),
        sw_ref: SimPin::new(),
        sw_imp: SimPin::new(),
        delay: SimDelay::new(),
    }
}

#[test]
fn test_request_during_pass_is_not_lost() {
    let node = SensorNode::new(NodeConfig::default()).unwrap();
    let bus = HostInterruptBus {
        bus: SimSensorBus::new(),
        dispatcher: Arc::new(CommandDispatcher::new(node.store().clone())),
        command: CommandCode::RequestRead,
        countdown: Arc::new(AtomicUsize::new(0)),
    };
    let (mut acquisition, report) = node.attach(peripherals(bus.clone(), SimAdc::constant(0))).unwrap();
    assert!(report.is_clean());
    let mut host = SimHost::new(node.inbox().clone(), node.bus_task());

    host.command(CommandCode::RequestRead);
    // the second request lands in the middle of the first sweep
    bus.arm(10);
    let pass = acquisition.run_once();
    assert!(pass.request);
    assert!(pass.last_error.is_none());

    assert!(node.store().flags().is_raised(Flag::RequestRead));
    assert_eq!(host.query(CommandCode::ReadReady, 1), vec![0]);

    let pass = acquisition.run_once();
    assert!(pass.request);
    assert!(!node.store().flags().is_raised(Flag::RequestRead));
    assert_eq!(host.query(CommandCode::ReadReady, 1), vec![1]);
}

#[test]
fn test_request_after_pass_starts_fresh() {
    let node = SensorNode::new(NodeConfig::default()).unwrap();
    let bus = HostInterruptBus {
        bus: SimSensorBus::new(),
        dispatcher: Arc::new(CommandDispatcher::new(node.store().clone())),
        command: CommandCode::RequestRead,
        countdown: Arc::new(AtomicUsize::new(0)),
    };
    let (mut acquisition, _report) = node.attach(peripherals(bus, SimAdc::constant(0))).unwrap();
    let mut host = SimHost::new(node.inbox().clone(), node.bus_task());

    host.command(CommandCode::RequestRead);
    acquisition.run_once();
    assert_eq!(host.query(CommandCode::ReadReady, 1), vec![1]);

    host.command(CommandCode::RequestRead);
    assert_eq!(host.query(CommandCode::ReadReady, 1), vec![0]);
    acquisition.run_once();
    assert_eq!(host.query(CommandCode::ReadReady, 1), vec![1]);
}

#[test]
fn test_emg_trigger_during_conversion_runs_next_pass() {
    let node = SensorNode::new(NodeConfig::default()).unwrap();
    let adc = SimAdc::constant(0x0123);
    let retriggering = RetriggeringAdc {
        adc: adc.clone(),
        store: node.store().clone(),
        retriggers: 1,
    };
    let (mut acquisition, _report) = node.attach(peripherals(SimSensorBus::new(), retriggering)).unwrap();
    let mut host = SimHost::new(node.inbox().clone(), node.bus_task());

    host.command(CommandCode::Emg);
    assert!(acquisition.run_once().emg);
    assert_eq!(adc.conversions(), 1);
    assert!(node.store().flags().is_raised(Flag::Emg));

    assert!(acquisition.run_once().emg);
    assert_eq!(adc.conversions(), 2);
    assert!(!node.store().flags().is_raised(Flag::Emg));
    assert!(acquisition.run_once().is_idle());
}

#[test]
fn test_requested_read_without_sensors_stays_unready() {
    let mut rig = rig_with(NodeConfig::default(), |bus| {
        bus.set_impedance_present(false);
        bus.set_temperature_present(false);
    });
    assert!(rig.report.impedance_fault.is_some());
    assert!(rig.report.temperature_fault.is_some());

    rig.host.command(CommandCode::RequestRead);
    let report = rig.acquisition.run_once();

    assert!(report.request);
    assert!(report.last_error.is_none());
    assert!(!rig.node.store().flags().is_raised(Flag::RequestRead));
    assert_eq!(rig.host.query(CommandCode::ReadReady, 1), vec![0]);
}
