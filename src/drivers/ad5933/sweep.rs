//! Single-point sweep state machine
//!
//! One run walks the chip through standby, start-frequency initialisation, the
//! sweep start, the data-valid poll, the result read, the mandatory frequency
//! increment, the sweep-complete poll and back to standby. A failed transfer
//! stops the walk where it is; the chip is left as the failing step found it.

use embedded_hal::i2c::I2c;
use tracing::{debug, warn};

use super::registers::status;
use super::{Ad5933, Ad5933Error, ControlMode, PowerMode};

/// Position of the controller in the sweep protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepPhase {
    #[default]
    Standby,
    InitStartFrequency,
    StartSweep,
    PollValid,
    ReadSample,
    Increment,
    PollDone,
    FinalStandby,
    Complete,
}

/// Raw real and imaginary result registers, most significant byte first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImpedanceSample {
    pub real: [u8; 2],
    pub imaginary: [u8; 2],
}

impl ImpedanceSample {
    pub fn from_parts(real: i16, imaginary: i16) -> Self {
        Self {
            real: real.to_be_bytes(),
            imaginary: imaginary.to_be_bytes(),
        }
    }

    pub fn real_part(&self) -> i16 {
        i16::from_be_bytes(self.real)
    }

    pub fn imaginary_part(&self) -> i16 {
        i16::from_be_bytes(self.imaginary)
    }

    /// Uncalibrated response magnitude
    pub fn magnitude(&self) -> f64 {
        f64::from(self.real_part()).hypot(f64::from(self.imaginary_part()))
    }
}

/// Drives one acquisition through the chip's polling protocol
#[derive(Debug, Clone)]
pub struct SweepController {
    poll_budget: u32,
    phase: SweepPhase,
}

impl SweepController {
    /// `poll_budget` bounds each status poll; zero polls forever
    pub fn new(poll_budget: u32) -> Self {
        Self {
            poll_budget,
            phase: SweepPhase::Standby,
        }
    }

    pub fn poll_budget(&self) -> u32 {
        self.poll_budget
    }

    /// Phase of the last run. After a failure this is the step that failed.
    pub fn phase(&self) -> SweepPhase {
        self.phase
    }

    pub fn run<I: I2c>(&mut self, chip: &mut Ad5933<I>) -> Result<ImpedanceSample, Ad5933Error<I::Error>> {
        self.phase = SweepPhase::Standby;
        let mut sample = ImpedanceSample::default();

        loop {
            let next = self.step(chip, &mut sample).inspect_err(|err| {
                warn!(phase = ?self.phase, %err, "impedance sweep aborted");
            })?;
            self.phase = next;
            if next == SweepPhase::Complete {
                debug!(real = sample.real_part(), imaginary = sample.imaginary_part(), "impedance sweep complete");
                return Ok(sample);
            }
        }
    }

    fn step<I: I2c>(
        &self,
        chip: &mut Ad5933<I>,
        sample: &mut ImpedanceSample,
    ) -> Result<SweepPhase, Ad5933Error<I::Error>> {
        let next = match self.phase {
            SweepPhase::Standby => {
                chip.set_power_mode(PowerMode::Standby)?;
                SweepPhase::InitStartFrequency
            }
            SweepPhase::InitStartFrequency => {
                chip.set_control_mode(ControlMode::InitStartFrequency)?;
                SweepPhase::StartSweep
            }
            SweepPhase::StartSweep => {
                chip.set_control_mode(ControlMode::StartFrequencySweep)?;
                SweepPhase::PollValid
            }
            SweepPhase::PollValid => {
                let polls = chip.poll_status(status::DATA_VALID, self.poll_budget)?;
                debug!(polls, "impedance data valid");
                SweepPhase::ReadSample
            }
            SweepPhase::ReadSample => {
                *sample = chip.read_result()?;
                SweepPhase::Increment
            }
            // the chip will not flag completion without an increment, even at 0 Hz
            SweepPhase::Increment => {
                chip.set_control_mode(ControlMode::IncrementFrequency)?;
                SweepPhase::PollDone
            }
            SweepPhase::PollDone => {
                chip.poll_status(status::SWEEP_COMPLETE, self.poll_budget)?;
                SweepPhase::FinalStandby
            }
            SweepPhase::FinalStandby => {
                chip.set_power_mode(PowerMode::Standby)?;
                SweepPhase::Complete
            }
            SweepPhase::Complete => SweepPhase::Complete,
        };
        Ok(next)
    }
}

#[cfg(all(test, feature = "simulation"))]
mod tests {
    use super::*;
    use crate::config::ImpedanceSettings;
    use crate::drivers::ad5933::registers::control;
    use crate::hal::simulator::SimSensorBus;

    fn attached() -> (Ad5933<SimSensorBus>, SimSensorBus) {
        let bus = SimSensorBus::new();
        let mut chip = Ad5933::new(bus.clone());
        chip.configure(&ImpedanceSettings::default()).unwrap();
        bus.clear_mode_history();
        (chip, bus)
    }

    #[test]
    fn test_run_returns_queued_result() {
        let (mut chip, bus) = attached();
        bus.queue_impedance_result(1234, -567);

        let mut sweep = SweepController::new(100);
        let sample = sweep.run(&mut chip).unwrap();

        assert_eq!(sample.real_part(), 1234);
        assert_eq!(sample.imaginary_part(), -567);
        assert_eq!(sweep.phase(), SweepPhase::Complete);
    }

    #[test]
    fn test_control_mode_order() {
        let (mut chip, bus) = attached();
        let mut sweep = SweepController::new(100);
        sweep.run(&mut chip).unwrap();

        assert_eq!(
            bus.mode_history(),
            vec![
                control::STANDBY_MODE,
                control::INIT_START_FREQUENCY,
                control::START_FREQUENCY_SWEEP,
                control::INCREMENT_FREQUENCY,
                control::STANDBY_MODE,
            ]
        );
    }

    #[test]
    fn test_transport_failure_skips_final_standby() {
        let (mut chip, bus) = attached();
        // each mode change is a read-modify-write of both control bytes, six
        // transfers; fail the first status poll after standby, init and start
        bus.fail_transfers(18, 1);

        let mut sweep = SweepController::new(100);
        let err = sweep.run(&mut chip).unwrap_err();

        assert!(matches!(err, Ad5933Error::Bus(_)));
        assert_eq!(sweep.phase(), SweepPhase::PollValid);
        assert_eq!(
            bus.mode_history(),
            vec![control::STANDBY_MODE, control::INIT_START_FREQUENCY, control::START_FREQUENCY_SWEEP]
        );
    }

    #[test]
    fn test_stalled_chip_times_out() {
        let (mut chip, bus) = attached();
        bus.set_impedance_stalled(true);

        let mut sweep = SweepController::new(25);
        let err = sweep.run(&mut chip).unwrap_err();

        assert_eq!(err, Ad5933Error::Timeout { bit: status::DATA_VALID, polls: 25 });
        assert_eq!(sweep.phase(), SweepPhase::PollValid);
    }

    #[test]
    fn test_slow_chip_within_budget() {
        let (mut chip, bus) = attached();
        bus.set_impedance_latency(10);
        let mut sweep = SweepController::new(11);
        assert!(sweep.run(&mut chip).is_ok());
    }

    #[test]
    fn test_sample_helpers() {
        let sample = ImpedanceSample::from_parts(3, -4);
        assert_eq!(sample.real, [0x00, 0x03]);
        assert_eq!(sample.imaginary, [0xFF, 0xFC]);
        assert!((sample.magnitude() - 5.0).abs() < f64::EPSILON);
    }
}
