// src/acquisition/main_loop.rs
//! Main acquisition loop
//!
//! The only context allowed to block. Each pass applies queued host settings,
//! then services the acquisition flags in a fixed order: EMG, periodic
//! impedance, periodic temperature, host requested read. A flag is taken
//! before its work starts, so a trigger raised while the work runs is
//! serviced by the next pass. Readiness is only reported when the requested
//! read measured something and no newer request arrived meanwhile.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::I2c;
use tracing::{debug, warn};

use crate::acquisition::routing::ElectrodeRouter;
use crate::acquisition::store::{DeviceSetting, Flag, ImpedanceFrame, PeriodKind, SharedSampleStore};
use crate::config::ImpedanceSettings;
use crate::drivers::ad5933::{Ad5933, ImpedanceSample, SweepController, SweepPhase};
use crate::drivers::max30205::Max30205;
use crate::error::{NodeError, NodeResult};
use crate::hal::{EmgAdc, RoutingState, Subsystem};

/// What one pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub emg: bool,
    pub impedance: bool,
    pub temperature: bool,
    pub request: bool,
    pub settings_applied: usize,
    pub last_error: Option<NodeError>,
}

impl PassReport {
    /// Nothing was pending
    pub fn is_idle(&self) -> bool {
        !(self.emg || self.impedance || self.temperature || self.request) && self.settings_applied == 0
    }

    fn record(&mut self, err: NodeError) {
        warn!(%err, "acquisition step failed");
        self.last_error = Some(err);
    }
}

pub struct AcquisitionLoop<I, A, P, D> {
    store: Arc<SharedSampleStore>,
    impedance: Option<Ad5933<I>>,
    temperature: Option<Max30205<I>>,
    adc: A,
    router: ElectrodeRouter<P>,
    delay: D,
    sweep: SweepController,
    sweep_attempts: u32,
    switch_settle_us: u32,
}

impl<I, A, P, D> AcquisitionLoop<I, A, P, D>
where
    I: I2c,
    A: EmgAdc,
    P: OutputPin,
    D: DelayNs,
{
    /// Absent chips are passed as `None` and their work is skipped
    pub fn new(
        store: Arc<SharedSampleStore>,
        impedance: Option<Ad5933<I>>,
        temperature: Option<Max30205<I>>,
        adc: A,
        router: ElectrodeRouter<P>,
        delay: D,
        settings: &ImpedanceSettings,
    ) -> Self {
        Self {
            store,
            impedance,
            temperature,
            adc,
            router,
            delay,
            sweep: SweepController::new(settings.poll_budget),
            sweep_attempts: settings.sweep_attempts.max(1),
            switch_settle_us: settings.switch_settle_us,
        }
    }

    pub fn store(&self) -> &Arc<SharedSampleStore> {
        &self.store
    }

    pub fn router(&self) -> &ElectrodeRouter<P> {
        &self.router
    }

    pub fn impedance_chip(&mut self) -> Option<&mut Ad5933<I>> {
        self.impedance.as_mut()
    }

    /// Sweep phase reached by the most recent impedance run
    pub fn sweep_phase(&self) -> SweepPhase {
        self.sweep.phase()
    }

    /// Loop until `running` is cleared
    pub fn run(&mut self, running: &AtomicBool) {
        while running.load(Ordering::Acquire) {
            if self.run_once().is_idle() {
                std::hint::spin_loop();
            }
        }
    }

    /// One pass over the pending work
    pub fn run_once(&mut self) -> PassReport {
        let mut report = PassReport::default();
        self.apply_settings(&mut report);

        let store = Arc::clone(&self.store);
        let flags = store.flags();

        if flags.take(Flag::Emg) {
            report.emg = true;
            if let Err(err) = self.sample_emg() {
                report.record(err);
            }
        }

        if flags.take(Flag::Impedance) {
            report.impedance = true;
            if self.impedance.is_some() {
                match self.impedance_pass(RoutingState::PERIODIC_PAIR_1, RoutingState::PERIODIC_PAIR_2) {
                    Ok(frame) => self.store.publish_impedance(frame),
                    Err(err) => report.record(err),
                }
            }
        }

        if flags.take(Flag::Temperature) {
            report.temperature = true;
            if self.temperature.is_some() {
                if let Err(err) = self.read_temperature() {
                    report.record(err);
                }
            }
        }

        if flags.take(Flag::RequestRead) {
            report.request = true;
            // the requested pass covers periodic work that is already due
            flags.clear(Flag::Impedance);
            flags.clear(Flag::Temperature);

            let mut complete = true;
            let mut measured = false;
            if self.impedance.is_some() {
                match self.impedance_pass(RoutingState::REQUESTED_PAIR_1, RoutingState::REQUESTED_PAIR_2) {
                    Ok(frame) => {
                        self.store.publish_impedance(frame);
                        measured = true;
                    }
                    Err(err) => {
                        complete = false;
                        report.record(err);
                    }
                }
            }
            if self.temperature.is_some() {
                match self.read_temperature() {
                    Ok(()) => measured = true,
                    Err(err) => {
                        complete = false;
                        report.record(err);
                    }
                }
            }

            if !(complete && measured) {
                debug!(complete, measured, "requested read left unready");
            } else if self.store.complete_request() {
                debug!("requested read complete");
            } else {
                debug!("requested read superseded by a newer request");
            }
        }

        report
    }

    fn apply_settings(&mut self, report: &mut PassReport) {
        while let Some(setting) = self.store.next_setting() {
            report.settings_applied += 1;
            let result = match setting {
                DeviceSetting::OutputRange(range) => match self.impedance.as_mut() {
                    Some(chip) => chip.set_output_range(range).map_err(NodeError::from),
                    None => Err(NodeError::Disabled { subsystem: Subsystem::Impedance }),
                },
                DeviceSetting::PgaGain(gain) => match self.impedance.as_mut() {
                    Some(chip) => chip.set_pga_gain(gain).map_err(NodeError::from),
                    None => Err(NodeError::Disabled { subsystem: Subsystem::Impedance }),
                },
                DeviceSetting::ReferenceSwitch(closed) => {
                    self.router.set_reference(closed).map_err(|_| NodeError::Routing)
                }
            };
            match result {
                Ok(()) => debug!(?setting, "device setting applied"),
                Err(NodeError::Disabled { subsystem }) => debug!(?setting, %subsystem, "setting dropped"),
                Err(err) => report.record(err),
            }
        }
    }

    fn sample_emg(&mut self) -> NodeResult<()> {
        let settle_us = u32::from(self.store.periods().get(PeriodKind::Emg));
        self.delay.delay_us(settle_us);
        let sample = self.adc.read_sample().map_err(|err| {
            debug!(?err, "EMG conversion error");
            NodeError::Adc
        })?;
        self.store.publish_emg(sample);
        Ok(())
    }

    fn read_temperature(&mut self) -> NodeResult<()> {
        let sensor = self
            .temperature
            .as_mut()
            .ok_or(NodeError::Disabled { subsystem: Subsystem::Temperature })?;
        let reading = sensor.read_temperature()?;
        self.store.publish_temperature(reading.raw);
        Ok(())
    }

    /// Measure both pairs and put the electrodes back on the EMG front end.
    /// The frame is only returned if both pairs succeeded.
    fn impedance_pass(&mut self, pair_1: RoutingState, pair_2: RoutingState) -> NodeResult<ImpedanceFrame> {
        let outcome = self
            .measure_pair(pair_1)
            .and_then(|first| self.measure_pair(pair_2).map(|second| ImpedanceFrame::from_pairs(first, second)));
        let restored = self
            .router
            .apply(RoutingState::EMG_PASSTHROUGH)
            .map_err(|_| NodeError::Routing);
        let frame = outcome?;
        restored?;
        Ok(frame)
    }

    fn measure_pair(&mut self, routing: RoutingState) -> NodeResult<ImpedanceSample> {
        self.router.apply(routing).map_err(|_| NodeError::Routing)?;
        if self.switch_settle_us > 0 {
            self.delay.delay_us(self.switch_settle_us);
        }

        let chip = self
            .impedance
            .as_mut()
            .ok_or(NodeError::Disabled { subsystem: Subsystem::Impedance })?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sweep.run(chip) {
                Ok(sample) => return Ok(sample),
                Err(err) => {
                    let err = NodeError::from(err);
                    if attempt >= self.sweep_attempts || !err.is_transient() {
                        return Err(err);
                    }
                    warn!(attempt, %err, "impedance sweep failed, retrying");
                }
            }
        }
    }
}
