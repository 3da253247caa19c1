// src/protocol/dispatcher.rs
//! Command table and dispatch
//!
//! Every command code maps to a [`CommandDescriptor`]: what to serve if the
//! host reads next, what to do the moment the code arrives, and which setting
//! takes the value if the host writes next. The protocol engine only consults
//! the descriptor; it holds no per-command logic.

use std::sync::Arc;

use tracing::debug;

use crate::acquisition::store::{DeviceSetting, Flag, ImpedanceView, PeriodKind, SharedSampleStore};
use crate::config::constants::protocol::{PERIOD_RESPONSE_LEN, TX_BUFFER_MAX_LEN};
use crate::drivers::ad5933::{OutputRange, PgaGain};
use crate::protocol::command::CommandCode;
use crate::utils::format_decimal;

/// Buffer served on the next host read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxSource {
    Emg,
    Impedance(ImpedanceView),
    Temperature,
    /// Period formatted as decimal ASCII
    Period(PeriodKind),
    Readiness,
}

impl TxSource {
    pub const fn len(self) -> usize {
        match self {
            TxSource::Emg | TxSource::Temperature => 2,
            TxSource::Impedance(view) => view.len(),
            TxSource::Period(_) => PERIOD_RESPONSE_LEN,
            TxSource::Readiness => 1,
        }
    }
}

/// Side effect performed as soon as the command byte is received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectEffect {
    TriggerEmg,
    ClearReadiness,
    RequestRead,
    StopPeriodic,
    StartPeriodic,
}

/// Destination of a 16-bit value written after the command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetterTarget {
    Period(PeriodKind),
    OutputRange,
    PgaGain,
    ReferenceSwitch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandDescriptor {
    pub source: Option<TxSource>,
    pub effect: Option<SelectEffect>,
    pub setter: Option<SetterTarget>,
}

impl CommandDescriptor {
    const fn new(source: Option<TxSource>, effect: Option<SelectEffect>, setter: Option<SetterTarget>) -> Self {
        Self { source, effect, setter }
    }

    pub const fn response_len(&self) -> usize {
        match self.source {
            Some(source) => source.len(),
            None => 0,
        }
    }

    /// Whether a second transaction is expected for this command
    pub const fn awaits_data(&self) -> bool {
        self.source.is_some() || self.setter.is_some()
    }
}

/// The command table
pub const fn describe(code: CommandCode) -> CommandDescriptor {
    use CommandCode::*;
    match code {
        Emg => CommandDescriptor::new(Some(TxSource::Emg), Some(SelectEffect::TriggerEmg), None),
        Imp1Real => CommandDescriptor::new(Some(TxSource::Impedance(ImpedanceView::Pair1Real)), None, None),
        Imp1Imaginary => CommandDescriptor::new(Some(TxSource::Impedance(ImpedanceView::Pair1Imaginary)), None, None),
        Imp2Real => CommandDescriptor::new(Some(TxSource::Impedance(ImpedanceView::Pair2Real)), None, None),
        Imp2Imaginary => CommandDescriptor::new(Some(TxSource::Impedance(ImpedanceView::Pair2Imaginary)), None, None),
        ImpAll => CommandDescriptor::new(
            Some(TxSource::Impedance(ImpedanceView::All)),
            Some(SelectEffect::ClearReadiness),
            None,
        ),
        Temperature => CommandDescriptor::new(Some(TxSource::Temperature), None, None),
        EmgPeriod => CommandDescriptor::new(
            Some(TxSource::Period(PeriodKind::Emg)),
            None,
            Some(SetterTarget::Period(PeriodKind::Emg)),
        ),
        ImpPeriod => CommandDescriptor::new(
            Some(TxSource::Period(PeriodKind::Impedance)),
            None,
            Some(SetterTarget::Period(PeriodKind::Impedance)),
        ),
        TempPeriod => CommandDescriptor::new(
            Some(TxSource::Period(PeriodKind::Temperature)),
            None,
            Some(SetterTarget::Period(PeriodKind::Temperature)),
        ),
        RequestRead => CommandDescriptor::new(None, Some(SelectEffect::RequestRead), None),
        ReadReady => CommandDescriptor::new(Some(TxSource::Readiness), None, None),
        StopPeriodic => CommandDescriptor::new(None, Some(SelectEffect::StopPeriodic), None),
        StartPeriodic => CommandDescriptor::new(None, Some(SelectEffect::StartPeriodic), None),
        SetOutputRange => CommandDescriptor::new(None, None, Some(SetterTarget::OutputRange)),
        SetPgaGain => CommandDescriptor::new(None, None, Some(SetterTarget::PgaGain)),
        SetReferenceSwitch => CommandDescriptor::new(None, None, Some(SetterTarget::ReferenceSwitch)),
    }
}

/// Applies command effects and setters to the shared store
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    store: Arc<SharedSampleStore>,
}

impl CommandDispatcher {
    pub fn new(store: Arc<SharedSampleStore>) -> Self {
        Self { store }
    }

    /// Run the immediate effect of `code` and return its descriptor
    pub fn select(&self, code: CommandCode) -> CommandDescriptor {
        let descriptor = describe(code);
        if let Some(effect) = descriptor.effect {
            self.perform(effect);
        }
        debug!(?code, ?descriptor, "command selected");
        descriptor
    }

    fn perform(&self, effect: SelectEffect) {
        let store = &self.store;
        match effect {
            SelectEffect::TriggerEmg => store.flags().raise(Flag::Emg),
            SelectEffect::ClearReadiness => store.set_ready(false),
            // raising the request also clears readiness
            SelectEffect::RequestRead => store.flags().raise(Flag::RequestRead),
            SelectEffect::StopPeriodic => store.control().stop_periodic(),
            SelectEffect::StartPeriodic => store.control().start_periodic(),
        }
    }

    /// Snapshot `source` into `out`; returns the response length
    pub fn load(&self, source: TxSource, out: &mut [u8; TX_BUFFER_MAX_LEN]) -> usize {
        let len = source.len();
        match source {
            TxSource::Emg => out[..2].copy_from_slice(&self.store.emg()),
            TxSource::Impedance(view) => out[..len].copy_from_slice(self.store.impedance().view(view)),
            TxSource::Temperature => out[..2].copy_from_slice(&self.store.temperature()),
            TxSource::Period(kind) => {
                format_decimal(self.store.periods().get(kind), &mut out[..len]);
            }
            TxSource::Readiness => out[0] = u8::from(self.store.is_ready()),
        }
        len
    }

    /// Apply a host value; values outside a setting's domain are dropped
    pub fn apply(&self, target: SetterTarget, value: u16) {
        let setting = match target {
            SetterTarget::Period(kind) => {
                let stored = self.store.periods().set(kind, value);
                debug!(?kind, stored, "period updated");
                return;
            }
            SetterTarget::OutputRange => OutputRange::from_selector(value).map(DeviceSetting::OutputRange),
            SetterTarget::PgaGain => PgaGain::from_factor(value).map(DeviceSetting::PgaGain),
            SetterTarget::ReferenceSwitch => Some(DeviceSetting::ReferenceSwitch(value != 0)),
        };
        match setting {
            Some(setting) => {
                self.store.queue_setting(setting);
            }
            None => debug!(?target, value, "setter value ignored"),
        }
    }
}
