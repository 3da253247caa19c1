// src/acquisition/scheduler.rs
//! Millisecond scheduler
//!
//! Runs in the tick context. Every tick advances the phase counters, raises the
//! periodic acquisition flags in the store and reports which indicators to
//! toggle. Nothing here blocks or touches a bus.

use std::sync::Arc;

use embedded_hal::digital::StatefulOutputPin;
use tracing::{debug, trace};

use crate::acquisition::store::{Flag, PeriodKind, PhaseReset, SharedSampleStore};
use crate::config::SchedulerSettings;
use crate::hal::Subsystem;

/// Counter that fires once every `period` advances.
///
/// The period is latched when an epoch starts, so a change only applies to the
/// next epoch. A period of zero never fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseCounter {
    count: u16,
    period: u16,
}

impl PhaseCounter {
    pub fn new(period: u16) -> Self {
        Self { count: 0, period }
    }

    /// Start a fresh epoch with `count` ticks already elapsed
    pub fn seed(&mut self, count: u16, period: u16) {
        self.period = period;
        self.count = if period == 0 { 0 } else { count.min(period - 1) };
    }

    /// Advance one tick; `next_period` is latched if this tick ends the epoch
    pub fn advance(&mut self, next_period: u16) -> bool {
        if self.period == 0 {
            // idle until a period is configured
            self.period = next_period;
            return false;
        }
        self.count += 1;
        if self.count >= self.period {
            self.count = 0;
            self.period = next_period;
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    pub fn period(&self) -> u16 {
        self.period
    }
}

/// What one tick produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickEvents {
    pub heartbeat: bool,
    pub impedance_absent: bool,
    pub temperature_absent: bool,
    pub impedance_due: bool,
    pub temperature_due: bool,
}

impl TickEvents {
    pub fn any(&self) -> bool {
        self.heartbeat || self.impedance_absent || self.temperature_absent || self.impedance_due || self.temperature_due
    }
}

pub struct Scheduler {
    store: Arc<SharedSampleStore>,
    in_phase: bool,
    indicator_period: u16,
    heartbeat: PhaseCounter,
    impedance_absent: PhaseCounter,
    temperature_absent: PhaseCounter,
    impedance: PhaseCounter,
    temperature: PhaseCounter,
    ticks: u64,
}

impl Scheduler {
    /// `in_phase` is true on the canonical node, whose acquisition counters
    /// start at zero; every other node starts half a period in.
    pub fn new(store: Arc<SharedSampleStore>, settings: &SchedulerSettings, in_phase: bool) -> Self {
        let mut scheduler = Self {
            store,
            in_phase,
            indicator_period: settings.indicator_period_ms,
            heartbeat: PhaseCounter::new(settings.heartbeat_period_ms),
            impedance_absent: PhaseCounter::new(settings.indicator_period_ms),
            temperature_absent: PhaseCounter::new(settings.indicator_period_ms),
            impedance: PhaseCounter::default(),
            temperature: PhaseCounter::default(),
            ticks: 0,
        };
        scheduler.reseed(PhaseReset::Identity);
        scheduler
    }

    fn reseed(&mut self, reset: PhaseReset) {
        let periods = self.store.periods();
        let impedance = periods.get(PeriodKind::Impedance);
        let temperature = periods.get(PeriodKind::Temperature);
        let offset = |period: u16| match reset {
            PhaseReset::Identity if !self.in_phase => period / 2,
            _ => 0,
        };
        let (impedance_offset, temperature_offset) = (offset(impedance), offset(temperature));
        self.impedance.seed(impedance_offset, impedance);
        self.temperature.seed(temperature_offset, temperature);
        debug!(?reset, impedance_offset, temperature_offset, "acquisition counters seeded");
    }

    /// One millisecond elapsed
    pub fn tick(&mut self) -> TickEvents {
        self.ticks += 1;
        if let Some(reset) = self.store.control().take_phase_reset() {
            self.reseed(reset);
        }

        let mut events = TickEvents {
            heartbeat: self.heartbeat.advance(self.heartbeat.period()),
            ..TickEvents::default()
        };

        let control = self.store.control();
        let periods = self.store.periods();
        let flags = self.store.flags();

        if control.is_periodic(Subsystem::Impedance) {
            if self.impedance.advance(periods.get(PeriodKind::Impedance)) {
                flags.raise(Flag::Impedance);
                events.impedance_due = true;
            }
        } else {
            events.impedance_absent = self.impedance_absent.advance(self.indicator_period);
        }

        if control.is_periodic(Subsystem::Temperature) {
            if self.temperature.advance(periods.get(PeriodKind::Temperature)) {
                flags.raise(Flag::Temperature);
                events.temperature_due = true;
            }
        } else {
            events.temperature_absent = self.temperature_absent.advance(self.indicator_period);
        }

        if events.any() {
            trace!(tick = self.ticks, ?events, "scheduler events");
        }
        events
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn impedance_counter(&self) -> PhaseCounter {
        self.impedance
    }

    pub fn temperature_counter(&self) -> PhaseCounter {
        self.temperature
    }
}

/// Heartbeat and subsystem-absent indicator LEDs
pub struct IndicatorLeds<P> {
    pub heartbeat: P,
    pub impedance_absent: P,
    pub temperature_absent: P,
}

impl<P: StatefulOutputPin> IndicatorLeds<P> {
    pub fn apply(&mut self, events: &TickEvents) -> Result<(), P::Error> {
        if events.heartbeat {
            self.heartbeat.toggle()?;
        }
        if events.impedance_absent {
            self.impedance_absent.toggle()?;
        }
        if events.temperature_absent {
            self.temperature_absent.toggle()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeriodSettings;

    fn store_with(impedance_ms: u16, temperature_ms: u16) -> Arc<SharedSampleStore> {
        let periods = PeriodSettings {
            impedance_ms,
            temperature_ms,
            ..PeriodSettings::default()
        };
        let store = Arc::new(SharedSampleStore::new(&periods));
        store.control().set_present(Subsystem::Impedance, true);
        store.control().set_present(Subsystem::Temperature, true);
        store
    }

    fn fire_ticks(scheduler: &mut Scheduler, ticks: u32) -> Vec<u32> {
        (1..=ticks).filter(|_| scheduler.tick().impedance_due).collect()
    }

    #[test]
    fn test_counter_fires_every_period() {
        let mut counter = PhaseCounter::new(3);
        let fired: Vec<bool> = (0..7).map(|_| counter.advance(3)).collect();
        assert_eq!(fired, vec![false, false, true, false, false, true, false]);
    }

    #[test]
    fn test_counter_latches_period() {
        let mut counter = PhaseCounter::new(4);
        assert!(!counter.advance(2));
        assert!(!counter.advance(2));
        assert!(!counter.advance(2));
        // epoch in progress still needs four ticks
        assert!(counter.advance(2));
        assert_eq!(counter.period(), 2);
        assert!(!counter.advance(2));
        assert!(counter.advance(2));
    }

    #[test]
    fn test_zero_period_never_fires() {
        let mut counter = PhaseCounter::new(0);
        assert!((0..100).all(|_| !counter.advance(0)));
    }

    #[test]
    fn test_canonical_node_starts_in_phase() {
        let store = store_with(10, 10);
        let mut scheduler = Scheduler::new(store.clone(), &SchedulerSettings::default(), true);
        let mut first = None;
        for tick in 1..=20u32 {
            if scheduler.tick().impedance_due {
                first.get_or_insert(tick);
            }
        }
        assert_eq!(first, Some(10));
        assert!(store.flags().is_raised(Flag::Impedance));
        assert!(store.flags().is_raised(Flag::Temperature));
    }

    #[test]
    fn test_other_nodes_start_half_period_late() {
        let store = store_with(10, 10);
        let mut scheduler = Scheduler::new(store, &SchedulerSettings::default(), false);
        let mut ticks = Vec::new();
        for tick in 1..=25u32 {
            if scheduler.tick().impedance_due {
                ticks.push(tick);
            }
        }
        assert_eq!(ticks, vec![5, 15, 25]);
    }

    #[test]
    fn test_mid_cycle_period_change_applies_next_epoch() {
        let store = store_with(10, 0);
        let mut scheduler = Scheduler::new(store.clone(), &SchedulerSettings::default(), true);
        let mut ticks = Vec::new();
        for tick in 1..=16u32 {
            if tick == 4 {
                store.periods().set(PeriodKind::Impedance, 3);
            }
            if scheduler.tick().impedance_due {
                ticks.push(tick);
            }
        }
        assert_eq!(ticks, vec![10, 13, 16]);
    }

    #[test]
    fn test_disabled_subsystem_blinks_indicator() {
        let store = store_with(10, 10);
        store.control().set_present(Subsystem::Impedance, false);
        let settings = SchedulerSettings {
            heartbeat_period_ms: 4,
            indicator_period_ms: 2,
        };
        let mut scheduler = Scheduler::new(store.clone(), &settings, true);

        let events: Vec<TickEvents> = (0..4).map(|_| scheduler.tick()).collect();
        assert!(events[1].impedance_absent && events[3].impedance_absent);
        assert!(events.iter().all(|e| !e.temperature_absent && !e.impedance_due));
        assert!(events[3].heartbeat && !events[1].heartbeat);
        assert!(!store.flags().is_raised(Flag::Impedance));
    }

    #[test]
    fn test_stop_and_start_reseed() {
        let store = store_with(10, 10);
        let mut scheduler = Scheduler::new(store.clone(), &SchedulerSettings::default(), false);
        assert_eq!(scheduler.impedance_counter().count(), 5);

        store.control().stop_periodic();
        scheduler.tick();
        assert_eq!(scheduler.impedance_counter().count(), 0);
        assert_eq!(fire_ticks(&mut scheduler, 30), Vec::<u32>::new());

        store.control().start_periodic();
        scheduler.tick();
        assert_eq!(scheduler.impedance_counter().count(), 6);
    }
}
