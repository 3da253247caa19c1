// src/acquisition/store.rs
//! Shared sample store
//!
//! The blackboard between the three execution contexts. Only the main loop
//! publishes samples; the protocol task reads them while serving the host and
//! writes periods, triggers and queued device settings; the tick context reads
//! periods and raises acquisition flags.
//!
//! Every sample buffer is published as one whole value through an
//! [`AtomicCell`], so a reader sees either the previous or the next value and
//! never a mix. Flags and periods are plain atomics.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};

use crossbeam::atomic::AtomicCell;
use crossbeam::queue::ArrayQueue;
use tracing::{debug, warn};

use crate::config::constants::{impedance, periods, protocol};
use crate::config::PeriodSettings;
use crate::drivers::ad5933::{ImpedanceSample, OutputRange, PgaGain};
use crate::hal::Subsystem;

/// Two-byte sample buffer (EMG conversion, temperature register)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C, align(2))]
pub struct SampleWord(pub [u8; 2]);

/// Sub-range of the impedance frame served by one command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImpedanceView {
    Pair1Real,
    Pair1Imaginary,
    Pair2Real,
    Pair2Imaginary,
    All,
}

impl ImpedanceView {
    /// `(offset, len)` inside the frame
    pub const fn range(self) -> (usize, usize) {
        match self {
            ImpedanceView::Pair1Real => (0, 2),
            ImpedanceView::Pair1Imaginary => (2, 2),
            ImpedanceView::Pair2Real => (4, 2),
            ImpedanceView::Pair2Imaginary => (6, 2),
            ImpedanceView::All => (0, ImpedanceFrame::LEN),
        }
    }

    pub const fn len(self) -> usize {
        self.range().1
    }
}

/// Results of both electrode pairs from one acquisition pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C, align(8))]
pub struct ImpedanceFrame {
    bytes: [u8; 8],
}

impl ImpedanceFrame {
    pub const LEN: usize = 8;

    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self { bytes }
    }

    pub fn from_pairs(pair_1: ImpedanceSample, pair_2: ImpedanceSample) -> Self {
        let mut bytes = [0u8; 8];
        bytes[0..2].copy_from_slice(&pair_1.real);
        bytes[2..4].copy_from_slice(&pair_1.imaginary);
        bytes[4..6].copy_from_slice(&pair_2.real);
        bytes[6..8].copy_from_slice(&pair_2.imaginary);
        Self { bytes }
    }

    /// Frame served before the first sweep. Placeholder words are stored low
    /// byte first.
    pub fn placeholder() -> Self {
        let words = [
            impedance::PLACEHOLDER_PAIR_1_REAL,
            impedance::PLACEHOLDER_PAIR_1_IMAGINARY,
            impedance::PLACEHOLDER_PAIR_2_REAL,
            impedance::PLACEHOLDER_PAIR_2_IMAGINARY,
        ];
        let mut bytes = [0u8; 8];
        for (chunk, word) in bytes.chunks_exact_mut(2).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8; 8] {
        &self.bytes
    }

    pub fn view(&self, view: ImpedanceView) -> &[u8] {
        let (offset, len) = view.range();
        &self.bytes[offset..offset + len]
    }

    pub fn pair(&self, index: usize) -> Option<ImpedanceSample> {
        let base = match index {
            1 => 0,
            2 => 4,
            _ => return None,
        };
        Some(ImpedanceSample {
            real: [self.bytes[base], self.bytes[base + 1]],
            imaginary: [self.bytes[base + 2], self.bytes[base + 3]],
        })
    }
}

/// One-shot acquisition triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Sample the EMG converter
    Emg,
    /// Periodic impedance pass
    Impedance,
    /// Periodic temperature read
    Temperature,
    /// Host requested impedance + temperature pass
    RequestRead,
}

const REQUEST_PENDING: u8 = 0b01;
const RESULTS_READY: u8 = 0b10;

/// Acquisition triggers plus the host readiness bit.
///
/// The requested-read trigger and readiness share one word: raising a request
/// clears readiness, and readiness can only be set while no request is pending.
#[derive(Debug, Default)]
pub struct AcquisitionFlags {
    emg: AtomicBool,
    impedance: AtomicBool,
    temperature: AtomicBool,
    request: AtomicU8,
}

impl AcquisitionFlags {
    fn cell(&self, flag: Flag) -> Option<&AtomicBool> {
        match flag {
            Flag::Emg => Some(&self.emg),
            Flag::Impedance => Some(&self.impedance),
            Flag::Temperature => Some(&self.temperature),
            Flag::RequestRead => None,
        }
    }

    pub fn raise(&self, flag: Flag) {
        match self.cell(flag) {
            Some(cell) => cell.store(true, Ordering::Release),
            None => {
                let _ = self.request.fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                    Some((state | REQUEST_PENDING) & !RESULTS_READY)
                });
            }
        }
    }

    pub fn is_raised(&self, flag: Flag) -> bool {
        match self.cell(flag) {
            Some(cell) => cell.load(Ordering::Acquire),
            None => self.request.load(Ordering::Acquire) & REQUEST_PENDING != 0,
        }
    }

    pub fn clear(&self, flag: Flag) {
        self.take(flag);
    }

    /// Clear a flag and report whether it was raised. A trigger raised after
    /// this call survives for the next pass.
    pub fn take(&self, flag: Flag) -> bool {
        match self.cell(flag) {
            Some(cell) => cell.swap(false, Ordering::AcqRel),
            None => self.request.fetch_and(!REQUEST_PENDING, Ordering::AcqRel) & REQUEST_PENDING != 0,
        }
    }

    fn is_ready(&self) -> bool {
        self.request.load(Ordering::Acquire) & RESULTS_READY != 0
    }

    fn set_ready(&self, ready: bool) {
        if ready {
            self.request.fetch_or(RESULTS_READY, Ordering::AcqRel);
        } else {
            self.request.fetch_and(!RESULTS_READY, Ordering::AcqRel);
        }
    }

    /// Set readiness unless a newer request is pending
    fn complete_request(&self) -> bool {
        self.request
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state & REQUEST_PENDING == 0).then_some(state | RESULTS_READY)
            })
            .is_ok()
    }
}

/// Runtime-adjustable periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodKind {
    /// Legacy EMG interval in microseconds, used as the pre-conversion settle delay
    Emg,
    /// Impedance acquisition period in milliseconds
    Impedance,
    /// Temperature acquisition period in milliseconds
    Temperature,
}

/// Periods written by the host, read by the tick context. Each value is a
/// single 16-bit atomic so it can never be observed torn.
#[derive(Debug)]
pub struct PeriodConfig {
    emg_us: AtomicU16,
    impedance_ms: AtomicU16,
    temperature_ms: AtomicU16,
}

impl PeriodConfig {
    pub fn new(settings: &PeriodSettings) -> Self {
        Self {
            emg_us: AtomicU16::new(settings.emg_us.min(periods::MAX_PERIOD)),
            impedance_ms: AtomicU16::new(settings.impedance_ms.min(periods::MAX_PERIOD)),
            temperature_ms: AtomicU16::new(settings.temperature_ms.min(periods::MAX_PERIOD)),
        }
    }

    fn cell(&self, kind: PeriodKind) -> &AtomicU16 {
        match kind {
            PeriodKind::Emg => &self.emg_us,
            PeriodKind::Impedance => &self.impedance_ms,
            PeriodKind::Temperature => &self.temperature_ms,
        }
    }

    pub fn get(&self, kind: PeriodKind) -> u16 {
        self.cell(kind).load(Ordering::Relaxed)
    }

    /// Store a period, clamped to the protocol maximum. Returns the stored value.
    pub fn set(&self, kind: PeriodKind, value: u16) -> u16 {
        let value = value.min(periods::MAX_PERIOD);
        self.cell(kind).store(value, Ordering::Relaxed);
        value
    }
}

/// Pending request to re-seed the acquisition phase counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseReset {
    /// Both counters restart at zero
    InPhase,
    /// Counters restart with the offset derived from the node identity
    Identity,
}

impl PhaseReset {
    const NONE: u8 = 0;

    const fn code(self) -> u8 {
        match self {
            PhaseReset::InPhase => 1,
            PhaseReset::Identity => 2,
        }
    }

    const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(PhaseReset::InPhase),
            2 => Some(PhaseReset::Identity),
            _ => None,
        }
    }
}

/// Presence and periodic-acquisition state of the optional subsystems
#[derive(Debug, Default)]
pub struct SubsystemControl {
    impedance_present: AtomicBool,
    temperature_present: AtomicBool,
    impedance_periodic: AtomicBool,
    temperature_periodic: AtomicBool,
    phase_reset: AtomicU8,
}

impl SubsystemControl {
    fn present_cell(&self, subsystem: Subsystem) -> Option<&AtomicBool> {
        match subsystem {
            Subsystem::Impedance => Some(&self.impedance_present),
            Subsystem::Temperature => Some(&self.temperature_present),
            Subsystem::Emg => None,
        }
    }

    fn periodic_cell(&self, subsystem: Subsystem) -> Option<&AtomicBool> {
        match subsystem {
            Subsystem::Impedance => Some(&self.impedance_periodic),
            Subsystem::Temperature => Some(&self.temperature_periodic),
            Subsystem::Emg => None,
        }
    }

    /// Record the attach result; a present subsystem starts with periodic
    /// acquisition enabled
    pub fn set_present(&self, subsystem: Subsystem, present: bool) {
        if let Some(cell) = self.present_cell(subsystem) {
            cell.store(present, Ordering::Release);
        }
        if let Some(cell) = self.periodic_cell(subsystem) {
            cell.store(present, Ordering::Release);
        }
    }

    /// The EMG front end is always present
    pub fn is_present(&self, subsystem: Subsystem) -> bool {
        self.present_cell(subsystem)
            .map_or(true, |cell| cell.load(Ordering::Acquire))
    }

    pub fn is_periodic(&self, subsystem: Subsystem) -> bool {
        self.periodic_cell(subsystem)
            .is_some_and(|cell| cell.load(Ordering::Acquire))
    }

    /// Disable both periodic paths and restart their counters in phase
    pub fn stop_periodic(&self) {
        self.impedance_periodic.store(false, Ordering::Release);
        self.temperature_periodic.store(false, Ordering::Release);
        self.request_phase_reset(PhaseReset::InPhase);
    }

    /// Re-enable periodic acquisition on every present subsystem
    pub fn start_periodic(&self) {
        for subsystem in [Subsystem::Impedance, Subsystem::Temperature] {
            if let Some(cell) = self.periodic_cell(subsystem) {
                cell.store(self.is_present(subsystem), Ordering::Release);
            }
        }
        self.request_phase_reset(PhaseReset::Identity);
    }

    pub fn request_phase_reset(&self, reset: PhaseReset) {
        self.phase_reset.store(reset.code(), Ordering::Release);
    }

    /// Consume the pending phase reset, if any
    pub fn take_phase_reset(&self) -> Option<PhaseReset> {
        PhaseReset::from_code(self.phase_reset.swap(PhaseReset::NONE, Ordering::AcqRel))
    }
}

/// Setting change for hardware owned by the main loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSetting {
    OutputRange(OutputRange),
    PgaGain(PgaGain),
    ReferenceSwitch(bool),
}

/// The node's shared state
#[derive(Debug)]
pub struct SharedSampleStore {
    emg: AtomicCell<SampleWord>,
    impedance: AtomicCell<ImpedanceFrame>,
    temperature: AtomicCell<SampleWord>,
    flags: AcquisitionFlags,
    periods: PeriodConfig,
    control: SubsystemControl,
    settings: ArrayQueue<DeviceSetting>,
}

impl SharedSampleStore {
    pub fn new(periods: &PeriodSettings) -> Self {
        Self {
            emg: AtomicCell::new(SampleWord::default()),
            impedance: AtomicCell::new(ImpedanceFrame::placeholder()),
            temperature: AtomicCell::new(SampleWord::default()),
            flags: AcquisitionFlags::default(),
            periods: PeriodConfig::new(periods),
            control: SubsystemControl::default(),
            settings: ArrayQueue::new(protocol::SETTINGS_QUEUE_CAPACITY),
        }
    }

    pub fn emg(&self) -> [u8; 2] {
        self.emg.load().0
    }

    pub fn publish_emg(&self, sample: [u8; 2]) {
        self.emg.store(SampleWord(sample));
    }

    pub fn impedance(&self) -> ImpedanceFrame {
        self.impedance.load()
    }

    pub fn publish_impedance(&self, frame: ImpedanceFrame) {
        debug!(bytes = ?frame.bytes(), "impedance frame published");
        self.impedance.store(frame);
    }

    pub fn temperature(&self) -> [u8; 2] {
        self.temperature.load().0
    }

    pub fn publish_temperature(&self, raw: [u8; 2]) {
        self.temperature.store(SampleWord(raw));
    }

    pub fn is_ready(&self) -> bool {
        self.flags.is_ready()
    }

    pub fn set_ready(&self, ready: bool) {
        self.flags.set_ready(ready);
    }

    /// Mark the requested read complete. Returns false, leaving readiness
    /// clear, when the host has asked again since the pass started.
    pub fn complete_request(&self) -> bool {
        self.flags.complete_request()
    }

    pub fn flags(&self) -> &AcquisitionFlags {
        &self.flags
    }

    pub fn periods(&self) -> &PeriodConfig {
        &self.periods
    }

    pub fn control(&self) -> &SubsystemControl {
        &self.control
    }

    /// Queue a setting for the main loop. Returns false if the queue is full.
    pub fn queue_setting(&self, setting: DeviceSetting) -> bool {
        match self.settings.push(setting) {
            Ok(()) => true,
            Err(dropped) => {
                warn!(?dropped, "device setting queue full");
                false
            }
        }
    }

    pub fn next_setting(&self) -> Option<DeviceSetting> {
        self.settings.pop()
    }
}

impl Default for SharedSampleStore {
    fn default() -> Self {
        Self::new(&PeriodSettings::default())
    }
}
