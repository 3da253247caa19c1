// src/protocol/engine.rs
//! I2C slave protocol engine
//!
//! Byte-level state machine for the register-pointer protocol. A host write
//! with no command pending selects a command; the next transaction either
//! writes a little-endian value to the command's setter or reads the
//! command's response. Reads are served from a snapshot taken when the read
//! segment is addressed, so every response is internally consistent.
//!
//! A repeated start ends the previous segment exactly as a stop would, which
//! allows both `write(cmd); read(n)` and `write_read(cmd, n)` host styles.

use tracing::{debug, trace};

use crate::config::constants::protocol::{IDLE_FILL_BYTE, RX_BUFFER_LEN, TX_BUFFER_MAX_LEN};
use crate::hal::{BusAction, BusEvent, Direction};
use crate::protocol::command::CommandCode;
use crate::protocol::dispatcher::{describe, CommandDispatcher, TxSource};
use crate::utils::clamp_period;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    AddressMatched(Direction),
    DataPhase(Direction),
}

impl EngineState {
    fn direction(self) -> Option<Direction> {
        match self {
            EngineState::Idle => None,
            EngineState::AddressMatched(direction) | EngineState::DataPhase(direction) => Some(direction),
        }
    }
}

/// Command waiting for its second transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pending {
    #[default]
    None,
    Command(CommandCode),
    /// An unknown code was received; the next write is discarded
    Unrecognized(u8),
}

/// Per-segment bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionContext {
    pub index: usize,
    pub expected: usize,
    pub source: Option<TxSource>,
    rx: [u8; RX_BUFFER_LEN],
    tx: [u8; TX_BUFFER_MAX_LEN],
}

impl TransactionContext {
    pub fn received(&self) -> &[u8] {
        &self.rx[..self.index.min(RX_BUFFER_LEN)]
    }

    pub fn response(&self) -> &[u8] {
        &self.tx[..self.expected]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub transactions: u64,
    pub commands: u64,
    pub values: u64,
    pub ignored: u64,
}

pub struct SlaveProtocolEngine {
    dispatcher: CommandDispatcher,
    state: EngineState,
    pending: Pending,
    selected: Option<TxSource>,
    context: TransactionContext,
    stats: EngineStats,
}

impl SlaveProtocolEngine {
    pub fn new(dispatcher: CommandDispatcher) -> Self {
        Self {
            dispatcher,
            state: EngineState::Idle,
            pending: Pending::None,
            selected: None,
            context: TransactionContext::default(),
            stats: EngineStats::default(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn pending(&self) -> Pending {
        self.pending
    }

    pub fn context(&self) -> &TransactionContext {
        &self.context
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn handle(&mut self, event: BusEvent) -> BusAction {
        trace!(?event, state = ?self.state, "bus event");
        match event {
            BusEvent::AddressMatch(direction) => {
                if self.state != EngineState::Idle {
                    self.finish_segment();
                }
                self.begin_segment(direction);
                BusAction::Ack
            }
            BusEvent::ByteReceived(byte) => match self.state.direction() {
                Some(Direction::HostWrite) => self.receive(byte),
                _ => BusAction::Nack,
            },
            BusEvent::ByteRequested => match self.state.direction() {
                Some(Direction::HostRead) => self.transmit(),
                _ => BusAction::Idle,
            },
            BusEvent::Stop => {
                if self.state != EngineState::Idle {
                    self.finish_segment();
                    self.state = EngineState::Idle;
                }
                BusAction::Idle
            }
        }
    }

    fn begin_segment(&mut self, direction: Direction) {
        self.stats.transactions += 1;
        self.context = TransactionContext::default();
        if direction == Direction::HostRead {
            let source = match self.pending {
                Pending::Command(code) => describe(code).source.or(self.selected),
                Pending::None => self.selected,
                Pending::Unrecognized(_) => None,
            };
            if let Some(source) = source {
                self.context.expected = self.dispatcher.load(source, &mut self.context.tx);
                self.context.source = Some(source);
            }
        }
        self.state = EngineState::AddressMatched(direction);
    }

    fn receive(&mut self, byte: u8) -> BusAction {
        let index = self.context.index;
        if index >= RX_BUFFER_LEN {
            return BusAction::Nack;
        }
        self.context.rx[index] = byte;
        self.context.index += 1;
        self.state = EngineState::DataPhase(Direction::HostWrite);
        if self.context.index == RX_BUFFER_LEN {
            BusAction::AckAndComplete
        } else {
            BusAction::Ack
        }
    }

    fn transmit(&mut self) -> BusAction {
        let index = self.context.index;
        let byte = if index < self.context.expected {
            self.context.tx[index]
        } else {
            IDLE_FILL_BYTE
        };
        self.context.index += 1;
        self.state = EngineState::DataPhase(Direction::HostRead);
        BusAction::Transmit {
            byte,
            last: self.context.index >= self.context.expected,
        }
    }

    fn finish_segment(&mut self) {
        match self.state.direction() {
            Some(Direction::HostWrite) => self.finish_write(),
            Some(Direction::HostRead) => {
                trace!(sent = self.context.index, "read segment done");
                self.pending = Pending::None;
            }
            None => {}
        }
    }

    fn finish_write(&mut self) {
        let received = self.context.received();
        let Some(&first) = received.first() else {
            // address probe
            self.pending = Pending::None;
            return;
        };

        match self.pending {
            Pending::None => {
                self.pending = match CommandCode::from_byte(first) {
                    Some(code) => {
                        self.stats.commands += 1;
                        let descriptor = self.dispatcher.select(code);
                        if let Some(source) = descriptor.source {
                            self.selected = Some(source);
                        }
                        if descriptor.awaits_data() {
                            Pending::Command(code)
                        } else {
                            Pending::None
                        }
                    }
                    None => {
                        self.stats.ignored += 1;
                        debug!(byte = first, "unknown command");
                        Pending::Unrecognized(first)
                    }
                };
            }
            Pending::Command(code) => {
                let high = received.get(1).copied().unwrap_or(0);
                let value = clamp_period(u16::from_le_bytes([first, high]));
                match describe(code).setter {
                    Some(target) => {
                        self.stats.values += 1;
                        self.dispatcher.apply(target, value);
                    }
                    None => {
                        self.stats.ignored += 1;
                        debug!(?code, value, "write to read-only command");
                    }
                }
                self.pending = Pending::None;
            }
            Pending::Unrecognized(code) => {
                self.stats.ignored += 1;
                debug!(code, "value for unknown command discarded");
                self.pending = Pending::None;
            }
        }
    }
}
