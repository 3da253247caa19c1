// src/protocol/mod.rs
//! Host-facing I2C slave protocol

pub mod command;
pub mod dispatcher;
pub mod engine;
pub mod inbox;

pub use command::CommandCode;
pub use dispatcher::{describe, CommandDescriptor, CommandDispatcher, SelectEffect, SetterTarget, TxSource};
pub use engine::{EngineState, EngineStats, Pending, SlaveProtocolEngine, TransactionContext};
pub use inbox::{BusInbox, BusTask};
