// src/acquisition/mod.rs
//! Sample acquisition: the shared store, the tick scheduler, electrode routing
//! and the main acquisition loop

pub mod main_loop;
pub mod routing;
pub mod scheduler;
pub mod store;

pub use main_loop::*;
pub use routing::*;
pub use scheduler::*;
pub use store::*;
