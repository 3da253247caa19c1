// src/acquisition/routing.rs
//! Electrode routing switches

use embedded_hal::digital::{OutputPin, PinState};
use tracing::trace;

use crate::hal::RoutingState;

/// The four analog switch control lines
pub struct ElectrodeRouter<P> {
    sw_1: P,
    sw_2: P,
    sw_ref: P,
    sw_imp: P,
    state: RoutingState,
}

impl<P: OutputPin> ElectrodeRouter<P> {
    /// Take the lines and drive them to EMG passthrough
    pub fn new(sw_1: P, sw_2: P, sw_ref: P, sw_imp: P) -> Result<Self, P::Error> {
        let mut router = Self {
            sw_1,
            sw_2,
            sw_ref,
            sw_imp,
            state: RoutingState::EMG_PASSTHROUGH,
        };
        router.apply(RoutingState::EMG_PASSTHROUGH)?;
        Ok(router)
    }

    /// Drive all four lines. Every line is written, even if unchanged.
    pub fn apply(&mut self, state: RoutingState) -> Result<(), P::Error> {
        trace!(?state, "electrode routing");
        self.sw_1.set_state(PinState::from(state.sw_1))?;
        self.sw_2.set_state(PinState::from(state.sw_2))?;
        self.sw_ref.set_state(PinState::from(state.sw_ref))?;
        self.sw_imp.set_state(PinState::from(state.sw_imp))?;
        self.state = state;
        Ok(())
    }

    pub fn set_reference(&mut self, closed: bool) -> Result<(), P::Error> {
        self.sw_ref.set_state(PinState::from(closed))?;
        self.state.sw_ref = closed;
        Ok(())
    }

    pub fn state(&self) -> RoutingState {
        self.state
    }

    pub fn release(self) -> (P, P, P, P) {
        (self.sw_1, self.sw_2, self.sw_ref, self.sw_imp)
    }
}
