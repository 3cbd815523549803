//! Named slots for bound interfaces.
//!
//! The harness binds the DUT's pins into an interface and stores it here
//! under a well-known name; the orchestrator looks it up before building the
//! agent. The registry is an ordinary value passed from one to the other.

use std::collections::HashMap;

use crate::agent::SpiInterface;

/// Slot holding the SPI agent's interface.
pub const VIF_SPI: &str = "vif_spi";

#[derive(Debug, Clone, Default)]
pub struct InterfaceRegistry {
    slots: HashMap<String, SpiInterface>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `vif` under `name`, replacing any previous binding.
    pub fn set(&mut self, name: impl Into<String>, vif: SpiInterface) {
        self.slots.insert(name.into(), vif);
    }

    pub fn get(&self, name: &str) -> Option<&SpiInterface> {
        self.slots.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }
}
