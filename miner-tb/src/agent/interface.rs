//! SPI interface bound to the DUT's pins.
//!
//! The agent talks in terms of protocol roles (`o_mo`, `o_ss_en`, …). The
//! pipeline's top level names its pins differently, so binding goes through a
//! fixed role-to-pin map. The map must match the DUT pinout exactly.

use std::collections::BTreeMap;

use crate::sim::{Dut, Signal};

/// Protocol role → DUT pin.
pub const BUS_MAP: [(&str, &str); 16] = [
    ("i_clk", "i_clk"),
    ("i_reset", "i_reset"),
    ("i_si", "i_si"),
    ("i_sclk_in", "i_sclk_in"),
    ("i_ss_in", "i_ss_in"),
    ("i_in_clk", "i_in_clk"),
    ("o_so_en", "o_so_en"),
    ("o_so", "o_so"),
    ("i_mi", "o_spi_miso"),
    ("i_ext_clk", "i_ext_clk"),
    ("o_ss_en", "i_spi_ss"),
    ("o_ss_out", "o_ss_out"),
    ("o_sclk_en", "o_sclk_en"),
    ("o_sclk_out", "i_spi_clk"),
    ("o_mo_en", "o_mo_en"),
    ("o_mo", "i_spi_mosi"),
];

/// Error binding the interface to the DUT.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("DUT has no pin {pin:?} for role {role:?}")]
    MissingPin { role: String, pin: String },

    #[error("Bus map has no entry for role {0:?}")]
    MissingRole(&'static str),
}

/// The SPI agent's view of the DUT.
///
/// Cheap to clone; clones share the same wires.
#[derive(Debug, Clone)]
pub struct SpiInterface {
    roles: BTreeMap<String, Signal>,
    clk: Signal,
    reset: Signal,
    sclk: Signal,
    ss: Signal,
    mosi: Signal,
    miso: Signal,
}

impl SpiInterface {
    /// Resolve every role in `bus_map` to a DUT pin.
    pub fn bind(dut: &Dut, bus_map: &[(&str, &str)]) -> Result<Self, BindError> {
        let mut roles = BTreeMap::new();
        for (role, pin) in bus_map {
            let signal = dut.pin(pin).ok_or_else(|| BindError::MissingPin {
                role: role.to_string(),
                pin: pin.to_string(),
            })?;
            roles.insert(role.to_string(), signal);
        }

        let take = |role: &'static str| -> Result<Signal, BindError> {
            roles.get(role).cloned().ok_or(BindError::MissingRole(role))
        };

        Ok(Self {
            clk: take("i_clk")?,
            reset: take("i_reset")?,
            sclk: take("o_sclk_out")?,
            ss: take("o_ss_en")?,
            mosi: take("o_mo")?,
            miso: take("i_mi")?,
            roles,
        })
    }

    /// Look up the signal bound to a role.
    pub fn role(&self, role: &str) -> Option<&Signal> {
        self.roles.get(role)
    }

    /// Bound roles and the pins they resolve to.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.roles.iter().map(|(role, s)| (role.as_str(), s.name()))
    }

    /// System clock.
    pub fn clk(&self) -> &Signal {
        &self.clk
    }

    /// Active-high reset.
    pub fn reset(&self) -> &Signal {
        &self.reset
    }

    /// Serial clock.
    pub fn sclk(&self) -> &Signal {
        &self.sclk
    }

    /// Slave select enable, active high.
    pub fn ss(&self) -> &Signal {
        &self.ss
    }

    /// Master out, slave in.
    pub fn mosi(&self) -> &Signal {
        &self.mosi
    }

    /// Master in, slave out.
    pub fn miso(&self) -> &Signal {
        &self.miso
    }
}
