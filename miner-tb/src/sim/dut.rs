//! Pins of the device under test.
//!
//! The bench does not model the hash pipeline itself. The DUT is only its set
//! of top-level pins, which clocks, reset and the SPI agent drive and sample.

use std::collections::BTreeMap;

use super::signal::Signal;

/// Named top-level pins of the mining pipeline.
#[derive(Debug, Clone, Default)]
pub struct Dut {
    pins: BTreeMap<String, Signal>,
}

impl Dut {
    /// Create a DUT exposing the given pin names, all initially low.
    pub fn with_pins<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let pins = names
            .into_iter()
            .map(|name| (name.to_string(), Signal::new(name)))
            .collect();
        Self { pins }
    }

    /// Look up a pin by name.
    pub fn pin(&self, name: &str) -> Option<Signal> {
        self.pins.get(name).cloned()
    }

    pub fn pin_names(&self) -> impl Iterator<Item = &str> {
        self.pins.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pins_are_shared_handles() {
        let dut = Dut::with_pins(["i_clk", "i_reset"]);
        let a = dut.pin("i_reset").unwrap();
        let b = dut.pin("i_reset").unwrap();
        a.set(true);
        assert!(b.get());
        assert!(dut.pin("i_missing").is_none());
        assert_eq!(dut.pin_names().collect::<Vec<_>>(), vec!["i_clk", "i_reset"]);
    }
}
