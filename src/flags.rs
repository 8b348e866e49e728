//! Peripheral readiness and bus-fault flags.
//!
//! Readiness bits are set once during the startup probe and never cleared
//! at runtime: a peripheral that failed its probe stays unavailable until
//! the next reset, and every task checks its prerequisite bit before
//! touching the hardware. The bus-fault bit is different: the transport
//! raises it on a protocol failure and the next gated task takes it,
//! skipping one cycle before the retry.

use serde::{Deserialize, Serialize};

/// Peripherals the startup probe reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Peripheral {
    /// The shared signal-wire bus.
    Bus,
    /// The primary display.
    Display,
    /// The auxiliary digit display.
    AuxDisplay,
}

/// The flags register. Exported as one packed byte for reporting; bit
/// positions are part of the external layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusFlags {
    bus_ready: bool,
    display_ready: bool,
    aux_display_ready: bool,
    bus_fault: bool,
}

impl StatusFlags {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bus_ready: false,
            display_ready: false,
            aux_display_ready: false,
            bus_fault: false,
        }
    }

    /// Record a successful startup probe. There is no inverse operation.
    pub fn mark_ready(&mut self, peripheral: Peripheral) {
        match peripheral {
            Peripheral::Bus => self.bus_ready = true,
            Peripheral::Display => self.display_ready = true,
            Peripheral::AuxDisplay => self.aux_display_ready = true,
        }
    }

    #[must_use]
    pub fn is_ready(&self, peripheral: Peripheral) -> bool {
        match peripheral {
            Peripheral::Bus => self.bus_ready,
            Peripheral::Display => self.display_ready,
            Peripheral::AuxDisplay => self.aux_display_ready,
        }
    }

    /// Transport side: note a protocol failure.
    pub fn raise_bus_fault(&mut self) {
        self.bus_fault = true;
    }

    /// Task side: consume the fault note. Returns whether one was
    /// pending; the flag is clear afterwards so the following cycle
    /// retries.
    pub fn take_bus_fault(&mut self) -> bool {
        let pending = self.bus_fault;
        self.bus_fault = false;
        pending
    }

    #[must_use]
    pub fn bus_fault_pending(&self) -> bool {
        self.bus_fault
    }

    /// Packed layout: bit 0 bus-ready, bit 1 display-ready, bit 2
    /// aux-display-ready, bit 3 bus-fault.
    #[must_use]
    pub fn as_byte(&self) -> u8 {
        u8::from(self.bus_ready)
            | u8::from(self.display_ready) << 1
            | u8::from(self.aux_display_ready) << 2
            | u8::from(self.bus_fault) << 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_register_is_all_clear() {
        let flags = StatusFlags::new();
        assert!(!flags.is_ready(Peripheral::Bus));
        assert!(!flags.is_ready(Peripheral::Display));
        assert!(!flags.is_ready(Peripheral::AuxDisplay));
        assert!(!flags.bus_fault_pending());
        assert_eq!(flags.as_byte(), 0);
    }

    #[test]
    fn readiness_bits_are_independent() {
        let mut flags = StatusFlags::new();
        flags.mark_ready(Peripheral::Bus);
        flags.mark_ready(Peripheral::AuxDisplay);

        assert!(flags.is_ready(Peripheral::Bus));
        assert!(!flags.is_ready(Peripheral::Display));
        assert!(flags.is_ready(Peripheral::AuxDisplay));
        assert_eq!(flags.as_byte(), 0b0000_0101);
    }

    #[test]
    fn fault_is_taken_once() {
        let mut flags = StatusFlags::new();
        flags.raise_bus_fault();
        assert_eq!(flags.as_byte(), 0b0000_1000);

        assert!(flags.take_bus_fault());
        assert!(!flags.take_bus_fault());
        assert!(!flags.bus_fault_pending());
    }
}
