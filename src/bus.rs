//! Bit-level transport for the shared signal-wire bus.
//!
//! One open-drain line carries reset pulses, write slots, and read slots
//! with microsecond-exact proportions; those proportions are the protocol
//! contract with the devices on the wire, not a tuning knob. The engine is
//! deliberately blocking: once a reset or a bit slot starts, the electrical
//! protocol cannot pause mid-slot without corrupting it, so every primitive
//! runs to completion through the injected delay provider.

use crate::hal::BusWire;
use crate::rom::RomCode;
use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};

/// Slot and pulse timings in microseconds.
///
/// A reset holds the line low for [`timing::RESET_LOW_US`], releases, then
/// samples after [`timing::RESET_SAMPLE_US`]; any present device is still
/// stretching its presence pulse at that point. Bit slots are ~70 µs with
/// asymmetric low times: a written 1 releases early, a written 0 holds low
/// for most of the slot, and a read asserts briefly before sampling.
pub mod timing {
    pub const RESET_LOW_US: u32 = 480;
    pub const RESET_SAMPLE_US: u32 = 70;
    pub const RESET_RECOVERY_US: u32 = 410;

    pub const WRITE1_LOW_US: u32 = 6;
    pub const WRITE1_RELEASE_US: u32 = 64;
    pub const WRITE0_LOW_US: u32 = 60;
    pub const WRITE0_RELEASE_US: u32 = 10;

    pub const READ_INIT_US: u32 = 6;
    pub const READ_SAMPLE_US: u32 = 9;
    pub const READ_RECOVERY_US: u32 = 55;
}

/// Bus-level command bytes understood by every device family.
pub mod commands {
    /// Enumerate all devices (binary-tree search).
    pub const SEARCH_ROM: u8 = 0xF0;
    /// Enumerate only devices signaling an alarm condition.
    pub const SEARCH_ALARM: u8 = 0xEC;
    /// Read the identity of the only device on the wire.
    pub const READ_ROM: u8 = 0x33;
    /// Address one device by its full identity.
    pub const MATCH_ROM: u8 = 0x55;
    /// Address whatever is on the wire without an identity.
    pub const SKIP_ROM: u8 = 0xCC;
    /// Ask the addressed device how it is powered.
    pub const READ_POWER_SUPPLY: u8 = 0xB4;
}

/// Transport-level failure. Both variants abort the transaction in
/// progress; recovery is simply the next scheduler cycle's retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusFault {
    /// No device answered the reset with a presence pulse.
    NoPresence,
    /// Mid-search, a read bit and its complement both came back high:
    /// whatever was answering has stopped.
    NoResponse,
}

impl core::fmt::Display for BusFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BusFault::NoPresence => write!(f, "no presence pulse after bus reset"),
            BusFault::NoResponse => write!(f, "devices stopped responding mid-search"),
        }
    }
}

/// Proof that at least one device answered the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presence;

/// The bit-banged bus engine: one wire, one delay provider.
pub struct OneWireBus<W, D> {
    wire: W,
    delay: D,
}

impl<W, D> OneWireBus<W, D>
where
    W: BusWire,
    D: DelayNs,
{
    pub fn new(wire: W, delay: D) -> Self {
        Self { wire, delay }
    }

    /// Reset the bus and check for a presence pulse.
    ///
    /// Drives low for the full reset pulse, releases, samples after the
    /// presence window opens. A high line means nobody answered and the
    /// recovery wait is skipped — the caller is about to give up anyway.
    pub fn reset(&mut self) -> Result<Presence, BusFault> {
        self.wire.drive_low();
        self.delay.delay_us(timing::RESET_LOW_US);
        self.wire.release();
        self.delay.delay_us(timing::RESET_SAMPLE_US);
        if self.wire.is_high() {
            return Err(BusFault::NoPresence);
        }
        self.delay.delay_us(timing::RESET_RECOVERY_US);
        Ok(Presence)
    }

    /// Write one bit slot.
    pub fn write_bit(&mut self, bit: bool) {
        self.wire.drive_low();
        if bit {
            self.delay.delay_us(timing::WRITE1_LOW_US);
            self.wire.release();
            self.delay.delay_us(timing::WRITE1_RELEASE_US);
        } else {
            self.delay.delay_us(timing::WRITE0_LOW_US);
            self.wire.release();
            self.delay.delay_us(timing::WRITE0_RELEASE_US);
        }
    }

    /// Read one bit slot: brief assertion, release, sample, then wait out
    /// the remainder of the slot so the next slot starts cleanly.
    pub fn read_bit(&mut self) -> bool {
        self.wire.drive_low();
        self.delay.delay_us(timing::READ_INIT_US);
        self.wire.release();
        self.delay.delay_us(timing::READ_SAMPLE_US);
        let bit = self.wire.is_high();
        self.delay.delay_us(timing::READ_RECOVERY_US);
        bit
    }

    /// Write a byte, least significant bit first.
    pub fn write_byte(&mut self, byte: u8) {
        for shift in 0..8 {
            self.write_bit((byte >> shift) & 0x01 != 0);
        }
    }

    /// Read a byte, least significant bit first.
    pub fn read_byte(&mut self) -> u8 {
        let mut byte = 0u8;
        for shift in 0..8 {
            if self.read_bit() {
                byte |= 1 << shift;
            }
        }
        byte
    }

    /// Address one specific device among many: reset, match command, then
    /// the full identity. Every other device drops out until the next
    /// reset.
    pub fn match_identity(&mut self, id: &RomCode) -> Result<(), BusFault> {
        self.reset()?;
        self.write_byte(commands::MATCH_ROM);
        for &byte in id.as_bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }

    /// Address the bus without an identity. Only safe when a single device
    /// is connected or the following command is a broadcast.
    pub fn skip_identity(&mut self) -> Result<(), BusFault> {
        self.reset()?;
        self.write_byte(commands::SKIP_ROM);
        Ok(())
    }

    /// Read the identity of the only device on the wire. With more than
    /// one device present the wired-AND garbles the record; callers must
    /// check [`RomCode::is_valid`] before trusting the result.
    pub fn read_identity(&mut self) -> Result<RomCode, BusFault> {
        self.reset()?;
        self.write_byte(commands::READ_ROM);
        let mut bytes = [0u8; 8];
        for byte in &mut bytes {
            *byte = self.read_byte();
        }
        Ok(RomCode::from_bytes(bytes))
    }

    /// Assert the strong pull-up for the lifetime of the returned guard.
    ///
    /// Dropping the guard releases the pull-up on every exit path,
    /// including early error returns in the caller.
    pub fn strong_pullup(&mut self) -> StrongPullupGuard<'_, W, D> {
        self.wire.strong_pullup(true);
        StrongPullupGuard { bus: self }
    }
}

/// Scoped strong pull-up assertion. See [`OneWireBus::strong_pullup`].
pub struct StrongPullupGuard<'a, W, D>
where
    W: BusWire,
{
    bus: &'a mut OneWireBus<W, D>,
}

impl<W, D> StrongPullupGuard<'_, W, D>
where
    W: BusWire,
    D: DelayNs,
{
    /// Wait with the pull-up held — how parasitically powered devices get
    /// through current-hungry operations.
    pub fn hold_ms(&mut self, ms: u32) {
        self.bus.delay.delay_ms(ms);
    }
}

impl<W, D> Drop for StrongPullupGuard<'_, W, D>
where
    W: BusWire,
{
    fn drop(&mut self) {
        self.bus.wire.strong_pullup(false);
    }
}
