//! Device identities (ROM codes) and the identity tables they live in.

use crate::crc::crc8;
use arrayvec::ArrayString;
use core::fmt::Write as _;
use serde::{Deserialize, Serialize};

/// Length of a device identity record in bytes.
pub const ROM_BYTES: usize = 8;

/// One device identity: family code, six serial bytes, CRC-8 checksum.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RomCode([u8; ROM_BYTES]);

impl RomCode {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ROM_BYTES]) -> Self {
        Self(bytes)
    }

    /// Build an identity from a family code and serial, computing the
    /// checksum byte. Useful for fixtures and simulated devices.
    #[must_use]
    pub fn with_checksum(family: u8, serial: [u8; 6]) -> Self {
        let mut bytes = [0u8; ROM_BYTES];
        bytes[0] = family;
        bytes[1..7].copy_from_slice(&serial);
        bytes[7] = crc8(&bytes[..7]);
        Self(bytes)
    }

    #[must_use]
    pub const fn family(&self) -> u8 {
        self.0[0]
    }

    #[must_use]
    pub fn serial(&self) -> &[u8] {
        &self.0[1..7]
    }

    #[must_use]
    pub const fn checksum(&self) -> u8 {
        self.0[7]
    }

    /// True when the CRC-8 fold over all eight bytes comes out zero.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        crc8(&self.0) == 0
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ROM_BYTES] {
        &self.0
    }

    /// Bit `index` (0..64) of the identity, LSB-first within each byte —
    /// the order bits travel on the wire during discovery.
    #[must_use]
    pub fn bit(&self, index: u8) -> bool {
        debug_assert!(index < 64, "identity bit index {} out of range", index);
        (self.0[usize::from(index / 8)] >> (index % 8)) & 0x01 != 0
    }

    /// Upper-case hex rendering, family byte first.
    #[must_use]
    pub fn hex(&self) -> ArrayString<16> {
        let mut out = ArrayString::new();
        for byte in &self.0 {
            let _ = write!(out, "{:02X}", byte);
        }
        out
    }
}

impl core::fmt::Display for RomCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.hex())
    }
}

impl core::fmt::Debug for RomCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "RomCode({})", self.hex())
    }
}

/// Which persisted identity table a discovery run feeds: every device on
/// the bus, or only the ones currently signaling an alarm condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RomBank {
    Devices,
    Alarms,
}

#[cfg(test)]
mod tests {
    use super::*;

    // Family 0x28 sensor with a known-good checksum.
    const GOOD: [u8; 8] = [0x28, 0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6, 0xAC];

    #[test]
    fn accessors_split_the_record() {
        let rom = RomCode::from_bytes(GOOD);
        assert_eq!(rom.family(), 0x28);
        assert_eq!(rom.serial(), &GOOD[1..7]);
        assert_eq!(rom.checksum(), 0xAC);
    }

    #[test]
    fn checksum_construction_matches_known_record() {
        let rom = RomCode::with_checksum(0x28, [0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6]);
        assert_eq!(rom.as_bytes(), &GOOD);
        assert!(rom.is_valid());
    }

    #[test]
    fn corrupted_record_is_invalid() {
        let mut bytes = GOOD;
        bytes[3] ^= 0x10;
        assert!(!RomCode::from_bytes(bytes).is_valid());
    }

    #[test]
    fn bits_come_out_lsb_first() {
        let rom = RomCode::from_bytes(GOOD);
        // Family 0x28 = 0b0010_1000: bits 3 and 5 set.
        assert!(!rom.bit(0));
        assert!(rom.bit(3));
        assert!(rom.bit(5));
        assert!(!rom.bit(7));
        // First serial byte 0xA1: bit 8 is its LSB.
        assert!(rom.bit(8));
    }

    #[test]
    fn hex_rendering() {
        let rom = RomCode::from_bytes(GOOD);
        assert_eq!(rom.hex().as_str(), "28A1B2C3D4E5F6AC");
    }
}
