//! Persisted identity tables with idempotent writes.
//!
//! Two fixed regions of the non-volatile map hold discovered identities,
//! 8 bytes per record, no header: the full-enumeration table and the
//! alarm-enumeration table. NVM cells wear out after a bounded number of
//! write cycles, so a store first reads the existing record and skips the
//! write when nothing changed — re-running discovery over an unchanged bus
//! must cost zero write cycles.

use crate::hal::Nvm;
use crate::rom::{RomBank, RomCode, ROM_BYTES};
use static_assertions::const_assert;

/// Base address of the full-enumeration table.
pub const DEVICE_TABLE_BASE: u16 = 0x0040;
/// Base address of the alarm-enumeration table.
pub const ALARM_TABLE_BASE: u16 = 0x00C0;
/// Records per table.
pub const MAX_ROMS_PER_BANK: usize = 16;

const RECORD_BYTES: u16 = ROM_BYTES as u16;

// The device table must end before the alarm table begins.
const_assert!(DEVICE_TABLE_BASE + (MAX_ROMS_PER_BANK as u16) * RECORD_BYTES <= ALARM_TABLE_BASE);

/// What a store actually did to the NVM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Record differed; a write cycle was spent.
    Written,
    /// Record already matched; no write cycle spent. Not an error.
    Skipped,
}

/// Identity cache over a non-volatile storage driver.
///
/// Counts live in RAM and are rebuilt by each discovery run; only the
/// records themselves persist.
pub struct RomCache<N> {
    nvm: N,
    counts: [u8; 2],
}

impl<N: Nvm> RomCache<N> {
    pub fn new(nvm: N) -> Self {
        Self {
            nvm,
            counts: [0; 2],
        }
    }

    fn record_addr(bank: RomBank, index: u8) -> u16 {
        let base = match bank {
            RomBank::Devices => DEVICE_TABLE_BASE,
            RomBank::Alarms => ALARM_TABLE_BASE,
        };
        base + u16::from(index) * RECORD_BYTES
    }

    fn slot(bank: RomBank) -> usize {
        match bank {
            RomBank::Devices => 0,
            RomBank::Alarms => 1,
        }
    }

    /// Store an identity at `index`, spending a write cycle only if the
    /// persisted record differs.
    pub fn store_if_new(
        &mut self,
        bank: RomBank,
        index: u8,
        identity: &RomCode,
    ) -> Result<StoreOutcome, N::Error> {
        debug_assert!(
            usize::from(index) < MAX_ROMS_PER_BANK,
            "identity index {} beyond table capacity {}",
            index,
            MAX_ROMS_PER_BANK
        );

        let addr = Self::record_addr(bank, index);
        let mut existing = [0u8; ROM_BYTES];
        self.nvm.read(addr, &mut existing)?;

        if &existing == identity.as_bytes() {
            return Ok(StoreOutcome::Skipped);
        }

        self.nvm.write(addr, identity.as_bytes())?;
        Ok(StoreOutcome::Written)
    }

    /// Read the identity persisted at `index`.
    pub fn get(&mut self, bank: RomBank, index: u8) -> Result<RomCode, N::Error> {
        debug_assert!(
            usize::from(index) < MAX_ROMS_PER_BANK,
            "identity index {} beyond table capacity {}",
            index,
            MAX_ROMS_PER_BANK
        );

        let mut bytes = [0u8; ROM_BYTES];
        self.nvm.read(Self::record_addr(bank, index), &mut bytes)?;
        Ok(RomCode::from_bytes(bytes))
    }

    /// Accepted identities in this bank, per the last discovery run.
    #[must_use]
    pub fn count(&self, bank: RomBank) -> u8 {
        self.counts[Self::slot(bank)]
    }

    pub(crate) fn reset_count(&mut self, bank: RomBank) {
        self.counts[Self::slot(bank)] = 0;
    }

    pub(crate) fn record_accepted(&mut self, bank: RomBank) {
        self.counts[Self::slot(bank)] += 1;
    }

    #[must_use]
    pub fn nvm(&self) -> &N {
        &self.nvm
    }

    pub fn nvm_mut(&mut self) -> &mut N {
        &mut self.nvm
    }
}
