//! Recursion-free binary-tree enumeration of every device on the bus.
//!
//! Identities form an implicit binary tree 64 bits deep. Each search pass
//! walks root to leaf: at every bit position all responding devices answer
//! with the bit and its complement simultaneously, the wired-AND exposes
//! whether they agree, and the master writes the chosen branch back, which
//! silences every device on the other branch until the next reset. One
//! byte of state between passes — the most significant still-unexplored
//! fork — is enough to visit every leaf with no stack and no recursion,
//! which is what lets an unknown device count fit a controller with a few
//! hundred bytes of RAM.

use crate::bus::{commands, BusFault, OneWireBus};
use crate::cache::{RomCache, MAX_ROMS_PER_BANK};
use crate::hal::{BusWire, Nvm};
use crate::rom::{RomBank, RomCode};
use embedded_hal::delay::DelayNs;

/// `last_fork` value before the first pass: above every real bit position.
pub const SEARCH_START: u8 = 65;

/// Failure inside one search pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SearchError {
    /// Reset or mid-search protocol failure; the pass is abandoned.
    Fault(BusFault),
    /// The assembled identity failed its checksum; it is discarded but
    /// the cursor has still advanced, so enumeration can continue.
    CrcMismatch,
}

impl From<BusFault> for SearchError {
    fn from(fault: BusFault) -> Self {
        SearchError::Fault(fault)
    }
}

impl core::fmt::Display for SearchError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SearchError::Fault(fault) => write!(f, "search aborted: {}", fault),
            SearchError::CrcMismatch => write!(f, "discovered identity failed checksum"),
        }
    }
}

/// Failure of a full enumeration run.
#[derive(Debug)]
pub enum DiscoverError<E> {
    Bus(BusFault),
    Nvm(E),
}

impl<E: core::fmt::Debug> core::fmt::Display for DiscoverError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DiscoverError::Bus(fault) => write!(f, "discovery aborted: {}", fault),
            DiscoverError::Nvm(err) => write!(f, "identity store failed: {:?}", err),
        }
    }
}

/// Branch/fork state carried across passes, plus the identity buffer being
/// assembled. The buffer doubles as the previous pass's identity: the
/// branch decision at position `i` reads bit `i` before overwriting it,
/// so one array serves both roles.
#[derive(Debug, Clone, Copy)]
pub struct SearchCursor {
    last_fork: u8,
    rom: [u8; 8],
}

impl SearchCursor {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_fork: SEARCH_START,
            rom: [0; 8],
        }
    }

    /// True once a pass has completed with no unexplored forks left.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.last_fork == 0
    }

    #[must_use]
    pub fn last_fork(&self) -> u8 {
        self.last_fork
    }

    /// Bit at 1-based wire position, LSB-first.
    fn bit(&self, position: u8) -> bool {
        let index = position - 1;
        (self.rom[usize::from(index / 8)] >> (index % 8)) & 0x01 != 0
    }

    fn set_bit(&mut self, position: u8, bit: bool) {
        let index = position - 1;
        let mask = 1 << (index % 8);
        if bit {
            self.rom[usize::from(index / 8)] |= mask;
        } else {
            self.rom[usize::from(index / 8)] &= !mask;
        }
    }
}

impl Default for SearchCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Branch decision at a fork (both complementary bits read low).
///
/// Below the previous pass's fork the walk replays last time's path, and a
/// replayed 0 marks the deepest fork still owed a 1-branch visit. At the
/// fork itself the 1-branch is taken, completing it. Above it the walk is
/// on fresh ground and always descends the 0-branch first, recording the
/// new fork.
fn choose_branch(position: u8, last_fork: u8, previous_bit: bool, fork: &mut u8) -> bool {
    if position < last_fork {
        if !previous_bit {
            *fork = position;
        }
        previous_bit
    } else if position == last_fork {
        true
    } else {
        *fork = position;
        false
    }
}

/// One enumeration run over a borrowed bus. Yields identities until the
/// tree is exhausted.
pub struct RomSearch<'b, W, D> {
    bus: &'b mut OneWireBus<W, D>,
    cursor: SearchCursor,
    command: u8,
}

impl<'b, W, D> RomSearch<'b, W, D>
where
    W: BusWire,
    D: DelayNs,
{
    pub fn new(bus: &'b mut OneWireBus<W, D>, bank: RomBank) -> Self {
        let command = match bank {
            RomBank::Devices => commands::SEARCH_ROM,
            RomBank::Alarms => commands::SEARCH_ALARM,
        };
        Self {
            bus,
            cursor: SearchCursor::new(),
            command,
        }
    }

    #[must_use]
    pub fn cursor(&self) -> &SearchCursor {
        &self.cursor
    }

    /// Run the next pass. `Ok(None)` means the tree is exhausted; a
    /// `CrcMismatch` discards this pass's identity but leaves the cursor
    /// advanced, so calling again continues the enumeration.
    pub fn next_identity(&mut self) -> Result<Option<RomCode>, SearchError> {
        if self.cursor.is_exhausted() {
            return Ok(None);
        }
        self.pass().map(Some)
    }

    fn pass(&mut self) -> Result<RomCode, SearchError> {
        self.bus.reset()?;
        self.bus.write_byte(self.command);

        let mut fork = 0u8;
        for position in 1..=64u8 {
            let bit = self.bus.read_bit();
            let complement = self.bus.read_bit();

            let chosen = match (bit, complement) {
                (true, true) => return Err(SearchError::Fault(BusFault::NoResponse)),
                (true, false) => true,
                (false, true) => false,
                (false, false) => choose_branch(
                    position,
                    self.cursor.last_fork,
                    self.cursor.bit(position),
                    &mut fork,
                ),
            };

            self.cursor.set_bit(position, chosen);
            self.bus.write_bit(chosen);
        }

        // The cursor advances before the integrity check: a corrupt
        // identity must not stall the walk on the same leaf forever.
        self.cursor.last_fork = fork;

        let identity = RomCode::from_bytes(self.cursor.rom);
        if identity.is_valid() {
            Ok(identity)
        } else {
            Err(SearchError::CrcMismatch)
        }
    }
}

/// Full enumeration into the identity cache: resets the bank count, then
/// stores each accepted identity idempotently and counts it. Checksum
/// rejects are skipped; bus faults abort the run with whatever was
/// accepted so far already persisted and counted.
pub fn discover_into<W, D, N>(
    bus: &mut OneWireBus<W, D>,
    cache: &mut RomCache<N>,
    bank: RomBank,
) -> Result<u8, DiscoverError<N::Error>>
where
    W: BusWire,
    D: DelayNs,
    N: Nvm,
{
    cache.reset_count(bank);
    let mut search = RomSearch::new(bus, bank);
    let mut index: u8 = 0;

    while usize::from(index) < MAX_ROMS_PER_BANK {
        match search.next_identity() {
            Ok(Some(identity)) => {
                cache
                    .store_if_new(bank, index, &identity)
                    .map_err(DiscoverError::Nvm)?;
                cache.record_accepted(bank);
                index += 1;
            }
            Ok(None) => break,
            Err(SearchError::CrcMismatch) => {}
            Err(SearchError::Fault(fault)) => return Err(DiscoverError::Bus(fault)),
        }
    }

    Ok(index)
}
