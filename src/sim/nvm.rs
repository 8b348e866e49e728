//! In-memory identity store for host-side runs. Starts erased (all
//! 0xFF, like real flash) and counts accesses so tests can prove the
//! idempotent-store path never rewrites a page.

use crate::hal::Nvm;
use thiserror::Error;

/// Backing size. Covers both identity tables with room to spare.
pub const SIM_NVM_BYTES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SimNvmError {
    #[error("nvm access at {addr:#06x} with length {len} runs past the store")]
    OutOfRange { addr: u16, len: usize },
}

/// Byte-addressable store with access counters.
pub struct SimNvm {
    bytes: [u8; SIM_NVM_BYTES],
    reads: u32,
    writes: u32,
}

impl SimNvm {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes: [0xFF; SIM_NVM_BYTES],
            reads: 0,
            writes: 0,
        }
    }

    /// Read operations issued so far.
    #[must_use]
    pub fn reads(&self) -> u32 {
        self.reads
    }

    /// Write operations issued so far.
    #[must_use]
    pub fn writes(&self) -> u32 {
        self.writes
    }

    /// Raw view of the backing bytes.
    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.bytes
    }

    fn span(addr: u16, len: usize) -> Result<core::ops::Range<usize>, SimNvmError> {
        let start = addr as usize;
        match start.checked_add(len) {
            Some(end) if end <= SIM_NVM_BYTES => Ok(start..end),
            _ => Err(SimNvmError::OutOfRange { addr, len }),
        }
    }
}

impl Default for SimNvm {
    fn default() -> Self {
        Self::new()
    }
}

impl Nvm for SimNvm {
    type Error = SimNvmError;

    fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        let span = Self::span(addr, buf.len())?;
        buf.copy_from_slice(&self.bytes[span]);
        self.reads += 1;
        Ok(())
    }

    fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error> {
        let span = Self::span(addr, data.len())?;
        tracing::trace!(addr, len = data.len(), "nvm write");
        self.bytes[span].copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }
}
