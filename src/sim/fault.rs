//! Deterministic fault scheduling for the simulated wire.
//!
//! Faults are configured, not sampled: a test or demo run states exactly
//! which protocol step misbehaves and the bus replays it the same way
//! every run. All knobs default to off.

/// What the simulated wire does wrong.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultPlan {
    /// No device answers resets while set. The master sees a dead wire.
    pub suppress_presence: bool,
    /// Devices fall silent once a search pass reaches this bit position,
    /// as if unplugged mid-enumeration. The master reads both
    /// complementary bits high and aborts the pass.
    pub silence_search_at_bit: Option<u8>,
    /// Devices serve a flipped bit at this search position. The pass
    /// completes, the assembled identity fails its checksum, and the
    /// walk moves on.
    pub corrupt_search_bit: Option<u8>,
    /// Served scratchpads carry a corrupted checksum byte.
    pub corrupt_scratchpad: bool,
}
