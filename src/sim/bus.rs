//! The simulated wire: electrical activity in, protocol events out.
//!
//! The master side of the crate talks to this exactly as it talks to a
//! real line driver: assert, release, sample, delay. A virtual
//! nanosecond clock advances only through the master's own delay calls,
//! and the low-pulse durations it produces are decoded with the same
//! thresholds a device on copper would apply: a long pulse is a reset,
//! a short one opens a slot the devices may answer into. Handles are
//! cheaply cloneable and share one bus, so a test can keep one while
//! the engine under test owns others.

use std::cell::RefCell;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::bus::commands as rom_commands;
use crate::hal::BusWire;
use crate::sensor::commands as function_commands;

use super::device::{DeviceSnapshot, SimDevice};
use super::fault::FaultPlan;

/// A low pulse at least this long is a reset.
const RESET_PULSE_NS: u64 = 240_000;
/// A low pulse shorter than this writes a 1 (or opens a read slot).
const SLOT_ONE_NS: u64 = 15_000;
/// How long devices stretch the presence pulse past the release.
const PRESENCE_HOLD_NS: u64 = 140_000;
/// How long a device holds its zero into a slot.
const SLOT_HOLD_NS: u64 = 20_000;

/// Wire-level traffic counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SimBusStats {
    pub resets: u32,
    pub presence_pulses: u32,
    pub slots: u64,
    pub searches: u32,
    pub identity_matches: u32,
    pub conversions: u32,
    pub scratchpad_reads: u32,
}

/// Passive command decoder feeding the stats. Runs alongside the
/// devices on the same slot stream; search triplets are not
/// byte-aligned, so it goes quiet for the rest of such a transaction.
#[derive(Debug, Clone, Copy)]
enum TapState {
    RomByte { bits: u8, count: u8 },
    SkipIdentity { seen: u8 },
    FunctionByte { bits: u8, count: u8 },
    Passive,
}

fn tap_observe(state: TapState, master_bit: bool, stats: &mut SimBusStats) -> TapState {
    match state {
        TapState::RomByte { mut bits, count } => {
            if master_bit {
                bits |= 1 << count;
            }
            if count < 7 {
                return TapState::RomByte { bits, count: count + 1 };
            }
            match bits {
                rom_commands::SEARCH_ROM => {
                    stats.searches += 1;
                    debug!("rom command: search");
                    TapState::Passive
                }
                rom_commands::SEARCH_ALARM => {
                    stats.searches += 1;
                    debug!("rom command: search, alarm subset");
                    TapState::Passive
                }
                rom_commands::MATCH_ROM => {
                    stats.identity_matches += 1;
                    TapState::SkipIdentity { seen: 0 }
                }
                rom_commands::SKIP_ROM => TapState::FunctionByte { bits: 0, count: 0 },
                rom_commands::READ_ROM => {
                    debug!("rom command: read identity");
                    TapState::Passive
                }
                _ => TapState::Passive,
            }
        }
        TapState::SkipIdentity { seen } => {
            if seen == 63 {
                TapState::FunctionByte { bits: 0, count: 0 }
            } else {
                TapState::SkipIdentity { seen: seen + 1 }
            }
        }
        TapState::FunctionByte { mut bits, count } => {
            if master_bit {
                bits |= 1 << count;
            }
            if count < 7 {
                return TapState::FunctionByte { bits, count: count + 1 };
            }
            match bits {
                function_commands::CONVERT_T => stats.conversions += 1,
                function_commands::READ_SCRATCHPAD => stats.scratchpad_reads += 1,
                _ => {}
            }
            debug!(command = bits, "function command");
            TapState::Passive
        }
        TapState::Passive => TapState::Passive,
    }
}

struct BusInner {
    now_ns: u64,
    low_since_ns: Option<u64>,
    /// Until when some device holds the line low (presence or a zero).
    pulled_until_ns: u64,
    spu_since_ns: Option<u64>,
    spu_holds: Vec<(u64, u64)>,
    devices: Vec<SimDevice>,
    plan: FaultPlan,
    stats: SimBusStats,
    tap: TapState,
}

impl BusInner {
    fn on_release(&mut self) {
        let Some(start) = self.low_since_ns.take() else {
            return;
        };
        let duration = self.now_ns - start;
        if duration >= RESET_PULSE_NS {
            self.on_reset_release();
        } else {
            self.on_slot_release(duration < SLOT_ONE_NS);
        }
    }

    fn on_reset_release(&mut self) {
        self.stats.resets += 1;
        self.tap = TapState::RomByte { bits: 0, count: 0 };
        let now = self.now_ns;
        for device in &mut self.devices {
            device.on_reset(now);
        }
        if self.devices.is_empty() || self.plan.suppress_presence {
            trace!("reset released, no presence");
        } else {
            self.stats.presence_pulses += 1;
            self.pulled_until_ns = now + PRESENCE_HOLD_NS;
            trace!(devices = self.devices.len(), "reset released, presence");
        }
    }

    fn on_slot_release(&mut self, master_bit: bool) {
        self.stats.slots += 1;
        self.tap = tap_observe(self.tap, master_bit, &mut self.stats);
        let now = self.now_ns;
        let plan = self.plan;
        let mut pulls = false;
        for device in &mut self.devices {
            if device.on_slot(master_bit, now, &plan) == Some(false) {
                pulls = true;
            }
        }
        if pulls {
            self.pulled_until_ns = now + SLOT_HOLD_NS;
        }
    }
}

/// One cloneable handle onto the shared simulated bus.
#[derive(Clone)]
pub struct SimBus {
    inner: Rc<RefCell<BusInner>>,
}

impl SimBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_devices(Vec::new())
    }

    #[must_use]
    pub fn with_devices(devices: Vec<SimDevice>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(BusInner {
                now_ns: 0,
                low_since_ns: None,
                pulled_until_ns: 0,
                spu_since_ns: None,
                spu_holds: Vec::new(),
                devices,
                plan: FaultPlan::default(),
                stats: SimBusStats::default(),
                tap: TapState::Passive,
            })),
        }
    }

    pub fn attach(&mut self, device: SimDevice) {
        self.inner.borrow_mut().devices.push(device);
    }

    /// Replace the fault plan, effective from the next decoded event.
    pub fn set_plan(&mut self, plan: FaultPlan) {
        self.inner.borrow_mut().plan = plan;
    }

    #[must_use]
    pub fn stats(&self) -> SimBusStats {
        self.inner.borrow().stats
    }

    #[must_use]
    pub fn device_count(&self) -> usize {
        self.inner.borrow().devices.len()
    }

    #[must_use]
    pub fn snapshot(&self, index: usize) -> Option<DeviceSnapshot> {
        self.inner.borrow().devices.get(index).map(SimDevice::snapshot)
    }

    /// Virtual time elapsed, advanced only by the master's delays.
    #[must_use]
    pub fn now_ns(&self) -> u64 {
        self.inner.borrow().now_ns
    }

    /// Completed strong pull-up assertions as (on, off) instants.
    #[must_use]
    pub fn spu_holds(&self) -> Vec<(u64, u64)> {
        self.inner.borrow().spu_holds.clone()
    }

    /// Duration of the longest completed strong pull-up assertion.
    #[must_use]
    pub fn longest_spu_hold_ns(&self) -> u64 {
        self.inner
            .borrow()
            .spu_holds
            .iter()
            .map(|&(on, off)| off - on)
            .max()
            .unwrap_or(0)
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusWire for SimBus {
    fn drive_low(&mut self) {
        let mut inner = self.inner.borrow_mut();
        if inner.low_since_ns.is_none() {
            let now = inner.now_ns;
            inner.low_since_ns = Some(now);
        }
    }

    fn release(&mut self) {
        self.inner.borrow_mut().on_release();
    }

    fn is_high(&mut self) -> bool {
        let inner = self.inner.borrow();
        inner.low_since_ns.is_none() && inner.now_ns >= inner.pulled_until_ns
    }

    fn strong_pullup(&mut self, enabled: bool) {
        let mut inner = self.inner.borrow_mut();
        if enabled {
            if inner.spu_since_ns.is_none() {
                let now = inner.now_ns;
                inner.spu_since_ns = Some(now);
            }
        } else if let Some(on) = inner.spu_since_ns.take() {
            let off = inner.now_ns;
            inner.spu_holds.push((on, off));
        }
    }
}

impl DelayNs for SimBus {
    fn delay_ns(&mut self, ns: u32) {
        self.inner.borrow_mut().now_ns += u64::from(ns);
    }
}
