//! The node agent: owns the bus engine, the identity cache, the task
//! scheduler, and the readiness flags, and turns consumed ticks into
//! task work.
//!
//! One call to [`NodeAgent::service`] consumes at most one hardware
//! tick, advances the scheduler by it, and runs whatever came due. Task
//! bodies that need the bus check the readiness and fault flags first;
//! a task that cannot run this cycle skips silently and its next
//! deadline is already armed, so the retry is free.

use crate::bus::OneWireBus;
use crate::cache::{RomCache, MAX_ROMS_PER_BANK};
use crate::flags::{Peripheral, StatusFlags};
use crate::hal::{BusWire, Nvm};
use crate::rom::{RomBank, RomCode};
use crate::scheduler::{SchedulerStats, TaskId, TaskScheduler};
use crate::search::{discover_into, DiscoverError};
use crate::sensor::{self, SensorError, Temperature};
use crate::tick::TickClock;
use embedded_hal::delay::DelayNs;
use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Default task cadences in scheduler ticks.
pub const HEARTBEAT_PERIOD: u16 = 500;
pub const POLL_PERIOD: u16 = 4_000;
pub const REPORT_PERIOD: u16 = 1_000;
pub const ALARM_SCAN_PERIOD: u16 = 10_000;

/// Readings capacity, one per cacheable identity.
pub const MAX_READINGS: usize = MAX_ROMS_PER_BANK;

/// Startup configuration: task cadences and which peripherals this
/// board actually has.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgentConfig {
    pub heartbeat_period: u16,
    pub poll_period: u16,
    pub report_period: u16,
    pub alarm_scan_period: u16,
    pub has_display: bool,
    pub has_aux_display: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            heartbeat_period: HEARTBEAT_PERIOD,
            poll_period: POLL_PERIOD,
            report_period: REPORT_PERIOD,
            alarm_scan_period: ALARM_SCAN_PERIOD,
            has_display: true,
            has_aux_display: false,
        }
    }
}

/// One decoded measurement from one cached identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub index: u8,
    pub identity: RomCode,
    pub temperature: Temperature,
}

/// Task completion counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AgentStats {
    pub heartbeats: u32,
    pub polls: u32,
    pub reports: u32,
    pub alarm_scans: u32,
    pub bus_faults: u32,
    pub crc_rejects: u32,
}

/// Snapshot assembled by the report task for whatever renders it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub uptime_seconds: u32,
    pub indicator: bool,
    /// Packed readiness/fault flags byte.
    pub flags: u8,
    pub devices: u8,
    pub alarms: u8,
    pub readings: Vec<Reading, MAX_READINGS>,
    pub scheduler: SchedulerStats,
    pub stats: AgentStats,
}

/// The firmware mainline in one value.
pub struct NodeAgent<'c, W, D, N> {
    // Bus and storage
    bus: OneWireBus<W, D>,
    cache: RomCache<N>,

    // Timing and dispatch
    scheduler: TaskScheduler,
    flags: StatusFlags,
    clock: &'c TickClock,

    // Agent state
    config: AgentConfig,
    indicator: bool,
    readings: Vec<Reading, MAX_READINGS>,
    stats: AgentStats,
}

impl<'c, W, D, N> NodeAgent<'c, W, D, N>
where
    W: BusWire,
    D: DelayNs,
    N: Nvm,
{
    pub fn new(wire: W, delay: D, nvm: N, clock: &'c TickClock, config: AgentConfig) -> Self {
        Self {
            bus: OneWireBus::new(wire, delay),
            cache: RomCache::new(nvm),
            scheduler: TaskScheduler::new(),
            flags: StatusFlags::new(),
            clock,
            config,
            indicator: false,
            readings: Vec::new(),
            stats: AgentStats::default(),
        }
    }

    /// Startup: register the task table, mark configured peripherals
    /// ready, probe the wire, and enumerate whatever answered.
    ///
    /// A wire that stays silent is not fatal. The bus-ready flag just
    /// never sets and every bus task skips until a reset is retried.
    pub fn init(&mut self) -> Result<(), AgentError<N::Error>> {
        self.scheduler
            .register(TaskId::Heartbeat, self.config.heartbeat_period)
            .map_err(AgentError::Schedule)?;
        self.scheduler
            .register(TaskId::Poll, self.config.poll_period)
            .map_err(AgentError::Schedule)?;
        self.scheduler
            .register(TaskId::Report, self.config.report_period)
            .map_err(AgentError::Schedule)?;
        self.scheduler
            .register(TaskId::AlarmScan, self.config.alarm_scan_period)
            .map_err(AgentError::Schedule)?;

        if self.config.has_display {
            self.flags.mark_ready(Peripheral::Display);
        }
        if self.config.has_aux_display {
            self.flags.mark_ready(Peripheral::AuxDisplay);
        }

        if self.bus.reset().is_ok() {
            self.flags.mark_ready(Peripheral::Bus);
            match discover_into(&mut self.bus, &mut self.cache, RomBank::Devices) {
                Ok(_count) => {}
                Err(DiscoverError::Bus(_)) => {
                    self.flags.raise_bus_fault();
                    self.stats.bus_faults += 1;
                }
                Err(DiscoverError::Nvm(err)) => return Err(AgentError::Nvm(err)),
            }
        }
        Ok(())
    }

    /// One mainline pass: consume at most one pending tick and run the
    /// tasks it made due. Returns the snapshot if the report task ran.
    pub fn service(&mut self) -> Result<Option<NodeReport>, AgentError<N::Error>> {
        if self.clock.consume_tick().is_none() {
            return Ok(None);
        }

        let due = self.scheduler.advance();
        let mut report = None;
        for task in due {
            match task {
                TaskId::Heartbeat => self.run_heartbeat(),
                TaskId::Poll => self.run_poll()?,
                TaskId::Report => report = self.run_report(),
                TaskId::AlarmScan => self.run_alarm_scan()?,
            }
        }
        Ok(report)
    }

    /// Re-enumerate a bank on demand, outside the scheduled cadence.
    pub fn discover(&mut self, bank: RomBank) -> Result<u8, DiscoverError<N::Error>> {
        discover_into(&mut self.bus, &mut self.cache, bank)
    }

    /// Cached identity lookup.
    pub fn identity(&mut self, bank: RomBank, index: u8) -> Result<RomCode, N::Error> {
        self.cache.get(bank, index)
    }

    #[must_use]
    pub fn get_stats(&self) -> &AgentStats {
        &self.stats
    }

    #[must_use]
    pub fn get_flags(&self) -> &StatusFlags {
        &self.flags
    }

    #[must_use]
    pub fn get_scheduler_stats(&self) -> &SchedulerStats {
        self.scheduler.get_stats()
    }

    #[must_use]
    pub fn get_readings(&self) -> &[Reading] {
        &self.readings
    }

    #[must_use]
    pub fn indicator_on(&self) -> bool {
        self.indicator
    }

    #[must_use]
    pub fn device_count(&self) -> u8 {
        self.cache.count(RomBank::Devices)
    }

    #[must_use]
    pub fn alarm_count(&self) -> u8 {
        self.cache.count(RomBank::Alarms)
    }

    #[must_use]
    pub fn cache(&self) -> &RomCache<N> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut RomCache<N> {
        &mut self.cache
    }

    pub fn bus_mut(&mut self) -> &mut OneWireBus<W, D> {
        &mut self.bus
    }

    fn run_heartbeat(&mut self) {
        self.indicator = !self.indicator;
        self.stats.heartbeats += 1;
    }

    /// Shared prerequisite for bus-touching tasks: the wire must have
    /// checked out at startup, and a pending fault swallows exactly one
    /// run.
    fn bus_task_ready(&mut self) -> bool {
        if !self.flags.is_ready(Peripheral::Bus) {
            self.scheduler.note_skip();
            return false;
        }
        if self.flags.take_bus_fault() {
            self.scheduler.note_skip();
            return false;
        }
        true
    }

    fn run_poll(&mut self) -> Result<(), AgentError<N::Error>> {
        if !self.bus_task_ready() {
            return Ok(());
        }

        let count = self.cache.count(RomBank::Devices);
        let mut fresh: Vec<Reading, MAX_READINGS> = Vec::new();
        for index in 0..count {
            let identity = self
                .cache
                .get(RomBank::Devices, index)
                .map_err(AgentError::Nvm)?;
            match sensor::measure(&mut self.bus, &identity) {
                Ok(temperature) => {
                    if fresh
                        .push(Reading {
                            index,
                            identity,
                            temperature,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(SensorError::CrcMismatch) => {
                    // Drop this device's sample, keep going.
                    self.stats.crc_rejects += 1;
                }
                Err(SensorError::Bus(_) | SensorError::Timeout) => {
                    // Abort the cycle; the previous readings stand.
                    self.flags.raise_bus_fault();
                    self.stats.bus_faults += 1;
                    return Ok(());
                }
            }
        }
        self.readings = fresh;
        self.stats.polls += 1;
        Ok(())
    }

    fn run_report(&mut self) -> Option<NodeReport> {
        if !self.flags.is_ready(Peripheral::Display) {
            self.scheduler.note_skip();
            return None;
        }
        self.stats.reports += 1;
        Some(NodeReport {
            uptime_seconds: self.clock.seconds(),
            indicator: self.indicator,
            flags: self.flags.as_byte(),
            devices: self.cache.count(RomBank::Devices),
            alarms: self.cache.count(RomBank::Alarms),
            readings: self.readings.clone(),
            scheduler: *self.scheduler.get_stats(),
            stats: self.stats,
        })
    }

    fn run_alarm_scan(&mut self) -> Result<(), AgentError<N::Error>> {
        if !self.bus_task_ready() {
            return Ok(());
        }
        match discover_into(&mut self.bus, &mut self.cache, RomBank::Alarms) {
            Ok(_count) => {
                self.stats.alarm_scans += 1;
                Ok(())
            }
            Err(DiscoverError::Bus(_)) => {
                self.flags.raise_bus_fault();
                self.stats.bus_faults += 1;
                Ok(())
            }
            Err(DiscoverError::Nvm(err)) => Err(AgentError::Nvm(err)),
        }
    }
}

/// Failures that escape a service cycle. Transport trouble never does;
/// it lands in the flags instead. What remains is the identity store
/// misbehaving or a bad task table at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentError<E> {
    Nvm(E),
    Schedule(&'static str),
}

impl<E: core::fmt::Debug> core::fmt::Display for AgentError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AgentError::Nvm(err) => write!(f, "identity store failed: {:?}", err),
            AgentError::Schedule(reason) => write!(f, "task registration failed: {}", reason),
        }
    }
}

#[cfg(feature = "std")]
impl<E: core::fmt::Debug> std::error::Error for AgentError<E> {}
