//! # One-Wire Sensor Node Core
//!
//! Firmware core for a node that owns a single shared-signal-wire
//! sensor bus: bit-banged transport with microsecond slot timing,
//! recursion-free device discovery, an idempotent identity cache in
//! non-volatile memory, and a tick-driven cooperative task loop.
//!
//! ## Features
//!
//! - **Exact-timing transport**: reset/presence handshake and bit slots
//!   driven through an open-drain wire, generic over any delay provider
//! - **Recursion-free discovery**: the binary identity tree walked with
//!   a 9-byte cursor instead of a call stack
//! - **Idempotent identity cache**: discovered identities persisted to
//!   NVM only when they change, so re-discovery costs zero writes
//! - **Temperature transactions**: conversion with parasite-power
//!   handling, scratchpad read/write, CRC-checked end to end
//! - **Tick-driven tasking**: an ISR-fed tick counter feeding a
//!   fixed-size scheduler, no allocator anywhere in the core
//! - **Host simulation**: a scripted wire with virtual time, so bus
//!   traffic down to single slots is testable on a desktop
//!
//! ## Quick Start
//!
//! ```rust
//! use owbus::sim::{SimBus, SimDevice, SimNvm};
//! use owbus::{AgentConfig, NodeAgent, TickClock};
//!
//! // A software wire with one sensor attached.
//! let mut bus = SimBus::new();
//! bus.attach(SimDevice::new([0x01, 0x00, 0x00, 0x00, 0x00, 0x00]));
//!
//! let clock = TickClock::new();
//! let mut agent = NodeAgent::new(
//!     bus.clone(),
//!     bus.clone(),
//!     SimNvm::new(),
//!     &clock,
//!     AgentConfig::default(),
//! );
//!
//! // Probe the wire and enumerate the attached devices.
//! agent.init().unwrap();
//! assert_eq!(agent.device_count(), 1);
//!
//! // Feed a tick as the timer interrupt would, then run the mainline.
//! clock.tick_from_isr();
//! if let Some(report) = agent.service().unwrap() {
//!     println!("uptime: {}s", report.uptime_seconds);
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`bus`] - reset/presence handshake and bit-slot transport
//! - [`rom`] - 64-bit identities and their checksum rules
//! - [`search`] - binary-tree enumeration over the bus
//! - [`cache`] - identity tables in non-volatile memory
//! - [`sensor`] - temperature conversion and scratchpad access
//! - [`tick`] / [`scheduler`] - ISR-fed time base and task dispatch
//! - [`agent`] - the mainline tying all of the above together
//! - [`sim`] - host-side wire, devices, and NVM for tests and the
//!   simulator binary

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::trivially_copy_pass_by_ref)]
#![allow(clippy::uninlined_format_args)]

pub mod agent;
pub mod bus;
pub mod cache;
pub mod crc;
pub mod flags;
pub mod hal;
pub mod rom;
pub mod scheduler;
pub mod search;
pub mod sensor;
pub mod tick;

#[cfg(feature = "std")]
pub mod sim;

// Re-export main public types for convenience
pub use agent::{AgentConfig, AgentError, NodeAgent, NodeReport, Reading};
pub use bus::{BusFault, OneWireBus, Presence};
pub use cache::{RomCache, StoreOutcome};
pub use crc::crc8;
pub use flags::{Peripheral, StatusFlags};
pub use hal::{BusWire, Nvm};
pub use rom::{RomBank, RomCode};
pub use scheduler::{TaskId, TaskScheduler};
pub use search::{discover_into, RomSearch, SearchCursor};
pub use sensor::{Scratchpad, Temperature};
pub use tick::TickClock;
