//! Host-side simulation of the whole node: a software wire with
//! scripted devices hanging off it, an in-memory identity store, and a
//! fault plan for making the wire misbehave on purpose.
//!
//! The wire model decodes the same pulse shapes the firmware emits.
//! Nothing in here drives real time; the virtual clock only moves when
//! the bus engine asks for a delay, so a 750 ms conversion costs
//! nothing at the test prompt.

mod bus;
mod device;
mod fault;
mod nvm;

pub use bus::{SimBus, SimBusStats};
pub use device::{DeviceSnapshot, SimDevice};
pub use fault::FaultPlan;
pub use nvm::{SimNvm, SimNvmError, SIM_NVM_BYTES};
