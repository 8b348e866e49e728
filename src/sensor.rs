//! Temperature sensor command layer: function commands, the scratchpad
//! record, and conversion sequencing for both powering schemes.
//!
//! Every operation here runs against one addressed device: reset, match
//! the identity, then the function command. Parasitically powered parts
//! draw their conversion current through the strong pull-up, which must
//! stay asserted for the whole conversion window; externally powered
//! parts are polled instead, with the bus reading busy (low) until the
//! conversion lands in the scratchpad.

use crate::bus::{commands as rom_commands, BusFault, OneWireBus};
use crate::crc::crc8;
use crate::hal::BusWire;
use crate::rom::RomCode;
use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};

/// Family code of the temperature sensors this layer speaks to.
pub const TEMPERATURE_FAMILY: u8 = 0x28;

/// Worst-case conversion time in milliseconds at full resolution. The
/// strong pull-up is held this long for parasitic parts.
pub const CONVERSION_TIME_MS: u32 = 750;

/// How long the scratchpad-to-EEPROM copy needs the strong pull-up.
pub const COPY_HOLD_MS: u32 = 10;

/// Read-slot budget when polling a powered device for completion. Sized
/// to outlast the worst-case conversion with margin: one slot is ~70 µs,
/// so this bound is roughly 840 ms of polling.
pub const DONE_POLL_SLOTS: u32 = 12_000;

/// Function commands understood by the temperature sensor family.
pub mod commands {
    /// Start a temperature conversion.
    pub const CONVERT_T: u8 = 0x44;
    /// Write alarm thresholds and the configuration byte.
    pub const WRITE_SCRATCHPAD: u8 = 0x4E;
    /// Stream the nine scratchpad bytes back.
    pub const READ_SCRATCHPAD: u8 = 0xBE;
    /// Commit thresholds and configuration to EEPROM.
    pub const COPY_SCRATCHPAD: u8 = 0x48;
    /// Reload thresholds and configuration from EEPROM.
    pub const RECALL_EEPROM: u8 = 0xB8;
}

/// Failure of a sensor transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    /// The transport failed underneath the transaction.
    Bus(BusFault),
    /// The scratchpad came back with a bad checksum; the reading is
    /// discarded.
    CrcMismatch,
    /// The device stayed busy past the polling budget.
    Timeout,
}

impl From<BusFault> for SensorError {
    fn from(fault: BusFault) -> Self {
        SensorError::Bus(fault)
    }
}

impl core::fmt::Display for SensorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SensorError::Bus(fault) => write!(f, "sensor transaction failed: {}", fault),
            SensorError::CrcMismatch => write!(f, "scratchpad failed checksum"),
            SensorError::Timeout => write!(f, "device busy past the polling budget"),
        }
    }
}

/// How the addressed device is powered, which decides how a conversion
/// is waited out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerMode {
    /// Powered from the data line; needs the strong pull-up during
    /// current-hungry operations and cannot be polled.
    Parasitic,
    /// Dedicated supply; answers completion polls on the data line.
    External,
}

/// A temperature in sixteenths of a degree, the sensor's native fixed
/// point. Negative values round toward negative infinity when split
/// into whole degrees and centidegrees, so -10.125 °C reads as -11
/// degrees plus 87 centidegrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Temperature {
    raw: i16,
}

impl Temperature {
    #[must_use]
    pub const fn from_raw(raw: i16) -> Self {
        Self { raw }
    }

    /// The raw two's-complement register value, 1/16 °C per LSB.
    #[must_use]
    pub const fn raw(&self) -> i16 {
        self.raw
    }

    /// Whole degrees, floored.
    #[must_use]
    pub const fn whole_degrees(&self) -> i16 {
        self.raw >> 4
    }

    /// Hundredths of a degree above the floored whole part, 0..=93.
    #[must_use]
    pub const fn centidegrees(&self) -> u8 {
        (((self.raw & 0x0F) as u16 * 100) >> 4) as u8
    }

    /// Millidegrees Celsius, floored.
    #[must_use]
    pub const fn millidegrees(&self) -> i32 {
        ((self.raw as i32) * 1000) >> 4
    }
}

impl core::fmt::Display for Temperature {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.whole_degrees(), self.centidegrees())
    }
}

/// Length of the scratchpad record in bytes.
pub const SCRATCHPAD_BYTES: usize = 9;

/// The nine-byte scratchpad: temperature register, alarm thresholds,
/// configuration, three reserved bytes, and a CRC-8 over the first
/// eight. The same accept rule as identity records applies: folding the
/// checksum over all nine bytes must come out zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scratchpad([u8; SCRATCHPAD_BYTES]);

impl Scratchpad {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; SCRATCHPAD_BYTES]) -> Self {
        Self(bytes)
    }

    /// Build a well-formed scratchpad image, computing the checksum.
    /// Useful for fixtures and simulated devices.
    #[must_use]
    pub fn assemble(raw: i16, alarm_high: i8, alarm_low: i8, config: u8) -> Self {
        let temp = raw.to_le_bytes();
        let mut bytes = [
            temp[0],
            temp[1],
            alarm_high as u8,
            alarm_low as u8,
            config,
            0xFF,
            0x0C,
            0x10,
            0,
        ];
        bytes[8] = crc8(&bytes[..8]);
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SCRATCHPAD_BYTES] {
        &self.0
    }

    /// True when the CRC-8 fold over all nine bytes comes out zero.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        crc8(&self.0) == 0
    }

    /// The temperature register, LSB first on the wire.
    #[must_use]
    pub const fn raw_temperature(&self) -> i16 {
        i16::from_le_bytes([self.0[0], self.0[1]])
    }

    #[must_use]
    pub const fn temperature(&self) -> Temperature {
        Temperature::from_raw(self.raw_temperature())
    }

    /// High alarm threshold in whole degrees.
    #[must_use]
    pub const fn alarm_high(&self) -> i8 {
        self.0[2] as i8
    }

    /// Low alarm threshold in whole degrees.
    #[must_use]
    pub const fn alarm_low(&self) -> i8 {
        self.0[3] as i8
    }

    #[must_use]
    pub const fn config(&self) -> u8 {
        self.0[4]
    }

    /// Conversion resolution encoded in the configuration byte, 9..=12
    /// bits.
    #[must_use]
    pub const fn resolution_bits(&self) -> u8 {
        9 + ((self.0[4] >> 5) & 0x03)
    }
}

/// Ask the addressed device how it is powered. Parasitic parts pull the
/// reply slot low; externally powered parts leave it high.
pub fn query_power<W, D>(bus: &mut OneWireBus<W, D>, id: &RomCode) -> Result<PowerMode, BusFault>
where
    W: BusWire,
    D: DelayNs,
{
    bus.match_identity(id)?;
    bus.write_byte(rom_commands::READ_POWER_SUPPLY);
    if bus.read_bit() {
        Ok(PowerMode::External)
    } else {
        Ok(PowerMode::Parasitic)
    }
}

/// Start a conversion on one device and wait for it to finish.
///
/// The powering scheme is queried first because it decides the wait: a
/// parasitic part gets the strong pull-up for the full conversion
/// window and cannot signal completion, a powered part is polled until
/// a read slot comes back high.
pub fn convert_temperature<W, D>(bus: &mut OneWireBus<W, D>, id: &RomCode) -> Result<(), SensorError>
where
    W: BusWire,
    D: DelayNs,
{
    let power = query_power(bus, id)?;
    bus.match_identity(id)?;
    bus.write_byte(commands::CONVERT_T);
    match power {
        PowerMode::Parasitic => {
            let mut pullup = bus.strong_pullup();
            pullup.hold_ms(CONVERSION_TIME_MS);
            Ok(())
        }
        PowerMode::External => wait_not_busy(bus),
    }
}

/// Read and validate the scratchpad of one device.
pub fn read_scratchpad<W, D>(bus: &mut OneWireBus<W, D>, id: &RomCode) -> Result<Scratchpad, SensorError>
where
    W: BusWire,
    D: DelayNs,
{
    bus.match_identity(id)?;
    bus.write_byte(commands::READ_SCRATCHPAD);
    let mut bytes = [0u8; SCRATCHPAD_BYTES];
    for byte in &mut bytes {
        *byte = bus.read_byte();
    }
    let pad = Scratchpad::from_bytes(bytes);
    if pad.is_valid() {
        Ok(pad)
    } else {
        Err(SensorError::CrcMismatch)
    }
}

/// Write alarm thresholds and the configuration byte. The device takes
/// all three bytes or none, so there is nothing to wait on afterwards.
pub fn write_scratchpad<W, D>(
    bus: &mut OneWireBus<W, D>,
    id: &RomCode,
    alarm_high: i8,
    alarm_low: i8,
    config: u8,
) -> Result<(), BusFault>
where
    W: BusWire,
    D: DelayNs,
{
    bus.match_identity(id)?;
    bus.write_byte(commands::WRITE_SCRATCHPAD);
    bus.write_byte(alarm_high as u8);
    bus.write_byte(alarm_low as u8);
    bus.write_byte(config);
    Ok(())
}

/// Commit thresholds and configuration to EEPROM. The copy draws real
/// programming current, so parasitic parts get the strong pull-up for
/// the copy window.
pub fn copy_scratchpad<W, D>(bus: &mut OneWireBus<W, D>, id: &RomCode) -> Result<(), SensorError>
where
    W: BusWire,
    D: DelayNs,
{
    let power = query_power(bus, id)?;
    bus.match_identity(id)?;
    bus.write_byte(commands::COPY_SCRATCHPAD);
    match power {
        PowerMode::Parasitic => {
            let mut pullup = bus.strong_pullup();
            pullup.hold_ms(COPY_HOLD_MS);
            Ok(())
        }
        PowerMode::External => wait_not_busy(bus),
    }
}

/// Reload thresholds and configuration from EEPROM into the scratchpad.
pub fn recall_eeprom<W, D>(bus: &mut OneWireBus<W, D>, id: &RomCode) -> Result<(), SensorError>
where
    W: BusWire,
    D: DelayNs,
{
    bus.match_identity(id)?;
    bus.write_byte(commands::RECALL_EEPROM);
    wait_not_busy(bus)
}

/// One full measurement: convert, read back, decode.
pub fn measure<W, D>(bus: &mut OneWireBus<W, D>, id: &RomCode) -> Result<Temperature, SensorError>
where
    W: BusWire,
    D: DelayNs,
{
    convert_temperature(bus, id)?;
    let pad = read_scratchpad(bus, id)?;
    Ok(pad.temperature())
}

fn wait_not_busy<W, D>(bus: &mut OneWireBus<W, D>) -> Result<(), SensorError>
where
    W: BusWire,
    D: DelayNs,
{
    for _ in 0..DONE_POLL_SLOTS {
        if bus.read_bit() {
            return Ok(());
        }
    }
    Err(SensorError::Timeout)
}
