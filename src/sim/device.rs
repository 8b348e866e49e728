//! Behavioral model of one temperature sensor on the simulated wire.
//!
//! A device is a slot-level state machine. The bus decodes the master's
//! electrical activity into protocol slots and hands each one over with
//! the master's written bit; the device answers with the bit it drives
//! back, if any. Intra-slot timing stays the bus's concern, protocol
//! ordering lives here.

use crate::bus::commands as rom_commands;
use crate::rom::RomCode;
use crate::sensor::commands as function_commands;
use crate::sensor::{Scratchpad, SCRATCHPAD_BYTES, TEMPERATURE_FAMILY};
use tracing::debug;

use super::fault::FaultPlan;

/// Scratchpad temperature register until the first conversion lands.
const POWER_ON_RAW: i16 = 0x0550; // +85 °C

const DEFAULT_CONVERSION_NS: u64 = 750_000_000;
const COPY_BUSY_NS: u64 = 10_000_000;
const RECALL_BUSY_NS: u64 = 500_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchPhase {
    Bit,
    Complement,
    Steer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceState {
    /// Dropped out until the next reset.
    Idle,
    RomCommand { bits: u8, count: u8 },
    Search { position: u8, phase: SearchPhase },
    MatchIdentity { position: u8, matched: bool },
    StreamIdentity { position: u8 },
    Function { bits: u8, count: u8 },
    PowerReply,
    StreamScratchpad { image: [u8; SCRATCHPAD_BYTES], position: u8 },
    CollectScratchpad { bytes: [u8; 3], position: u8 },
    /// Drives read slots low until `busy_until_ns` passes.
    BusyPoll,
}

/// Point-in-time view of a device for assertions, identity included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub rom: RomCode,
    pub parasitic: bool,
    pub alarm: bool,
    /// Latched temperature register, sixteenths of a degree.
    pub temperature_raw: i16,
    pub alarm_high: i8,
    pub alarm_low: i8,
    pub config: u8,
    /// Persisted (threshold high, threshold low, config) triple.
    pub eeprom: (i8, i8, u8),
}

/// One simulated sensor: identity, powering scheme, thresholds, and the
/// conversion it will produce next.
#[derive(Debug, Clone)]
pub struct SimDevice {
    rom: RomCode,
    parasitic: bool,
    conversion_ns: u64,
    /// What the next conversion latches into the scratchpad.
    next_raw: i16,
    latched_raw: i16,
    alarm_high: i8,
    alarm_low: i8,
    config: u8,
    eeprom: (i8, i8, u8),
    alarm: bool,
    busy_until_ns: u64,
    conversion_pending: bool,
    state: DeviceState,
}

impl SimDevice {
    /// An externally powered sensor of the temperature family with the
    /// given serial. Thresholds default to the full scale, so it never
    /// alarms on its own.
    #[must_use]
    pub fn new(serial: [u8; 6]) -> Self {
        Self::with_rom(RomCode::with_checksum(TEMPERATURE_FAMILY, serial))
    }

    /// A device with a fully specified identity record.
    #[must_use]
    pub fn with_rom(rom: RomCode) -> Self {
        Self {
            rom,
            parasitic: false,
            conversion_ns: DEFAULT_CONVERSION_NS,
            next_raw: 0x0191, // +25.0625 °C
            latched_raw: POWER_ON_RAW,
            alarm_high: 125,
            alarm_low: -55,
            config: 0x7F,
            eeprom: (125, -55, 0x7F),
            alarm: false,
            busy_until_ns: 0,
            conversion_pending: false,
            state: DeviceState::Idle,
        }
    }

    /// Set the raw value the next conversion produces.
    #[must_use]
    pub fn with_temperature(mut self, raw: i16) -> Self {
        self.next_raw = raw;
        self
    }

    /// Power the device from the data line instead of a supply pin.
    #[must_use]
    pub fn parasitic(mut self) -> Self {
        self.parasitic = true;
        self
    }

    /// Preset the alarm latch, as if a past conversion went out of range.
    #[must_use]
    pub fn alarming(mut self) -> Self {
        self.alarm = true;
        self
    }

    /// Alarm thresholds in whole degrees.
    #[must_use]
    pub fn with_thresholds(mut self, high: i8, low: i8) -> Self {
        self.alarm_high = high;
        self.alarm_low = low;
        self
    }

    /// Conversion time, for tests that poll rather than wait 750 ms of
    /// virtual time.
    #[must_use]
    pub fn with_conversion_time_ms(mut self, ms: u32) -> Self {
        self.conversion_ns = u64::from(ms) * 1_000_000;
        self
    }

    #[must_use]
    pub fn rom(&self) -> &RomCode {
        &self.rom
    }

    #[must_use]
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            rom: self.rom,
            parasitic: self.parasitic,
            alarm: self.alarm,
            temperature_raw: self.latched_raw,
            alarm_high: self.alarm_high,
            alarm_low: self.alarm_low,
            config: self.config,
            eeprom: self.eeprom,
        }
    }

    /// A reset pulse ended: settle any finished conversion and arm for
    /// the next ROM command. Every device answers a reset regardless of
    /// what it was doing.
    pub(crate) fn on_reset(&mut self, now_ns: u64) {
        self.settle(now_ns);
        self.state = DeviceState::RomCommand { bits: 0, count: 0 };
    }

    /// One decoded slot. `master_bit` is what the master wrote (a read
    /// slot writes 1); the return value is the bit this device drives
    /// back, `None` when it leaves the line alone.
    pub(crate) fn on_slot(&mut self, master_bit: bool, now_ns: u64, plan: &FaultPlan) -> Option<bool> {
        self.settle(now_ns);
        match self.state {
            DeviceState::Idle => None,

            DeviceState::RomCommand { mut bits, count } => {
                if master_bit {
                    bits |= 1 << count;
                }
                if count == 7 {
                    self.dispatch_rom_command(bits);
                } else {
                    self.state = DeviceState::RomCommand { bits, count: count + 1 };
                }
                None
            }

            DeviceState::Search { position, phase } => {
                if plan.silence_search_at_bit.is_some_and(|cut| position >= cut) {
                    self.state = DeviceState::Idle;
                    return None;
                }
                let mut bit = self.rom.bit(position);
                if plan.corrupt_search_bit == Some(position) {
                    bit = !bit;
                }
                match phase {
                    SearchPhase::Bit => {
                        self.state = DeviceState::Search {
                            position,
                            phase: SearchPhase::Complement,
                        };
                        drive(bit)
                    }
                    SearchPhase::Complement => {
                        self.state = DeviceState::Search {
                            position,
                            phase: SearchPhase::Steer,
                        };
                        drive(!bit)
                    }
                    SearchPhase::Steer => {
                        self.state = if master_bit != bit {
                            // Steered down the other branch: out until
                            // the next reset.
                            DeviceState::Idle
                        } else if position == 63 {
                            DeviceState::Function { bits: 0, count: 0 }
                        } else {
                            DeviceState::Search {
                                position: position + 1,
                                phase: SearchPhase::Bit,
                            }
                        };
                        None
                    }
                }
            }

            DeviceState::MatchIdentity { position, matched } => {
                let still = matched && master_bit == self.rom.bit(position);
                self.state = if position == 63 {
                    if still {
                        DeviceState::Function { bits: 0, count: 0 }
                    } else {
                        DeviceState::Idle
                    }
                } else {
                    DeviceState::MatchIdentity {
                        position: position + 1,
                        matched: still,
                    }
                };
                None
            }

            DeviceState::StreamIdentity { position } => {
                let bit = self.rom.bit(position);
                self.state = if position == 63 {
                    DeviceState::Function { bits: 0, count: 0 }
                } else {
                    DeviceState::StreamIdentity { position: position + 1 }
                };
                drive(bit)
            }

            DeviceState::Function { mut bits, count } => {
                if master_bit {
                    bits |= 1 << count;
                }
                if count == 7 {
                    self.dispatch_function(bits, now_ns, plan);
                } else {
                    self.state = DeviceState::Function { bits, count: count + 1 };
                }
                None
            }

            DeviceState::PowerReply => {
                self.state = DeviceState::Idle;
                if self.parasitic {
                    Some(false)
                } else {
                    None
                }
            }

            DeviceState::StreamScratchpad { image, position } => {
                let byte = image[usize::from(position / 8)];
                let bit = (byte >> (position % 8)) & 0x01 != 0;
                self.state = if position == 71 {
                    DeviceState::Idle
                } else {
                    DeviceState::StreamScratchpad {
                        image,
                        position: position + 1,
                    }
                };
                drive(bit)
            }

            DeviceState::CollectScratchpad { mut bytes, position } => {
                if master_bit {
                    bytes[usize::from(position / 8)] |= 1 << (position % 8);
                }
                if position == 23 {
                    self.alarm_high = bytes[0] as i8;
                    self.alarm_low = bytes[1] as i8;
                    self.config = bytes[2];
                    self.state = DeviceState::Idle;
                } else {
                    self.state = DeviceState::CollectScratchpad {
                        bytes,
                        position: position + 1,
                    };
                }
                None
            }

            DeviceState::BusyPoll => {
                if now_ns < self.busy_until_ns {
                    Some(false)
                } else {
                    None
                }
            }
        }
    }

    fn dispatch_rom_command(&mut self, byte: u8) {
        self.state = match byte {
            rom_commands::SEARCH_ROM => DeviceState::Search {
                position: 0,
                phase: SearchPhase::Bit,
            },
            rom_commands::SEARCH_ALARM if self.alarm => DeviceState::Search {
                position: 0,
                phase: SearchPhase::Bit,
            },
            rom_commands::MATCH_ROM => DeviceState::MatchIdentity {
                position: 0,
                matched: true,
            },
            rom_commands::SKIP_ROM => DeviceState::Function { bits: 0, count: 0 },
            rom_commands::READ_ROM => DeviceState::StreamIdentity { position: 0 },
            _ => DeviceState::Idle,
        };
    }

    fn dispatch_function(&mut self, byte: u8, now_ns: u64, plan: &FaultPlan) {
        match byte {
            function_commands::CONVERT_T => {
                self.busy_until_ns = now_ns + self.conversion_ns;
                self.conversion_pending = true;
                self.state = DeviceState::BusyPoll;
                debug!(
                    rom = %self.rom,
                    busy_ms = self.conversion_ns / 1_000_000,
                    "conversion started"
                );
            }
            function_commands::READ_SCRATCHPAD => {
                let mut image = *Scratchpad::assemble(
                    self.latched_raw,
                    self.alarm_high,
                    self.alarm_low,
                    self.config,
                )
                .as_bytes();
                if plan.corrupt_scratchpad {
                    image[8] ^= 0x01;
                }
                self.state = DeviceState::StreamScratchpad { image, position: 0 };
            }
            function_commands::WRITE_SCRATCHPAD => {
                self.state = DeviceState::CollectScratchpad {
                    bytes: [0; 3],
                    position: 0,
                };
            }
            function_commands::COPY_SCRATCHPAD => {
                self.eeprom = (self.alarm_high, self.alarm_low, self.config);
                self.busy_until_ns = now_ns + COPY_BUSY_NS;
                self.state = DeviceState::BusyPoll;
            }
            function_commands::RECALL_EEPROM => {
                let (high, low, config) = self.eeprom;
                self.alarm_high = high;
                self.alarm_low = low;
                self.config = config;
                self.busy_until_ns = now_ns + RECALL_BUSY_NS;
                self.state = DeviceState::BusyPoll;
            }
            rom_commands::READ_POWER_SUPPLY => {
                self.state = DeviceState::PowerReply;
            }
            _ => {
                self.state = DeviceState::Idle;
            }
        }
    }

    /// Latch a finished conversion and recompute the alarm condition.
    /// The comparison uses whole degrees, matching the threshold
    /// registers' resolution.
    fn settle(&mut self, now_ns: u64) {
        if self.conversion_pending && now_ns >= self.busy_until_ns {
            self.conversion_pending = false;
            self.latched_raw = self.next_raw;
            let whole = (self.latched_raw >> 4) as i8;
            self.alarm = whole > self.alarm_high || whole < self.alarm_low;
            debug!(
                rom = %self.rom,
                raw = self.latched_raw,
                alarm = self.alarm,
                "conversion latched"
            );
        }
    }
}

fn drive(bit: bool) -> Option<bool> {
    if bit {
        None
    } else {
        Some(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_FAULTS: FaultPlan = FaultPlan {
        suppress_presence: false,
        silence_search_at_bit: None,
        corrupt_search_bit: None,
        corrupt_scratchpad: false,
    };

    fn send_byte(device: &mut SimDevice, byte: u8, now: u64) {
        for shift in 0..8 {
            let _ = device.on_slot((byte >> shift) & 0x01 != 0, now, &NO_FAULTS);
        }
    }

    fn send_identity(device: &mut SimDevice, rom: &RomCode, now: u64) {
        for &byte in rom.as_bytes() {
            send_byte(device, byte, now);
        }
    }

    /// Clock eight read slots and reassemble the byte the device served.
    fn collect_byte(device: &mut SimDevice, now: u64) -> u8 {
        let mut byte = 0u8;
        for shift in 0..8 {
            if device.on_slot(true, now, &NO_FAULTS) != Some(false) {
                byte |= 1 << shift;
            }
        }
        byte
    }

    #[test]
    fn read_rom_streams_the_full_identity() {
        let mut device = SimDevice::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let expected = *device.rom();

        device.on_reset(0);
        send_byte(&mut device, rom_commands::READ_ROM, 0);
        let mut bytes = [0u8; 8];
        for byte in &mut bytes {
            *byte = collect_byte(&mut device, 0);
        }

        assert_eq!(RomCode::from_bytes(bytes), expected);
    }

    #[test]
    fn matched_device_serves_its_scratchpad() {
        let mut device = SimDevice::new([1, 2, 3, 4, 5, 6]);
        let rom = *device.rom();

        device.on_reset(0);
        send_byte(&mut device, rom_commands::MATCH_ROM, 0);
        send_identity(&mut device, &rom, 0);
        send_byte(&mut device, function_commands::READ_SCRATCHPAD, 0);

        let mut bytes = [0u8; SCRATCHPAD_BYTES];
        for byte in &mut bytes {
            *byte = collect_byte(&mut device, 0);
        }
        let pad = Scratchpad::from_bytes(bytes);
        assert!(pad.is_valid());
        assert_eq!(pad.raw_temperature(), POWER_ON_RAW);
    }

    #[test]
    fn mismatched_identity_silences_the_device() {
        let mut device = SimDevice::new([1, 2, 3, 4, 5, 6]);
        let other = RomCode::with_checksum(TEMPERATURE_FAMILY, [9, 9, 9, 9, 9, 9]);

        device.on_reset(0);
        send_byte(&mut device, rom_commands::MATCH_ROM, 0);
        send_identity(&mut device, &other, 0);
        send_byte(&mut device, function_commands::READ_SCRATCHPAD, 0);

        for _ in 0..72 {
            assert_eq!(device.on_slot(true, 0, &NO_FAULTS), None);
        }
    }

    #[test]
    fn conversion_holds_busy_then_latches() {
        let mut device = SimDevice::new([1, 2, 3, 4, 5, 6])
            .with_temperature(0x0191)
            .with_conversion_time_ms(2);
        let rom = *device.rom();

        device.on_reset(0);
        send_byte(&mut device, rom_commands::SKIP_ROM, 0);
        send_byte(&mut device, function_commands::CONVERT_T, 0);

        // Busy while converting, released once the window passes.
        assert_eq!(device.on_slot(true, 1_000_000, &NO_FAULTS), Some(false));
        assert_eq!(device.on_slot(true, 2_000_001, &NO_FAULTS), None);

        device.on_reset(2_000_001);
        send_byte(&mut device, rom_commands::MATCH_ROM, 2_000_001);
        send_identity(&mut device, &rom, 2_000_001);
        send_byte(&mut device, function_commands::READ_SCRATCHPAD, 2_000_001);
        let mut bytes = [0u8; SCRATCHPAD_BYTES];
        for byte in &mut bytes {
            *byte = collect_byte(&mut device, 2_000_001);
        }
        assert_eq!(Scratchpad::from_bytes(bytes).raw_temperature(), 0x0191);
    }

    #[test]
    fn out_of_range_conversion_raises_the_alarm_latch() {
        let mut device = SimDevice::new([1, 2, 3, 4, 5, 6])
            .with_temperature(0x0320) // +50 °C
            .with_thresholds(40, -10)
            .with_conversion_time_ms(1);

        device.on_reset(0);
        send_byte(&mut device, rom_commands::SKIP_ROM, 0);
        send_byte(&mut device, function_commands::CONVERT_T, 0);
        device.on_reset(2_000_000);

        assert!(device.snapshot().alarm);
    }

    #[test]
    fn in_range_conversion_clears_the_alarm_latch() {
        let mut device = SimDevice::new([1, 2, 3, 4, 5, 6])
            .alarming()
            .with_temperature(0x0191)
            .with_thresholds(75, -20)
            .with_conversion_time_ms(1);

        device.on_reset(0);
        send_byte(&mut device, rom_commands::SKIP_ROM, 0);
        send_byte(&mut device, function_commands::CONVERT_T, 0);
        device.on_reset(2_000_000);

        assert!(!device.snapshot().alarm);
    }

    #[test]
    fn only_alarming_devices_join_the_alarm_search() {
        let mut quiet = SimDevice::new([1, 2, 3, 4, 5, 6]);
        quiet.on_reset(0);
        send_byte(&mut quiet, rom_commands::SEARCH_ALARM, 0);
        assert_eq!(quiet.on_slot(true, 0, &NO_FAULTS), None);
        assert_eq!(quiet.on_slot(true, 0, &NO_FAULTS), None);

        let mut loud = SimDevice::new([1, 2, 3, 4, 5, 6]).alarming();
        let first_bit = loud.rom().bit(0);
        loud.on_reset(0);
        send_byte(&mut loud, rom_commands::SEARCH_ALARM, 0);
        // Bit slot then complement slot: exactly one of them drives.
        assert_eq!(loud.on_slot(true, 0, &NO_FAULTS).is_some(), !first_bit);
        assert_eq!(loud.on_slot(true, 0, &NO_FAULTS).is_some(), first_bit);
    }

    #[test]
    fn steering_away_drops_the_device_until_reset() {
        let mut device = SimDevice::new([1, 2, 3, 4, 5, 6]);
        let first_bit = device.rom().bit(0);

        device.on_reset(0);
        send_byte(&mut device, rom_commands::SEARCH_ROM, 0);
        let _ = device.on_slot(true, 0, &NO_FAULTS);
        let _ = device.on_slot(true, 0, &NO_FAULTS);
        // Master steers down the branch this device is not on.
        let _ = device.on_slot(!first_bit, 0, &NO_FAULTS);

        for _ in 0..6 {
            assert_eq!(device.on_slot(true, 0, &NO_FAULTS), None);
        }

        device.on_reset(0);
        send_byte(&mut device, rom_commands::SEARCH_ROM, 0);
        assert_eq!(device.on_slot(true, 0, &NO_FAULTS).is_some(), !first_bit);
    }

    #[test]
    fn write_scratchpad_updates_thresholds_and_config() {
        let mut device = SimDevice::new([1, 2, 3, 4, 5, 6]);
        let rom = *device.rom();

        device.on_reset(0);
        send_byte(&mut device, rom_commands::MATCH_ROM, 0);
        send_identity(&mut device, &rom, 0);
        send_byte(&mut device, function_commands::WRITE_SCRATCHPAD, 0);
        send_byte(&mut device, 75, 0);
        send_byte(&mut device, 0xEC, 0); // -20 as a wire byte
        send_byte(&mut device, 0x1F, 0);

        let snap = device.snapshot();
        assert_eq!(snap.alarm_high, 75);
        assert_eq!(snap.alarm_low, -20);
        assert_eq!(snap.config, 0x1F);
        // EEPROM untouched until an explicit copy.
        assert_eq!(snap.eeprom, (125, -55, 0x7F));
    }

    #[test]
    fn copy_and_recall_round_trip_through_eeprom() {
        let mut device = SimDevice::new([1, 2, 3, 4, 5, 6]);
        let rom = *device.rom();

        device.on_reset(0);
        send_byte(&mut device, rom_commands::MATCH_ROM, 0);
        send_identity(&mut device, &rom, 0);
        send_byte(&mut device, function_commands::WRITE_SCRATCHPAD, 0);
        send_byte(&mut device, 60, 0);
        send_byte(&mut device, 0, 0);
        send_byte(&mut device, 0x3F, 0);

        device.on_reset(0);
        send_byte(&mut device, rom_commands::MATCH_ROM, 0);
        send_identity(&mut device, &rom, 0);
        send_byte(&mut device, function_commands::COPY_SCRATCHPAD, 0);
        assert_eq!(device.snapshot().eeprom, (60, 0, 0x3F));

        // Clobber the scratchpad, then recall the persisted triple.
        let later = 100_000_000;
        device.on_reset(later);
        send_byte(&mut device, rom_commands::MATCH_ROM, later);
        send_identity(&mut device, &rom, later);
        send_byte(&mut device, function_commands::WRITE_SCRATCHPAD, later);
        send_byte(&mut device, 1, later);
        send_byte(&mut device, 2, later);
        send_byte(&mut device, 0x7F, later);

        device.on_reset(later);
        send_byte(&mut device, rom_commands::MATCH_ROM, later);
        send_identity(&mut device, &rom, later);
        send_byte(&mut device, function_commands::RECALL_EEPROM, later);
        let _ = device.on_slot(true, later + RECALL_BUSY_NS + 1, &NO_FAULTS);

        let snap = device.snapshot();
        assert_eq!((snap.alarm_high, snap.alarm_low, snap.config), (60, 0, 0x3F));
    }

    #[test]
    fn power_reply_pulls_low_only_for_parasitic_parts() {
        for (parasitic, expected) in [(false, None), (true, Some(false))] {
            let mut device = SimDevice::new([1, 2, 3, 4, 5, 6]);
            if parasitic {
                device = device.parasitic();
            }
            let rom = *device.rom();

            device.on_reset(0);
            send_byte(&mut device, rom_commands::MATCH_ROM, 0);
            send_identity(&mut device, &rom, 0);
            send_byte(&mut device, rom_commands::READ_POWER_SUPPLY, 0);

            assert_eq!(device.on_slot(true, 0, &NO_FAULTS), expected);
        }
    }

    #[test]
    fn corrupt_scratchpad_plan_breaks_the_checksum() {
        let plan = FaultPlan {
            corrupt_scratchpad: true,
            ..FaultPlan::default()
        };
        let mut device = SimDevice::new([1, 2, 3, 4, 5, 6]);

        device.on_reset(0);
        send_byte(&mut device, rom_commands::SKIP_ROM, 0);
        // The fault lands when the command byte dispatches, so its slots
        // must carry the plan.
        for shift in 0..8 {
            let bit = (function_commands::READ_SCRATCHPAD >> shift) & 0x01 != 0;
            let _ = device.on_slot(bit, 0, &plan);
        }

        let mut bytes = [0u8; SCRATCHPAD_BYTES];
        for byte in &mut bytes {
            let mut value = 0u8;
            for shift in 0..8 {
                if device.on_slot(true, 0, &plan) != Some(false) {
                    value |= 1 << shift;
                }
            }
            *byte = value;
        }
        assert!(!Scratchpad::from_bytes(bytes).is_valid());
    }
}
