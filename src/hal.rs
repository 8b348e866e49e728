//! Hardware seams: the signal wire, the non-volatile store, and an adapter
//! for `embedded-hal` pins.
//!
//! The firmware core never touches registers directly. The bus engine sees
//! one open-drain line through [`BusWire`]; the identity cache sees bytes
//! at addresses through [`Nvm`]. Production wires these to real pins and an
//! EEPROM driver; tests and the host simulator plug in software fakes.

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

/// One shared open-drain signal line with an idle pull-up and an optional
/// low-impedance strong pull-up.
///
/// `drive_low` asserts the line; `release` lets the pull-up raise it. The
/// line state read by `is_high` is the wired-AND of every driver on the
/// bus, which is what makes multi-device discovery possible.
pub trait BusWire {
    fn drive_low(&mut self);
    fn release(&mut self);
    fn is_high(&mut self) -> bool;

    /// Switch the strong pull-up on or off. Devices drawing their power
    /// from the line need it held through current-hungry operations.
    fn strong_pullup(&mut self, enabled: bool);
}

/// Byte-addressed non-volatile storage, synchronous and blocking.
///
/// The driver behind this trait owns wear and timing concerns; callers
/// here only ever issue whole-record reads and writes.
pub trait Nvm {
    type Error: core::fmt::Debug;

    fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error>;
    fn write(&mut self, addr: u16, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// Placeholder supply pin for buses wired without a strong pull-up FET.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStrongPullup;

impl ErrorType for NoStrongPullup {
    type Error = core::convert::Infallible;
}

impl OutputPin for NoStrongPullup {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// [`BusWire`] over `embedded-hal` 1.0 pins.
///
/// `line` must be configured open-drain: `set_low` sinks the bus,
/// `set_high` releases it to the pull-up, and the input side reads the
/// actual line level. `pullup` drives the strong pull-up FET gate when the
/// board has one.
pub struct OpenDrainWire<P, S = NoStrongPullup> {
    line: P,
    pullup: Option<S>,
}

impl<P> OpenDrainWire<P>
where
    P: OutputPin + InputPin,
{
    pub fn new(line: P) -> Self {
        Self { line, pullup: None }
    }
}

impl<P, S> OpenDrainWire<P, S>
where
    P: OutputPin + InputPin,
    S: OutputPin,
{
    pub fn with_strong_pullup(line: P, pullup: S) -> Self {
        Self {
            line,
            pullup: Some(pullup),
        }
    }

    /// Hand the pins back, releasing the line first.
    pub fn free(mut self) -> (P, Option<S>) {
        let _ = self.line.set_high();
        (self.line, self.pullup)
    }
}

impl<P, S> BusWire for OpenDrainWire<P, S>
where
    P: OutputPin + InputPin,
    S: OutputPin,
{
    fn drive_low(&mut self) {
        let _ = self.line.set_low();
    }

    fn release(&mut self) {
        let _ = self.line.set_high();
    }

    fn is_high(&mut self) -> bool {
        // A failed pin read reports the line as released; callers then see
        // "no presence" rather than a phantom device.
        self.line.is_high().unwrap_or(true)
    }

    fn strong_pullup(&mut self, enabled: bool) {
        if let Some(pullup) = self.pullup.as_mut() {
            if enabled {
                let _ = pullup.set_high();
            } else {
                let _ = pullup.set_low();
            }
        }
    }
}
