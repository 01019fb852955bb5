//! Switched power rails
//!
//! Sensors on a field logger are powered through GPIO-driven switches so
//! they draw nothing between readings. Several sensors often hang off one
//! switch. The scheduler never touches a pin directly: each sensor drives
//! its own pins through a [`PowerRail`] after the array has checked that
//! no other sensor still needs the same pin.
//!
//! Sensors name pins by number, so a rail is a numbered bank of
//! `embedded-hal` output pins ([`PinBank`]). Reading the output latch back
//! through [`StatefulOutputPin`] is what lets a sensor see that a sharer
//! already switched the rail on.

use core::cell::RefCell;

use embedded_hal::digital::{Error as _, ErrorKind, ErrorType, OutputPin, StatefulOutputPin};
use thiserror_no_std::Error;

/// Board pin number
pub type PinNumber = u8;

/// Errors from switching a power pin
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerError {
    /// No pin with this number on the rail
    #[error("Pin {pin} is not on this rail")]
    UnknownPin {
        /// Requested pin
        pin: PinNumber,
    },

    /// The pin driver reported a failure
    #[error("Pin {pin} failed: {kind:?}")]
    Pin {
        /// Failing pin
        pin: PinNumber,
        /// What the driver reported
        kind: ErrorKind,
    },

    /// The rail is already being switched (re-entrant call)
    #[error("Rail busy while switching pin {pin}")]
    Busy {
        /// Requested pin
        pin: PinNumber,
    },
}

#[cfg(feature = "defmt")]
impl defmt::Format for PowerError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::UnknownPin { pin } => defmt::write!(fmt, "Unknown pin {}", pin),
            Self::Pin { pin, .. } => defmt::write!(fmt, "Pin {} failed", pin),
            Self::Busy { pin } => defmt::write!(fmt, "Rail busy at pin {}", pin),
        }
    }
}

/// Digital outputs that switch sensor power
pub trait PowerRail {
    /// Drive `pin` high (powered) or low
    fn set_pin(&self, pin: PinNumber, high: bool) -> Result<(), PowerError>;

    /// Read back the current output level of `pin`
    fn is_pin_high(&self, pin: PinNumber) -> Result<bool, PowerError>;
}

impl<T: PowerRail + ?Sized> PowerRail for &T {
    fn set_pin(&self, pin: PinNumber, high: bool) -> Result<(), PowerError> {
        (**self).set_pin(pin, high)
    }

    fn is_pin_high(&self, pin: PinNumber) -> Result<bool, PowerError> {
        (**self).is_pin_high(pin)
    }
}

/// `N` output pins addressed by their index
///
/// Sensors share the bank by reference; switching goes through a
/// `RefCell`, so the bank is meant for the single-threaded scheduler.
pub struct PinBank<P, const N: usize> {
    pins: RefCell<[P; N]>,
}

impl<P: StatefulOutputPin, const N: usize> PinBank<P, N> {
    /// Bank over `pins`; pin number `i` is `pins[i]`
    pub fn new(pins: [P; N]) -> Self {
        Self { pins: RefCell::new(pins) }
    }

    /// Give the pins back
    pub fn release(self) -> [P; N] {
        self.pins.into_inner()
    }

    fn with_pin<T>(
        &self,
        pin: PinNumber,
        op: impl FnOnce(&mut P) -> Result<T, P::Error>,
    ) -> Result<T, PowerError> {
        let mut pins = self.pins.try_borrow_mut().map_err(|_| PowerError::Busy { pin })?;
        let output = pins.get_mut(pin as usize).ok_or(PowerError::UnknownPin { pin })?;
        op(output).map_err(|e| PowerError::Pin { pin, kind: e.kind() })
    }
}

impl<P: StatefulOutputPin, const N: usize> PowerRail for PinBank<P, N> {
    fn set_pin(&self, pin: PinNumber, high: bool) -> Result<(), PowerError> {
        self.with_pin(pin, |p| if high { p.set_high() } else { p.set_low() })
    }

    fn is_pin_high(&self, pin: PinNumber) -> Result<bool, PowerError> {
        self.with_pin(pin, |p| p.is_set_high())
    }
}

impl<P: Default, const N: usize> Default for PinBank<P, N> {
    fn default() -> Self {
        Self { pins: RefCell::new(core::array::from_fn(|_| P::default())) }
    }
}

/// Failure injected into a [`MockPin`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockPinFault;

impl embedded_hal::digital::Error for MockPinFault {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Output pin for tests: remembers its level and counts transitions
#[derive(Debug, Default, Clone, Copy)]
pub struct MockPin {
    high: bool,
    raised: u16,
    cut: u16,
    faulty: bool,
}

impl ErrorType for MockPin {
    type Error = MockPinFault;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), MockPinFault> {
        if self.faulty {
            return Err(MockPinFault);
        }
        if self.high {
            self.cut = self.cut.saturating_add(1);
        }
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), MockPinFault> {
        if self.faulty {
            return Err(MockPinFault);
        }
        if !self.high {
            self.raised = self.raised.saturating_add(1);
        }
        self.high = true;
        Ok(())
    }
}

impl StatefulOutputPin for MockPin {
    fn is_set_high(&mut self) -> Result<bool, MockPinFault> {
        if self.faulty {
            return Err(MockPinFault);
        }
        Ok(self.high)
    }

    fn is_set_low(&mut self) -> Result<bool, MockPinFault> {
        self.is_set_high().map(|high| !high)
    }
}

/// Pins on a [`MockRail`]
pub const MOCK_PINS: usize = 64;

/// In-memory rail for tests and simulation, pins 0-63, all low
pub type MockRail = PinBank<MockPin, MOCK_PINS>;

impl<const N: usize> PinBank<MockPin, N> {
    fn peek(&self, pin: PinNumber) -> MockPin {
        self.pins
            .try_borrow()
            .ok()
            .and_then(|pins| pins.get(pin as usize).copied())
            .unwrap_or_default()
    }

    /// Current level of `pin` (false for unknown pins)
    pub fn is_high(&self, pin: PinNumber) -> bool {
        self.peek(pin).high
    }

    /// Times `pin` went from low to high
    pub fn times_raised(&self, pin: PinNumber) -> u16 {
        self.peek(pin).raised
    }

    /// Times `pin` went from high to low
    pub fn times_cut(&self, pin: PinNumber) -> u16 {
        self.peek(pin).cut
    }

    /// Make every operation on `pin` fail (or work again)
    pub fn set_faulty(&self, pin: PinNumber, faulty: bool) {
        if let Ok(mut pins) = self.pins.try_borrow_mut() {
            if let Some(p) = pins.get_mut(pin as usize) {
                p.faulty = faulty;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_transitions_only() {
        let rail = MockRail::default();
        rail.set_pin(5, true).unwrap();
        rail.set_pin(5, true).unwrap();
        assert_eq!(rail.is_pin_high(5), Ok(true));
        assert_eq!(rail.times_raised(5), 1);

        rail.set_pin(5, false).unwrap();
        rail.set_pin(5, false).unwrap();
        assert!(!rail.is_high(5));
        assert_eq!(rail.times_cut(5), 1);
    }

    #[test]
    fn unknown_pins_are_errors() {
        let rail = MockRail::default();
        assert_eq!(rail.set_pin(200, true), Err(PowerError::UnknownPin { pin: 200 }));
        assert_eq!(rail.is_pin_high(64), Err(PowerError::UnknownPin { pin: 64 }));
        assert_eq!(rail.times_raised(200), 0);
    }

    #[test]
    fn driver_faults_are_reported() {
        let rail = MockRail::default();
        rail.set_faulty(3, true);
        assert_eq!(
            rail.set_pin(3, true),
            Err(PowerError::Pin { pin: 3, kind: ErrorKind::Other })
        );
        assert!(!rail.is_high(3));

        rail.set_faulty(3, false);
        assert_eq!(rail.set_pin(3, true), Ok(()));
    }

    #[test]
    fn bank_over_caller_pins() {
        let rail = PinBank::new([MockPin::default(); 2]);
        rail.set_pin(1, true).unwrap();
        let [first, second] = rail.release();
        assert!(!first.high);
        assert!(second.high);
    }
}
