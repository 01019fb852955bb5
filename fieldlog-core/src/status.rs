//! Sensor status flags
//!
//! One byte per physical sensor records how far it got through the
//! power → wake → measure life-cycle. The scheduler reads these bits to
//! decide what to do next on every polling pass, so the invariants below
//! are enforced here rather than left to each driver:
//!
//! - a "successful" flag is never set without its "attempted" flag
//! - clearing an "attempted" flag clears its "successful" flag
//! - no other operation touches unrelated bits
//!
//! | Bit | Flag |
//! |-----|------|
//! | 0 | `PowerAttempted` |
//! | 1 | `SetupSuccessful` |
//! | 2 | `PowerSuccessful` |
//! | 3 | `WakeAttempted` |
//! | 4 | `WakeSuccessful` |
//! | 5 | `MeasurementAttempted` |
//! | 6 | `MeasurementSuccessful` |
//! | 7 | `ErrorOccurred` |

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single status bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum StatusFlag {
    /// Power-up was requested
    PowerAttempted = 0,
    /// `setup()` completed
    SetupSuccessful = 1,
    /// Power is known to be on
    PowerSuccessful = 2,
    /// Wake was requested
    WakeAttempted = 3,
    /// Sensor is awake and accepting commands
    WakeSuccessful = 4,
    /// A measurement start was requested
    MeasurementAttempted = 5,
    /// The measurement start was accepted
    MeasurementSuccessful = 6,
    /// The driver hit an error it could not recover from
    ErrorOccurred = 7,
}

impl StatusFlag {
    /// Bit mask of this flag
    pub const fn mask(self) -> u8 {
        1 << self as u8
    }

    /// The flag a successful flag implies
    const fn prerequisite(self) -> Option<StatusFlag> {
        match self {
            Self::PowerSuccessful => Some(Self::PowerAttempted),
            Self::WakeSuccessful => Some(Self::WakeAttempted),
            Self::MeasurementSuccessful => Some(Self::MeasurementAttempted),
            _ => None,
        }
    }

    /// The flag that depends on this one
    const fn dependent(self) -> Option<StatusFlag> {
        match self {
            Self::PowerAttempted => Some(Self::PowerSuccessful),
            Self::WakeAttempted => Some(Self::WakeSuccessful),
            Self::MeasurementAttempted => Some(Self::MeasurementSuccessful),
            _ => None,
        }
    }
}

const POWER_BITS: u8 = StatusFlag::PowerAttempted.mask() | StatusFlag::PowerSuccessful.mask();
const WAKE_BITS: u8 = StatusFlag::WakeAttempted.mask() | StatusFlag::WakeSuccessful.mask();
const MEASUREMENT_BITS: u8 =
    StatusFlag::MeasurementAttempted.mask() | StatusFlag::MeasurementSuccessful.mask();

/// Status byte of one sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorStatus(u8);

impl SensorStatus {
    /// No flags set
    pub const fn new() -> Self {
        Self(0)
    }

    /// Raw byte, bit 0 first
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Rebuild from a raw byte, dropping any successful bit whose
    /// attempted bit is missing
    pub fn from_bits(bits: u8) -> Self {
        let mut status = Self(bits);
        for flag in [
            StatusFlag::PowerSuccessful,
            StatusFlag::WakeSuccessful,
            StatusFlag::MeasurementSuccessful,
        ] {
            if let Some(pre) = flag.prerequisite() {
                if !status.is_set(pre) {
                    status.0 &= !flag.mask();
                }
            }
        }
        status
    }

    /// Check one flag
    #[inline]
    pub const fn is_set(self, flag: StatusFlag) -> bool {
        self.0 & flag.mask() != 0
    }

    /// Set a flag, together with the flag it implies
    pub fn set(&mut self, flag: StatusFlag) {
        self.0 |= flag.mask();
        if let Some(pre) = flag.prerequisite() {
            self.0 |= pre.mask();
        }
    }

    /// Clear a flag, together with the flag that depends on it
    pub fn clear(&mut self, flag: StatusFlag) {
        self.0 &= !flag.mask();
        if let Some(dep) = flag.dependent() {
            self.0 &= !dep.mask();
        }
    }

    /// Clear both power bits and nothing else
    pub fn clear_power_bits(&mut self) {
        self.0 &= !POWER_BITS;
    }

    /// Clear both wake bits and nothing else
    pub fn clear_wake_bits(&mut self) {
        self.0 &= !WAKE_BITS;
    }

    /// Clear both measurement bits and nothing else
    pub fn clear_measurement_bits(&mut self) {
        self.0 &= !MEASUREMENT_BITS;
    }

    /// Power was cut: everything downstream of power is gone too
    pub fn clear_power_cascade(&mut self) {
        self.0 &= !(POWER_BITS | WAKE_BITS | MEASUREMENT_BITS);
    }

    /// Power-up was requested
    pub const fn power_attempted(self) -> bool {
        self.is_set(StatusFlag::PowerAttempted)
    }

    /// `setup()` completed
    pub const fn setup_successful(self) -> bool {
        self.is_set(StatusFlag::SetupSuccessful)
    }

    /// Power is on
    pub const fn power_successful(self) -> bool {
        self.is_set(StatusFlag::PowerSuccessful)
    }

    /// Wake was requested
    pub const fn wake_attempted(self) -> bool {
        self.is_set(StatusFlag::WakeAttempted)
    }

    /// Sensor is awake
    pub const fn wake_successful(self) -> bool {
        self.is_set(StatusFlag::WakeSuccessful)
    }

    /// Measurement start was requested
    pub const fn measurement_attempted(self) -> bool {
        self.is_set(StatusFlag::MeasurementAttempted)
    }

    /// Measurement start was accepted
    pub const fn measurement_successful(self) -> bool {
        self.is_set(StatusFlag::MeasurementSuccessful)
    }

    /// Unrecoverable driver error
    pub const fn error_occurred(self) -> bool {
        self.is_set(StatusFlag::ErrorOccurred)
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0b{:08b}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SensorStatus {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "0b{=u8:b}", self.0)
    }
}
