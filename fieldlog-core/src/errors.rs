//! Error Types for Sensor Registration and Scheduling
//!
//! ## Design Philosophy
//!
//! Sensor failures are *not* errors in this crate. A sensor that does not
//! wake, does not answer or returns garbage is an ordinary event on a field
//! logger: it is logged, its variables keep the `-9999` sentinel and the
//! aggregate success flag of the update goes false. Nothing panics and
//! nothing unwinds.
//!
//! `LoggerError` is reserved for mistakes in how the logger was put
//! together: too many sensors for the fixed capacity, a variable pointing at
//! a sensor that was never registered, a buffer configured for the wrong
//! number of variables. These are found during start-up or indicate a
//! corrupted configuration, so they are reported as `Err` and the current
//! operation stops.
//!
//! 1. **Small Size**: every variant is a few bytes, no heap data.
//! 2. **Copy Semantics**: errors are returned by value from hot paths.
//! 3. **Actionable**: each variant carries the numbers needed to fix the
//!    configuration.
//!
//! ## Error Handling Strategy
//!
//! ```rust
//! use fieldlog_core::{LoggerError, UpdateOptions, VariableArray};
//!
//! fn log_once(array: &mut VariableArray<'_, '_>) {
//!     match array.complete_update(UpdateOptions::FULL_CYCLE) {
//!         Ok(true) => {
//!             // every sensor answered
//!         }
//!         Ok(false) => {
//!             // some sensor failed; its variables hold -9999
//!         }
//!         Err(LoggerError::TooManySensors { .. }) => {
//!             // configuration is corrupt, rebuild the array
//!         }
//!         Err(_) => {}
//!     }
//! }
//! ```

use thiserror_no_std::Error;

use crate::buffer::LogBufferError;

/// Result type for registration and scheduling operations
pub type LoggerResult<T> = Result<T, LoggerError>;

/// Configuration errors - kept small for embedded use
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerError {
    /// More unique sensors than the fixed capacity allows
    #[error("Too many sensors: capacity is {capacity}")]
    TooManySensors {
        /// Number of sensor slots available
        capacity: usize,
    },

    /// More variables than the fixed capacity allows
    #[error("Too many variables: capacity is {capacity}")]
    TooManyVariables {
        /// Number of variable slots available
        capacity: usize,
    },

    /// A variable refers to a sensor that is not registered
    #[error("Unknown sensor index {index}")]
    UnknownSensor {
        /// The index that was looked up
        index: u8,
    },

    /// A variable reports a result the sensor does not produce
    #[error("Sensor returns {available} values, result {requested} requested")]
    ResultIndexOutOfRange {
        /// Result index the variable asked for
        requested: u8,
        /// Number of values the sensor returns
        available: u8,
    },

    /// UUID does not fit the inline storage
    #[error("UUID of {length} characters exceeds capacity {capacity}")]
    UuidTooLong {
        /// Length of the rejected string
        length: usize,
        /// Characters that fit
        capacity: usize,
    },

    /// Log buffer records a different number of variables than the array
    #[error("Log buffer holds {buffer} variables per record, array has {array}")]
    BufferLayoutMismatch {
        /// Variables per record in the buffer
        buffer: u8,
        /// Variables in the array
        array: usize,
    },

    /// The log buffer refused a record
    #[error("Log buffer: {0}")]
    Buffer(#[from] LogBufferError),
}

#[cfg(feature = "defmt")]
impl defmt::Format for LoggerError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::TooManySensors { capacity } =>
                defmt::write!(fmt, "Too many sensors (capacity {})", capacity),
            Self::TooManyVariables { capacity } =>
                defmt::write!(fmt, "Too many variables (capacity {})", capacity),
            Self::UnknownSensor { index } =>
                defmt::write!(fmt, "Unknown sensor {}", index),
            Self::ResultIndexOutOfRange { requested, available } =>
                defmt::write!(fmt, "Result {} of {}", requested, available),
            Self::UuidTooLong { length, capacity } =>
                defmt::write!(fmt, "UUID {} > {}", length, capacity),
            Self::BufferLayoutMismatch { buffer, array } =>
                defmt::write!(fmt, "Buffer {} vars, array {}", buffer, array),
            Self::Buffer(err) => defmt::write!(fmt, "Log buffer: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_size() {
        // Errors travel through every registration call
        assert!(core::mem::size_of::<LoggerError>() <= 24);
    }

    #[test]
    fn error_display() {
        extern crate std;
        use std::string::ToString;

        let err = LoggerError::TooManySensors { capacity: 4 };
        assert_eq!(err.to_string(), "Too many sensors: capacity is 4");

        let err = LoggerError::ResultIndexOutOfRange { requested: 3, available: 2 };
        assert_eq!(err.to_string(), "Sensor returns 2 values, result 3 requested");

        let err: LoggerError = LogBufferError::NoSpace { record_size: 12, remaining: 4 }.into();
        assert_eq!(err.to_string(), "Log buffer: No space for a 12-byte record (4 bytes left)");
    }
}
