//! Sensor scheduling and record buffering for environmental data loggers
//!
//! Drives a heterogeneous set of sensors through power, wake, measurement
//! and sleep while overlapping their dead time, and stages the resulting
//! records in a fixed-size buffer until they can be transmitted.
//!
//! Key constraints:
//! - Runs on small microcontrollers (a few KB of RAM)
//! - No heap allocation anywhere in the crate
//! - Single-threaded, cooperative polling; nothing blocks on a timer
//!
//! ```no_run
//! use fieldlog_core::{UpdateOptions, VariableArray};
//!
//! let mut array: VariableArray = VariableArray::new();
//! // register sensors and variables, then once per logging interval:
//! let all_ok = array.complete_update(UpdateOptions::FULL_CYCLE);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

#[macro_use]
mod macros;

pub mod array;
pub mod buffer;
pub mod constants;
pub mod drivers;
pub mod errors;
pub mod power;
pub mod sensor;
pub mod status;
pub mod time;
pub mod variable;

// Public API
pub use array::{UpdateCycle, UpdateOptions, VariableArray};
pub use buffer::{LogBuffer, LogBufferError};
pub use errors::{LoggerError, LoggerResult};
pub use sensor::{Sensor, SensorCore, SensorId, Timing};
pub use status::{SensorStatus, StatusFlag};
pub use variable::{Readings, Variable};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
