//! Constants for fieldlog
//!
//! Centralized sizing and sentinel values. Everything that decides how much
//! RAM the logger reserves lives here so a deployment can be tuned in one
//! place.
//!
//! ## Organization
//!
//! - **Buffers**: log buffer capacity presets and collection limits
//! - **Sensors**: sentinels, per-sensor limits and start-up policy
//!
//! ## Usage Guidelines
//!
//! 1. Always use these constants instead of magic numbers
//! 2. Include the unit in the name when the value has one
//! 3. State the memory cost of anything that reserves RAM

/// Buffer sizes and collection limits for memory-constrained loggers.
pub mod buffers;

/// Sensor sentinels, per-sensor limits and start-up policy.
pub mod sensors;

// Re-export commonly used constants for convenience
pub use buffers::{LOG_BUFFER_SIZE, MAX_SENSORS, MAX_VARIABLES};

pub use sensors::{MAX_VALUES_PER_SENSOR, NO_DATA, SETUP_ATTEMPTS};
