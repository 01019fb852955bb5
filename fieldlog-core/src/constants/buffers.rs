//! Buffer Sizes and Memory Constraints
//!
//! This module defines the log buffer capacity presets and the fixed
//! collection sizes used by the scheduler. All of them are reserved
//! statically, so they are the knobs to turn when a board runs short of RAM.

// ===== LOG BUFFER SIZES =====

/// Log buffer size for boards with 2KB of RAM (bytes).
///
/// Each record costs 4 bytes of timestamp plus 4 bytes per variable:
/// - 256 bytes × (4 + 4×6) = 9 records with six variables
/// - Leaves room for the stack on ATmega328-class parts
///
/// Source: Arduino Uno/Nano deployments
pub const LOG_BUFFER_SIZE_TINY: usize = 256;

/// Log buffer size for boards with 8KB of RAM (bytes).
///
/// Source: ATmega2560 deployments
pub const LOG_BUFFER_SIZE_SMALL: usize = 512;

/// Log buffer size for boards with 16KB of RAM (bytes).
///
/// Source: ATmega1284P deployments
pub const LOG_BUFFER_SIZE_MEDIUM: usize = 2048;

/// Default log buffer size (bytes).
///
/// Sized for 32-bit loggers and the larger AVR boards:
/// - 8192 bytes × (4 + 4×6) = 292 records with six variables
/// - About two days of 10-minute records held while offline
///
/// Increasing this too far starves the stack and crashes the device.
pub const LOG_BUFFER_SIZE: usize = 8192;

// ===== COLLECTION LIMITS =====

/// Maximum variables in one `VariableArray`.
///
/// Each variable costs ~100 bytes on a 32-bit target (the UUID is stored
/// inline):
/// - 32 variables ≈ 3KB
///
/// Source: Largest field station configurations seen in practice
pub const MAX_VARIABLES: usize = 32;

/// Maximum physical sensors in one `VariableArray`.
///
/// One sensor may report several variables, so this is usually well
/// below `MAX_VARIABLES`.
pub const MAX_SENSORS: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_ordered() {
        assert!(LOG_BUFFER_SIZE_TINY < LOG_BUFFER_SIZE_SMALL);
        assert!(LOG_BUFFER_SIZE_SMALL < LOG_BUFFER_SIZE_MEDIUM);
        assert!(LOG_BUFFER_SIZE_MEDIUM < LOG_BUFFER_SIZE);
        assert!(MAX_SENSORS <= MAX_VARIABLES);
    }
}
