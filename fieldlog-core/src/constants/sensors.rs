//! Sensor Sentinels and Limits
//!
//! Values shared by every driver and by the scheduler when it handles
//! missing or failed readings.

// ===== SENTINELS =====

/// Value reported for a variable with no valid reading.
///
/// Downstream publishers and the data portal treat -9999 as "no data",
/// so it is stored in the record rather than skipped.
pub const NO_DATA: f32 = -9999.0;

// ===== PER-SENSOR LIMITS =====

/// Maximum number of values a single sensor can return.
///
/// Multi-parameter sondes return the most (conductivity, temperature,
/// depth, turbidity...). Each slot costs 5 bytes in `SensorCore`.
pub const MAX_VALUES_PER_SENSOR: usize = 8;

/// Maximum length of a sensor location label (characters).
///
/// Covers "SDI12-0_Pin7" and "I2C_0x76" style labels.
pub const LOCATION_LENGTH: usize = 24;

// ===== START-UP POLICY =====

/// Attempts made to run `setup()` on a sensor before giving up.
pub const SETUP_ATTEMPTS: u8 = 5;

// ===== VARIABLE METADATA =====

/// Length of a canonical hyphenated UUID (characters).
pub const UUID_LENGTH: usize = 36;

/// Storage for a UUID string (characters).
///
/// Longer than `UUID_LENGTH` so malformed identifiers can be stored and
/// reported at start-up instead of being rejected outright.
pub const UUID_CAPACITY: usize = 48;

/// Capacity of a formatted value string (characters).
///
/// "-9999" or a float with up to six decimals.
pub const VALUE_STRING_CAPACITY: usize = 24;
