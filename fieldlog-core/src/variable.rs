//! Variables: the named quantities a logger reports
//!
//! A variable is either one result of a physical sensor (a sonde reports
//! conductivity, temperature and depth as three variables) or a value
//! calculated from other variables after every update.

use core::fmt::{self, Write};

use heapless::String;
use uuid::Uuid;

use crate::constants::sensors::{UUID_CAPACITY, UUID_LENGTH, VALUE_STRING_CAPACITY};
use crate::constants::NO_DATA;
use crate::errors::{LoggerError, LoggerResult};
use crate::sensor::SensorId;

/// Calculation over the current values of every variable in the array
pub type Calculation = fn(&Readings<'_>) -> f32;

/// Where a variable's value comes from
#[derive(Clone, Copy)]
pub enum Source {
    /// Result `result` of a registered sensor
    Measured {
        /// Registered sensor
        sensor: SensorId,
        /// Index into the sensor's values
        result: u8,
    },
    /// Computed after all sensors have reported
    Calculated(Calculation),
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Measured { sensor, result } => f
                .debug_struct("Measured")
                .field("sensor", sensor)
                .field("result", result)
                .finish(),
            Self::Calculated(_) => f.write_str("Calculated"),
        }
    }
}

/// A reported quantity
#[derive(Debug, Clone)]
pub struct Variable {
    source: Source,
    name: &'static str,
    unit: &'static str,
    default_code: &'static str,
    custom_code: Option<&'static str>,
    resolution: u8,
    uuid: Option<String<UUID_CAPACITY>>,
    value: f32,
}

impl Variable {
    /// Result `result` of `sensor`
    pub fn measured(
        sensor: SensorId,
        result: u8,
        name: &'static str,
        unit: &'static str,
        code: &'static str,
    ) -> Self {
        Self::with_source(Source::Measured { sensor, result }, name, unit, code)
    }

    /// Value computed by `calculation` after every update
    pub fn calculated(
        calculation: Calculation,
        name: &'static str,
        unit: &'static str,
        code: &'static str,
    ) -> Self {
        Self::with_source(Source::Calculated(calculation), name, unit, code)
    }

    fn with_source(
        source: Source,
        name: &'static str,
        unit: &'static str,
        code: &'static str,
    ) -> Self {
        Self {
            source,
            name,
            unit,
            default_code: code,
            custom_code: None,
            resolution: 0,
            uuid: None,
            value: NO_DATA,
        }
    }

    /// Decimal places shown in [`Self::value_string`]
    pub fn with_resolution(mut self, decimals: u8) -> Self {
        self.resolution = decimals;
        self
    }

    /// Code to report instead of the default one
    pub fn with_custom_code(mut self, code: &'static str) -> Self {
        self.custom_code = Some(code);
        self
    }

    /// Attach a UUID
    ///
    /// The string is stored as given; use [`Self::check_uuid_format`] to
    /// validate it.
    pub fn set_uuid(&mut self, uuid: &str) -> LoggerResult<()> {
        let stored = String::try_from(uuid).map_err(|_| LoggerError::UuidTooLong {
            length: uuid.len(),
            capacity: UUID_CAPACITY,
        })?;
        self.uuid = Some(stored);
        Ok(())
    }

    /// The UUID, if one was set
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    /// Whether the UUID is a canonical 36-character hyphenated UUID
    pub fn check_uuid_format(&self) -> bool {
        match self.uuid() {
            Some(uuid) => uuid.len() == UUID_LENGTH && Uuid::try_parse(uuid).is_ok(),
            None => false,
        }
    }

    /// Where the value comes from
    pub fn source(&self) -> Source {
        self.source
    }

    /// True for calculated variables
    pub fn is_calculated(&self) -> bool {
        matches!(self.source, Source::Calculated(_))
    }

    /// The sensor this variable reports, `None` when calculated
    pub fn parent_sensor(&self) -> Option<SensorId> {
        match self.source {
            Source::Measured { sensor, .. } => Some(sensor),
            Source::Calculated(_) => None,
        }
    }

    /// Index into the parent sensor's values
    pub fn result_index(&self) -> Option<u8> {
        match self.source {
            Source::Measured { result, .. } => Some(result),
            Source::Calculated(_) => None,
        }
    }

    /// Reported code: the custom one when set
    pub fn var_code(&self) -> &'static str {
        self.custom_code.unwrap_or(self.default_code)
    }

    /// Name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Unit
    pub fn unit(&self) -> &'static str {
        self.unit
    }

    /// Decimal places
    pub fn resolution(&self) -> u8 {
        self.resolution
    }

    /// Most recent value, `-9999` when none
    pub fn value(&self) -> f32 {
        self.value
    }

    pub(crate) fn set_value(&mut self, value: f32) {
        self.value = value;
    }

    /// Value formatted to the variable's resolution
    ///
    /// Zero decimals truncate toward zero, the way integer-valued readings
    /// are reported.
    pub fn value_string(&self) -> String<VALUE_STRING_CAPACITY> {
        let mut s = String::new();
        // Only overflows for absurd magnitudes; the string is then cut short
        let _ = if self.resolution == 0 {
            write!(s, "{}", self.value as i32)
        } else {
            write!(s, "{:.*}", self.resolution as usize, self.value)
        };
        s
    }
}

/// Read-only view of every variable's current value
///
/// Handed to calculated variables so they can combine measured ones.
#[derive(Debug, Clone, Copy)]
pub struct Readings<'v> {
    variables: &'v [Variable],
}

impl<'v> Readings<'v> {
    pub(crate) fn new(variables: &'v [Variable]) -> Self {
        Self { variables }
    }

    /// Value of the variable at `index`, `-9999` when out of range
    pub fn value(&self, index: usize) -> f32 {
        self.variables.get(index).map(Variable::value).unwrap_or(NO_DATA)
    }

    /// Value of the first variable reporting `code`
    pub fn by_code(&self, code: &str) -> Option<f32> {
        self.variables.iter().find(|v| v.var_code() == code).map(Variable::value)
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// True when there are no variables
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_UUID: &str = "12345678-abcd-1234-ef00-1234567890ab";

    #[test]
    fn uuid_format() {
        let mut var = Variable::measured(SensorId(0), 0, "temperature", "degreeCelsius", "Temp");
        assert!(!var.check_uuid_format());

        var.set_uuid(GOOD_UUID).unwrap();
        assert!(var.check_uuid_format());
        assert_eq!(var.uuid(), Some(GOOD_UUID));

        var.set_uuid("12345678abcd1234ef001234567890ab").unwrap();
        assert!(!var.check_uuid_format());

        var.set_uuid("12345678-abcd-1234-ef00-1234567890ag").unwrap();
        assert!(!var.check_uuid_format());
    }

    #[test]
    fn oversized_uuid_is_rejected() {
        let mut var = Variable::measured(SensorId(0), 0, "temperature", "degreeCelsius", "Temp");
        let long = "x".repeat(UUID_CAPACITY + 1);
        assert_eq!(
            var.set_uuid(&long),
            Err(LoggerError::UuidTooLong { length: UUID_CAPACITY + 1, capacity: UUID_CAPACITY })
        );
        assert!(var.uuid().is_none());
    }

    #[test]
    fn value_string_follows_resolution() {
        let mut var = Variable::measured(SensorId(0), 0, "depth", "millimeter", "Depth");
        assert_eq!(var.value_string().as_str(), "-9999");

        var.set_value(123.456);
        assert_eq!(var.value_string().as_str(), "123");

        let mut var = var.with_resolution(2);
        assert_eq!(var.value_string().as_str(), "123.46");
        var.set_value(-0.5);
        assert_eq!(var.value_string().as_str(), "-0.50");
    }

    #[test]
    fn codes() {
        let var = Variable::measured(SensorId(1), 2, "pressure", "kilopascal", "Press");
        assert_eq!(var.var_code(), "Press");
        assert_eq!(var.parent_sensor(), Some(SensorId(1)));
        assert_eq!(var.result_index(), Some(2));

        let var = var.with_custom_code("BaroPress");
        assert_eq!(var.var_code(), "BaroPress");
    }

    #[test]
    fn calculated_reads_others() {
        fn double_first(r: &Readings<'_>) -> f32 {
            r.value(0) * 2.0
        }

        let mut vars = [
            Variable::measured(SensorId(0), 0, "a", "unit", "A"),
            Variable::calculated(double_first, "b", "unit", "B"),
        ];
        vars[0].set_value(4.0);

        assert!(vars[1].is_calculated());
        assert_eq!(vars[1].parent_sensor(), None);

        let readings = Readings::new(&vars);
        assert_eq!(readings.by_code("A"), Some(4.0));
        assert_eq!(readings.value(7), NO_DATA);
        if let Source::Calculated(f) = vars[1].source() {
            assert_eq!(f(&readings), 8.0);
        }
    }
}
