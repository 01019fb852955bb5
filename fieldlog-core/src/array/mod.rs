//! The variable array: registry of sensors and variables
//!
//! A logger is configured by registering its sensors and then the
//! variables that report their results. The array figures out which
//! physical sensors are involved (one sensor often reports several
//! variables), drives them through a measurement cycle together (see
//! [`update`]) and hands the results to the outside world: printed,
//! as CSV, or as a record in a [`LogBuffer`].
//!
//! ```rust
//! use fieldlog_core::power::MockRail;
//! use fieldlog_core::sensor::{Sensor, SensorCore, Timing};
//! use fieldlog_core::time::MockClock;
//! use fieldlog_core::{UpdateOptions, Variable, VariableArray};
//!
//! struct Constant<'c>(SensorCore<'c>);
//!
//! impl<'c> Sensor<'c> for Constant<'c> {
//!     fn core(&self) -> &SensorCore<'c> { &self.0 }
//!     fn core_mut(&mut self) -> &mut SensorCore<'c> { &mut self.0 }
//!     fn add_single_measurement_result(&mut self) -> bool {
//!         self.0.verify_and_add_result(0, 7.0);
//!         self.0.finish_attempt(true);
//!         true
//!     }
//! }
//!
//! let clock = MockClock::auto_step(0, 1);
//! let rail = MockRail::default();
//! let mut sensor = Constant(SensorCore::new("constant", 1, Timing::IMMEDIATE, &clock, &rail));
//!
//! let mut array: VariableArray = VariableArray::new();
//! let id = array.add_sensor(&mut sensor).unwrap();
//! array.add_variable(Variable::measured(id, 0, "seven", "count", "Seven")).unwrap();
//!
//! assert!(array.complete_update(UpdateOptions::FULL_CYCLE).unwrap());
//! assert_eq!(array.value(0, false), Some(7.0));
//! ```

pub mod update;

pub use update::{UpdateCycle, UpdateOptions};

use core::fmt::{self, Write};

use heapless::Vec;

use crate::buffer::LogBuffer;
use crate::constants::{MAX_SENSORS, MAX_VARIABLES};
use crate::errors::{LoggerError, LoggerResult};
use crate::power::PinNumber;
use crate::sensor::{setup_with_retries, Sensor, SensorId};
use crate::variable::{Readings, Source, Variable};

/// Sensors and the variables they report
///
/// `V` and `S` bound the number of variables and sensors; both are
/// reserved up front.
pub struct VariableArray<'a, 'c, const V: usize = MAX_VARIABLES, const S: usize = MAX_SENSORS> {
    sensors: Vec<&'a mut (dyn Sensor<'c> + 'a), S>,
    variables: Vec<Variable, V>,
}

impl<'a, 'c, const V: usize, const S: usize> VariableArray<'a, 'c, V, S> {
    /// Empty array
    pub const fn new() -> Self {
        Self { sensors: Vec::new(), variables: Vec::new() }
    }

    /// Register a sensor
    ///
    /// The returned id is what measured variables refer to.
    pub fn add_sensor(&mut self, sensor: &'a mut (dyn Sensor<'c> + 'a)) -> LoggerResult<SensorId> {
        let index = self.sensors.len();
        let id = u8::try_from(index).map_err(|_| LoggerError::TooManySensors { capacity: S })?;
        log_debug!("Registering {} as sensor {}", sensor.name(), id);
        self.sensors
            .push(sensor)
            .map_err(|_| LoggerError::TooManySensors { capacity: S })?;
        Ok(SensorId(id))
    }

    /// Append a variable, returning its index
    ///
    /// A measured variable must refer to a registered sensor and to a
    /// result that sensor produces.
    pub fn add_variable(&mut self, variable: Variable) -> LoggerResult<usize> {
        if let (Some(id), Some(result)) = (variable.parent_sensor(), variable.result_index()) {
            let sensor = self
                .sensors
                .get(id.index())
                .ok_or(LoggerError::UnknownSensor { index: id.0 })?;
            let available = sensor.core().num_values();
            if result >= available {
                return Err(LoggerError::ResultIndexOutOfRange { requested: result, available });
            }
        }

        let index = self.variables.len();
        self.variables
            .push(variable)
            .map_err(|_| LoggerError::TooManyVariables { capacity: V })?;
        Ok(index)
    }

    /// All variables in collection order
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// One variable
    pub fn variable(&self, index: usize) -> Option<&Variable> {
        self.variables.get(index)
    }

    /// One variable, mutable (to attach a UUID)
    pub fn variable_mut(&mut self, index: usize) -> Option<&mut Variable> {
        self.variables.get_mut(index)
    }

    /// A registered sensor
    pub fn sensor(&self, id: SensorId) -> Option<&(dyn Sensor<'c> + 'a)> {
        self.sensors.get(id.index()).map(|s| &**s)
    }

    /// Number of variables
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// Number of distinct sensors reported by at least one variable
    pub fn sensor_count(&self) -> usize {
        (0..self.variables.len()).filter(|&i| self.is_last_var_from_sensor(i)).count()
    }

    /// Number of calculated variables
    pub fn calculated_variable_count(&self) -> usize {
        self.variables.iter().filter(|v| v.is_calculated()).count()
    }

    /// Largest number of readings any sensor averages
    pub fn max_measurements_to_average(&self) -> u8 {
        (0..self.variables.len())
            .filter(|&i| self.is_last_var_from_sensor(i))
            .filter_map(|i| self.variables[i].parent_sensor())
            .filter_map(|id| self.sensors.get(id.index()))
            .map(|s| s.measurements_to_average())
            .max()
            .unwrap_or(0)
    }

    /// True when no later variable reports the same sensor
    ///
    /// Picks exactly one representative variable per physical sensor.
    /// Calculated variables are never representatives.
    pub fn is_last_var_from_sensor(&self, index: usize) -> bool {
        let Some(sensor) = self.variables.get(index).and_then(Variable::parent_sensor) else {
            return false;
        };
        !self.variables[index + 1..]
            .iter()
            .any(|v| v.parent_sensor() == Some(sensor))
    }

    /// Distinct sensors in visiting order
    pub(crate) fn sensor_order(&self) -> LoggerResult<Vec<SensorId, S>> {
        let mut order = Vec::new();
        for (i, var) in self.variables.iter().enumerate() {
            let Some(id) = var.parent_sensor() else { continue };
            if self.is_last_var_from_sensor(i) {
                order.push(id).map_err(|_| LoggerError::TooManySensors { capacity: S })?;
            }
        }
        Ok(order)
    }

    fn pins_of(&self, id: SensorId) -> [Option<PinNumber>; 2] {
        self.sensors
            .get(id.index())
            .map(|s| [s.power_pin(), s.secondary_power_pin()])
            .unwrap_or([None, None])
    }

    /// True when the two sensors switch any pin in common
    ///
    /// Uncontrolled power (`None`) never counts as shared.
    pub fn shares_power_pin(&self, a: SensorId, b: SensorId) -> bool {
        let (pa, pb) = (self.pins_of(a), self.pins_of(b));
        pa.iter().flatten().any(|p| pb.iter().flatten().any(|q| p == q))
    }

    /// Set up every sensor that is not set up yet
    ///
    /// Waits for each sensor to warm up, then runs `setup()` up to
    /// [`SETUP_ATTEMPTS`](crate::constants::SETUP_ATTEMPTS) times.
    pub fn setup_sensors(&mut self) -> LoggerResult<bool> {
        let mut pending = self.sensor_order()?;
        pending.retain(|id| {
            self.sensors
                .get(id.index())
                .map(|s| !s.status().setup_successful())
                .unwrap_or(false)
        });
        log_info!("Setting up {} sensors", pending.len());

        let mut success = true;
        while !pending.is_empty() {
            let mut i = 0;
            while i < pending.len() {
                let sensor = sensor_at(&mut self.sensors, pending[i])?;
                if sensor.is_warmed_up(false) {
                    success &= setup_with_retries(sensor);
                    pending.remove(i);
                } else {
                    i += 1;
                }
            }
        }
        Ok(success)
    }

    /// Power up every sensor
    pub fn sensors_power_up(&mut self) -> LoggerResult<()> {
        for id in self.sensor_order()? {
            sensor_at(&mut self.sensors, id)?.power_up();
        }
        Ok(())
    }

    /// Wake every sensor that is not awake, each once it has warmed up
    pub fn sensors_wake(&mut self) -> LoggerResult<bool> {
        let mut pending = self.sensor_order()?;
        pending.retain(|id| {
            self.sensors
                .get(id.index())
                .map(|s| !s.status().wake_successful())
                .unwrap_or(false)
        });

        let mut success = true;
        while !pending.is_empty() {
            let mut i = 0;
            while i < pending.len() {
                let sensor = sensor_at(&mut self.sensors, pending[i])?;
                if sensor.is_warmed_up(false) {
                    let ok = sensor.wake();
                    if !ok {
                        log_warn!("{} did not wake", sensor.name());
                    }
                    success &= ok;
                    pending.remove(i);
                } else {
                    i += 1;
                }
            }
        }
        Ok(success)
    }

    /// Put every awake sensor to sleep
    pub fn sensors_sleep(&mut self) -> LoggerResult<bool> {
        let mut success = true;
        for id in self.sensor_order()? {
            let sensor = sensor_at(&mut self.sensors, id)?;
            if sensor.status().wake_successful() {
                success &= sensor.sleep();
            }
        }
        Ok(success)
    }

    /// Cut power to every sensor
    pub fn sensors_power_down(&mut self) -> LoggerResult<()> {
        for id in self.sensor_order()? {
            sensor_at(&mut self.sensors, id)?.power_down();
        }
        Ok(())
    }

    /// Value of variable `index`
    ///
    /// With `force_recompute` a measured variable takes a fresh blocking
    /// reading of its sensor (notifying every variable of that sensor) and
    /// a calculated variable is evaluated again.
    pub fn value(&mut self, index: usize, force_recompute: bool) -> Option<f32> {
        let source = self.variables.get(index)?.source();
        if !force_recompute {
            return self.variables.get(index).map(Variable::value);
        }

        match source {
            Source::Calculated(calculation) => {
                let value = calculation(&Readings::new(&self.variables));
                self.variables.get_mut(index)?.set_value(value);
            }
            Source::Measured { sensor: id, .. } => {
                let sensor = self.sensors.get_mut(id.index())?;
                if !sensor.update() {
                    log_warn!("Update of {} failed", sensor.name());
                }
                notify_variables(&mut self.variables, id, &**sensor);
            }
        }
        self.variables.get(index).map(Variable::value)
    }

    /// Evaluate every calculated variable, in collection order
    pub(crate) fn update_calculated(&mut self) {
        for i in 0..self.variables.len() {
            if let Source::Calculated(calculation) = self.variables[i].source() {
                let value = calculation(&Readings::new(&self.variables));
                self.variables[i].set_value(value);
            }
        }
    }

    /// Validate every UUID and check they are unique
    ///
    /// Problems are logged, never enforced. Variables without a UUID are
    /// not checked.
    pub fn check_variable_uuids(&self) -> bool {
        let mut success = true;

        for (i, var) in self.variables.iter().enumerate() {
            let Some(uuid) = var.uuid() else {
                log_debug!("{} has no UUID", var.name());
                continue;
            };
            if !var.check_uuid_format() {
                log_warn!("UUID of {} is malformed: {}", var.name(), uuid);
                success = false;
            }
            let duplicate = self.variables[i + 1..].iter().any(|other| other.uuid() == Some(uuid));
            if duplicate {
                log_warn!("UUID {} is used more than once", uuid);
                success = false;
            }
        }

        if success {
            log_info!("All variable UUIDs are valid and unique");
        }
        success
    }

    /// One line per variable: source, name, value and unit
    pub fn print_sensor_data<W: Write>(&self, out: &mut W) -> fmt::Result {
        for var in self.variables.iter() {
            match var.parent_sensor().and_then(|id| self.sensors.get(id.index())) {
                Some(sensor) => {
                    out.write_str(sensor.name())?;
                    if !sensor.location().is_empty() {
                        write!(out, " at {}", sensor.location())?;
                    }
                    writeln!(out, " reports {} is {} {}", var.name(), var.value_string(), var.unit())?;
                }
                None => {
                    writeln!(
                        out,
                        "{} is calculated to be {} {}",
                        var.name(),
                        var.value_string(),
                        var.unit()
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Current values, comma separated, in collection order
    pub fn write_csv<W: Write>(&self, out: &mut W) -> fmt::Result {
        for (i, var) in self.variables.iter().enumerate() {
            if i > 0 {
                out.write_char(',')?;
            }
            out.write_str(&var.value_string())?;
        }
        Ok(())
    }

    /// Append the current value of every variable to `buffer`
    ///
    /// The buffer must be configured for exactly as many variables as the
    /// array holds.
    pub fn buffer_record<const N: usize>(
        &self,
        buffer: &mut LogBuffer<N>,
        timestamp: u32,
    ) -> LoggerResult<usize> {
        if buffer.num_variables() as usize != self.variables.len() {
            return Err(LoggerError::BufferLayoutMismatch {
                buffer: buffer.num_variables(),
                array: self.variables.len(),
            });
        }

        let record = buffer.add_record(timestamp)?;
        for (i, var) in self.variables.iter().enumerate() {
            buffer.set_record_value(record, i, var.value());
        }
        log_debug!("Buffered record {} ({}% full)", record, buffer.percent_full());
        Ok(record)
    }
}

impl<const V: usize, const S: usize> Default for VariableArray<'_, '_, V, S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable access to a registered sensor, through the registry only
fn sensor_at<'s, 'a, 'c, const S: usize>(
    sensors: &'s mut Vec<&'a mut (dyn Sensor<'c> + 'a), S>,
    id: SensorId,
) -> LoggerResult<&'s mut (dyn Sensor<'c> + 'a)> {
    sensors
        .get_mut(id.index())
        .map(|s| &mut **s)
        .ok_or(LoggerError::UnknownSensor { index: id.0 })
}

/// Push a sensor's values into every variable that reports it
fn notify_variables<'c>(variables: &mut [Variable], id: SensorId, sensor: &(dyn Sensor<'c> + '_)) {
    log_debug!("Notifying variables of {}", sensor.name());
    sensor.notify_variables(&mut |result, value| {
        for var in variables.iter_mut() {
            if let Source::Measured { sensor: owner, result: r } = var.source() {
                if owner == id && r == result {
                    var.set_value(value);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::LogBufferError;
    use crate::power::MockRail;
    use crate::sensor::{SensorCore, Timing};
    use crate::time::MockClock;

    struct Counter<'c> {
        core: SensorCore<'c>,
        next: f32,
    }

    impl<'c> Sensor<'c> for Counter<'c> {
        fn core(&self) -> &SensorCore<'c> {
            &self.core
        }

        fn core_mut(&mut self) -> &mut SensorCore<'c> {
            &mut self.core
        }

        fn add_single_measurement_result(&mut self) -> bool {
            let ok = self.core.status.measurement_successful();
            if ok {
                for i in 0..self.core.num_values() as usize {
                    self.core.verify_and_add_result(i, self.next + i as f32);
                }
                self.next += 10.0;
            }
            self.core.finish_attempt(ok);
            ok
        }
    }

    fn counter<'c>(clock: &'c MockClock, rail: &'c MockRail, values: u8) -> Counter<'c> {
        Counter {
            core: SensorCore::new("counter", values, Timing::IMMEDIATE, clock, rail),
            next: 1.0,
        }
    }

    #[test]
    fn registration_is_validated() {
        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let mut a = counter(&clock, &rail, 2);
        let mut array: VariableArray<'_, '_, 2, 1> = VariableArray::new();

        let id = array.add_sensor(&mut a).unwrap();
        assert_eq!(
            array.add_variable(Variable::measured(SensorId(3), 0, "x", "u", "X")),
            Err(LoggerError::UnknownSensor { index: 3 })
        );
        assert_eq!(
            array.add_variable(Variable::measured(id, 2, "x", "u", "X")),
            Err(LoggerError::ResultIndexOutOfRange { requested: 2, available: 2 })
        );
        array.add_variable(Variable::measured(id, 0, "x", "u", "X")).unwrap();
        array.add_variable(Variable::measured(id, 1, "y", "u", "Y")).unwrap();
        assert_eq!(
            array.add_variable(Variable::measured(id, 1, "z", "u", "Z")),
            Err(LoggerError::TooManyVariables { capacity: 2 })
        );
    }

    #[test]
    fn counts_and_representatives() {
        fn zero(_: &Readings<'_>) -> f32 {
            0.0
        }

        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let mut a = counter(&clock, &rail, 2);
        let mut b = counter(&clock, &rail, 1);
        let mut array: VariableArray = VariableArray::new();
        let ida = array.add_sensor(&mut a).unwrap();
        let idb = array.add_sensor(&mut b).unwrap();

        array.add_variable(Variable::measured(ida, 0, "a0", "u", "A0")).unwrap();
        array.add_variable(Variable::measured(idb, 0, "b0", "u", "B0")).unwrap();
        array.add_variable(Variable::measured(ida, 1, "a1", "u", "A1")).unwrap();
        array.add_variable(Variable::calculated(zero, "c", "u", "C")).unwrap();

        assert!(!array.is_last_var_from_sensor(0));
        assert!(array.is_last_var_from_sensor(1));
        assert!(array.is_last_var_from_sensor(2));
        assert!(!array.is_last_var_from_sensor(3));
        assert_eq!(array.variable_count(), 4);
        assert_eq!(array.sensor_count(), 2);
        assert_eq!(array.calculated_variable_count(), 1);
        assert_eq!(array.max_measurements_to_average(), 1);
        assert_eq!(array.sensor_order().unwrap().as_slice(), &[idb, ida]);
    }

    #[test]
    fn shared_pins() {
        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let mut a = counter(&clock, &rail, 1);
        a.core = a.core.with_power_pin(5);
        let mut b = counter(&clock, &rail, 1);
        b.core = b.core.with_power_pin(6).with_secondary_power_pin(5);
        let mut c = counter(&clock, &rail, 1);
        let mut d = counter(&clock, &rail, 1);

        let mut array: VariableArray = VariableArray::new();
        let ida = array.add_sensor(&mut a).unwrap();
        let idb = array.add_sensor(&mut b).unwrap();
        let idc = array.add_sensor(&mut c).unwrap();
        let idd = array.add_sensor(&mut d).unwrap();

        assert!(array.shares_power_pin(ida, idb));
        assert!(!array.shares_power_pin(ida, idc));
        assert!(!array.shares_power_pin(idc, idd));
    }

    #[test]
    fn forced_values() {
        fn sum(r: &Readings<'_>) -> f32 {
            r.value(0) + r.value(1)
        }

        let clock = MockClock::auto_step(0, 1);
        let rail = MockRail::default();
        let mut a = counter(&clock, &rail, 2);
        let mut array: VariableArray = VariableArray::new();
        let id = array.add_sensor(&mut a).unwrap();
        array.add_variable(Variable::measured(id, 0, "a0", "u", "A0")).unwrap();
        array.add_variable(Variable::measured(id, 1, "a1", "u", "A1")).unwrap();
        array.add_variable(Variable::calculated(sum, "s", "u", "S")).unwrap();

        assert_eq!(array.value(0, false), Some(-9999.0));
        assert_eq!(array.value(0, true), Some(1.0));
        assert_eq!(array.value(1, false), Some(2.0));
        assert_eq!(array.value(2, true), Some(3.0));
        assert_eq!(array.value(9, true), None);
    }

    #[test]
    fn text_output() {
        fn half(r: &Readings<'_>) -> f32 {
            r.value(0) / 2.0
        }

        let clock = MockClock::auto_step(0, 1);
        let rail = MockRail::default();
        let mut a = counter(&clock, &rail, 1);
        a.core = a.core.with_location("Pin7");
        let mut array: VariableArray = VariableArray::new();
        let id = array.add_sensor(&mut a).unwrap();
        array
            .add_variable(Variable::measured(id, 0, "depth", "mm", "D").with_resolution(1))
            .unwrap();
        array.add_variable(Variable::calculated(half, "half", "mm", "H")).unwrap();
        array.value(0, true);
        array.value(1, true);

        let mut text = heapless::String::<128>::new();
        array.print_sensor_data(&mut text).unwrap();
        assert_eq!(
            text.as_str(),
            "counter at Pin7 reports depth is 1.0 mm\nhalf is calculated to be 0 mm\n"
        );

        let mut csv = heapless::String::<32>::new();
        array.write_csv(&mut csv).unwrap();
        assert_eq!(csv.as_str(), "1.0,0");
    }

    #[test]
    fn uuid_checks() {
        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let mut a = counter(&clock, &rail, 2);
        let mut array: VariableArray = VariableArray::new();
        let id = array.add_sensor(&mut a).unwrap();
        array.add_variable(Variable::measured(id, 0, "a0", "u", "A0")).unwrap();
        array.add_variable(Variable::measured(id, 1, "a1", "u", "A1")).unwrap();

        let uuid = "12345678-abcd-1234-ef00-1234567890ab";
        array.variable_mut(0).unwrap().set_uuid(uuid).unwrap();
        assert!(array.check_variable_uuids());

        array.variable_mut(1).unwrap().set_uuid(uuid).unwrap();
        assert!(!array.check_variable_uuids());

        array.variable_mut(1).unwrap().set_uuid("not-a-uuid").unwrap();
        assert!(!array.check_variable_uuids());
    }

    #[test]
    fn records_into_buffer() {
        let clock = MockClock::auto_step(0, 1);
        let rail = MockRail::default();
        let mut a = counter(&clock, &rail, 2);
        let mut array: VariableArray = VariableArray::new();
        let id = array.add_sensor(&mut a).unwrap();
        array.add_variable(Variable::measured(id, 0, "a0", "u", "A0")).unwrap();
        array.add_variable(Variable::measured(id, 1, "a1", "u", "A1")).unwrap();
        array.value(0, true);

        let mut buffer: LogBuffer<24> = LogBuffer::new();
        assert_eq!(
            array.buffer_record(&mut buffer, 100),
            Err(LoggerError::BufferLayoutMismatch { buffer: 0, array: 2 })
        );

        buffer.set_num_variables(2);
        assert_eq!(array.buffer_record(&mut buffer, 100), Ok(0));
        assert_eq!(array.buffer_record(&mut buffer, 200), Ok(1));
        assert_eq!(buffer.record_value(0, 1), 2.0);
        assert_eq!(buffer.record_timestamp(1), 200);
        assert_eq!(
            array.buffer_record(&mut buffer, 300),
            Err(LoggerError::Buffer(LogBufferError::NoSpace { record_size: 12, remaining: 0 }))
        );
    }
}
