//! Overlapped measurement cycles
//!
//! ## Why polling
//!
//! Sensors spend most of an update waiting: a turbidity probe needs two
//! seconds of warm-up, a pressure sensor half a second to stabilize, an
//! SDI-12 sonde a second per measurement. Updating them one after another
//! costs the *sum* of those waits, and every millisecond of it is battery
//! spent with the sensors powered. The scheduler instead powers everything
//! at once and visits every sensor on each pass, advancing whichever ones
//! are ready. The whole update then costs roughly the *longest* single
//! sensor window.
//!
//! ## One pass per sensor
//!
//! ```text
//! wake failed?            ─▶ skip the rest of this update
//! not awake, may wake,
//!   warmed up?            ─▶ wake
//! awake, idle, stable?    ─▶ start a measurement
//! measuring, complete?    ─▶ collect the result
//! enough readings?        ─▶ sleep, then power down unless another
//!                            unfinished sensor shares the power pin
//! ```
//!
//! When every sensor is done, values are averaged, pushed into the
//! variables, and the calculated variables are evaluated.
//!
//! ## Driving a cycle
//!
//! [`VariableArray::complete_update`] runs a cycle to the end.
//! [`VariableArray::begin_update`] and [`VariableArray::poll_update`] expose
//! the same cycle one pass at a time, as an [`nb::Result`], for loggers
//! that service a modem or a display between passes.

use heapless::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{notify_variables, sensor_at, VariableArray};
use crate::constants::MAX_SENSORS;
use crate::errors::{LoggerError, LoggerResult};
use crate::sensor::{Sensor, SensorId};

/// Which life-cycle steps an update performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UpdateOptions {
    /// Switch power on first (otherwise only read the pin state)
    pub power_up: bool,
    /// Wake sensors that are not awake (otherwise they are skipped)
    pub wake: bool,
    /// Put each sensor to sleep when it is done
    pub sleep: bool,
    /// Cut power to each sensor when it is done
    pub power_down: bool,
}

impl UpdateOptions {
    /// Power, wake, measure, sleep and power down
    pub const FULL_CYCLE: Self = Self { power_up: true, wake: true, sleep: true, power_down: true };

    /// Measure sensors that are already powered and awake
    pub const MEASURE_ONLY: Self =
        Self { power_up: false, wake: false, sleep: false, power_down: false };
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self::FULL_CYCLE
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    sensor: SensorId,
    finished: bool,
    power_down_pending: bool,
}

/// An update in progress
///
/// Created by [`VariableArray::begin_update`] and advanced by
/// [`VariableArray::poll_update`].
#[derive(Debug)]
pub struct UpdateCycle<const S: usize = MAX_SENSORS> {
    options: UpdateOptions,
    slots: Vec<Slot, S>,
    success: bool,
    passes: u32,
    complete: bool,
}

impl<const S: usize> UpdateCycle<S> {
    /// Steps this cycle performs
    pub fn options(&self) -> UpdateOptions {
        self.options
    }

    /// AND of every sensor operation attempted so far
    pub fn success(&self) -> bool {
        self.success
    }

    /// Passes made over the sensors
    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// Sensors still taking readings
    pub fn sensors_remaining(&self) -> usize {
        self.slots.iter().filter(|s| !s.finished).count()
    }

    /// True once values have been delivered to the variables
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

impl<'a, 'c, const V: usize, const S: usize> VariableArray<'a, 'c, V, S> {
    /// Update every sensor and variable, blocking until done
    ///
    /// Returns `Ok(false)` when any sensor operation failed; the variables
    /// of a failed sensor hold `-9999`. `Err` is reserved for a broken
    /// registry.
    pub fn complete_update(&mut self, options: UpdateOptions) -> LoggerResult<bool> {
        let mut cycle = self.begin_update(options)?;
        nb::block!(self.poll_update(&mut cycle))
    }

    /// Measure sensors that are already powered and awake
    ///
    /// Sensors that are not awake are skipped.
    pub fn update_all_sensors(&mut self) -> LoggerResult<bool> {
        self.complete_update(UpdateOptions::MEASURE_ONLY)
    }

    /// Start an update: power, then clear last update's results
    pub fn begin_update(&mut self, options: UpdateOptions) -> LoggerResult<UpdateCycle<S>> {
        let mut slots: Vec<Slot, S> = Vec::new();
        for sensor in self.sensor_order()? {
            slots
                .push(Slot { sensor, finished: false, power_down_pending: false })
                .map_err(|_| LoggerError::TooManySensors { capacity: S })?;
        }
        log_debug!("Updating {} sensors", slots.len());

        if options.power_up {
            for slot in slots.iter() {
                sensor_at(&mut self.sensors, slot.sensor)?.clear_power_status();
            }
            for slot in slots.iter() {
                sensor_at(&mut self.sensors, slot.sensor)?.power_up();
            }
        } else {
            for slot in slots.iter() {
                sensor_at(&mut self.sensors, slot.sensor)?.check_power_on(false);
            }
        }

        // Wake bits survive: a sensor woken elsewhere stays awake
        for slot in slots.iter() {
            let sensor = sensor_at(&mut self.sensors, slot.sensor)?;
            sensor.clear_measurement_status();
            sensor.clear_values();
        }

        Ok(UpdateCycle { options, slots, success: true, passes: 0, complete: false })
    }

    /// Make one pass over the unfinished sensors
    ///
    /// `WouldBlock` until every sensor is done, then the aggregate success
    /// flag. Polling a complete cycle returns the same flag again.
    pub fn poll_update(&mut self, cycle: &mut UpdateCycle<S>) -> nb::Result<bool, LoggerError> {
        if cycle.complete {
            return Ok(cycle.success);
        }
        cycle.passes = cycle.passes.wrapping_add(1);

        for j in 0..cycle.slots.len() {
            if cycle.slots[j].finished {
                continue;
            }

            let sensor = sensor_at(&mut self.sensors, cycle.slots[j].sensor)?;
            poll_sensor(sensor, cycle.options, &mut cycle.success);

            if sensor.completed_measurement_attempts() >= sensor.measurements_to_average() {
                cycle.slots[j].finished = true;
                self.finish_sensor(cycle, j)?;
            }
        }

        if cycle.slots.iter().any(|s| !s.finished) {
            return Err(nb::Error::WouldBlock);
        }

        self.deliver(cycle)?;
        cycle.complete = true;
        log_debug!("Update finished after {} passes", cycle.passes);
        Ok(cycle.success)
    }

    fn finish_sensor(&mut self, cycle: &mut UpdateCycle<S>, j: usize) -> LoggerResult<()> {
        let sensor = sensor_at(&mut self.sensors, cycle.slots[j].sensor)?;
        log_debug!("Finished all measurements from {}", sensor.name());

        if cycle.options.sleep && sensor.status().wake_successful() {
            let ok = sensor.sleep();
            if !ok {
                log_warn!("{} did not go to sleep", sensor.name());
            }
            cycle.success &= ok;
        }

        if cycle.options.power_down {
            cycle.slots[j].power_down_pending = true;
            self.release_power(cycle)?;
        }
        Ok(())
    }

    /// Power down every finished sensor whose pins no unfinished sensor
    /// still needs
    fn release_power(&mut self, cycle: &mut UpdateCycle<S>) -> LoggerResult<()> {
        for k in 0..cycle.slots.len() {
            if !cycle.slots[k].power_down_pending {
                continue;
            }

            let id = cycle.slots[k].sensor;
            let in_use = cycle
                .slots
                .iter()
                .any(|other| !other.finished && other.sensor != id && self.shares_power_pin(id, other.sensor));
            if in_use {
                log_debug!("Sensor {} shares a power pin still in use, leaving it on", id.0);
                continue;
            }

            sensor_at(&mut self.sensors, id)?.power_down();
            cycle.slots[k].power_down_pending = false;
        }
        Ok(())
    }

    /// Average, notify variables, then evaluate calculated variables
    fn deliver(&mut self, cycle: &UpdateCycle<S>) -> LoggerResult<()> {
        for slot in cycle.slots.iter() {
            sensor_at(&mut self.sensors, slot.sensor)?.average_measurements();
        }
        for slot in cycle.slots.iter() {
            let sensor = self
                .sensors
                .get(slot.sensor.index())
                .ok_or(LoggerError::UnknownSensor { index: slot.sensor.0 })?;
            notify_variables(&mut self.variables, slot.sensor, &**sensor);
        }
        self.update_calculated();
        Ok(())
    }
}

/// Advance one sensor by whatever steps it is ready for
fn poll_sensor<'c>(sensor: &mut (dyn Sensor<'c> + '_), options: UpdateOptions, success: &mut bool) {
    let status = sensor.status();

    if status.wake_attempted() && !status.wake_successful() {
        log_warn!("{} did not wake, no measurements will be taken", sensor.name());
        sensor.force_skip_remaining();
        return;
    }

    if !status.wake_attempted() {
        if !options.wake {
            log_debug!("{} is not awake, skipping", sensor.name());
            sensor.force_skip_remaining();
            return;
        }
        if !sensor.is_warmed_up(false) {
            return;
        }
        let ok = sensor.wake();
        *success &= ok;
        if !ok {
            log_warn!("{} did not wake, no measurements will be taken", sensor.name());
            sensor.force_skip_remaining();
            return;
        }
    }

    let status = sensor.status();
    if status.wake_successful() && !status.measurement_attempted() && sensor.is_stable(false) {
        let ok = sensor.start_single_measurement();
        *success &= ok;
        log_debug!(
            "Starting reading {} on {}: {}",
            sensor.completed_measurement_attempts() + 1,
            sensor.name(),
            ok
        );
    }

    if sensor.status().measurement_attempted() && sensor.is_measurement_complete(false) {
        let ok = sensor.add_single_measurement_result();
        *success &= ok;
        log_debug!("Collected result from {}: {}", sensor.name(), ok);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::MockRail;
    use crate::sensor::{SensorCore, Timing};
    use crate::time::MockClock;
    use crate::variable::Variable;

    struct Probe<'c> {
        core: SensorCore<'c>,
        reading: f32,
    }

    impl<'c> Sensor<'c> for Probe<'c> {
        fn core(&self) -> &SensorCore<'c> {
            &self.core
        }

        fn core_mut(&mut self) -> &mut SensorCore<'c> {
            &mut self.core
        }

        fn add_single_measurement_result(&mut self) -> bool {
            let ok = self.core.status.measurement_successful();
            if ok {
                self.core.verify_and_add_result(0, self.reading);
            }
            self.core.finish_attempt(ok);
            ok
        }
    }

    fn probe<'c>(clock: &'c MockClock, rail: &'c MockRail, timing: Timing, reading: f32) -> Probe<'c> {
        Probe { core: SensorCore::new("probe", 1, timing, clock, rail), reading }
    }

    #[test]
    fn averages_several_readings() {
        let clock = MockClock::auto_step(0, 5);
        let rail = MockRail::default();
        let mut p = probe(&clock, &rail, Timing::new(20, 10, 10), 4.0);
        p.core = p.core.with_measurements_to_average(4).with_power_pin(9);

        let mut array: VariableArray = VariableArray::new();
        let id = array.add_sensor(&mut p).unwrap();
        array.add_variable(Variable::measured(id, 0, "p", "u", "P")).unwrap();

        assert_eq!(array.complete_update(UpdateOptions::FULL_CYCLE), Ok(true));
        assert_eq!(array.value(0, false), Some(4.0));
        drop(array);

        assert_eq!(p.completed_measurement_attempts(), 4);
        assert!(!rail.is_high(9));
        assert_eq!(rail.times_cut(9), 1);
    }

    #[test]
    fn measure_only_skips_sleeping_sensors() {
        let clock = MockClock::auto_step(0, 1);
        let rail = MockRail::default();
        let mut p = probe(&clock, &rail, Timing::IMMEDIATE, 4.0);

        let mut array: VariableArray = VariableArray::new();
        let id = array.add_sensor(&mut p).unwrap();
        array.add_variable(Variable::measured(id, 0, "p", "u", "P")).unwrap();

        // Nothing attempted, nothing failed
        assert_eq!(array.update_all_sensors(), Ok(true));
        assert_eq!(array.value(0, false), Some(-9999.0));

        array.sensors_power_up().unwrap();
        assert_eq!(array.sensors_wake(), Ok(true));
        assert_eq!(array.update_all_sensors(), Ok(true));
        assert_eq!(array.value(0, false), Some(4.0));
        assert!(array.sensor(id).unwrap().status().wake_successful());
    }

    #[test]
    fn polling_is_stepwise() {
        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let mut p = probe(&clock, &rail, Timing::new(100, 0, 0), 1.0);

        let mut array: VariableArray = VariableArray::new();
        let id = array.add_sensor(&mut p).unwrap();
        array.add_variable(Variable::measured(id, 0, "p", "u", "P")).unwrap();

        let mut cycle = array.begin_update(UpdateOptions::FULL_CYCLE).unwrap();
        assert_eq!(array.poll_update(&mut cycle), Err(nb::Error::WouldBlock));
        assert_eq!(array.poll_update(&mut cycle), Err(nb::Error::WouldBlock));
        assert_eq!(cycle.sensors_remaining(), 1);

        clock.set(101);
        let mut result = array.poll_update(&mut cycle);
        for step in 102..110 {
            if result != Err(nb::Error::WouldBlock) {
                break;
            }
            clock.set(step);
            result = array.poll_update(&mut cycle);
        }
        assert_eq!(result, Ok(true));
        assert!(cycle.is_complete());
        assert_eq!(array.poll_update(&mut cycle), Ok(true));
    }

    #[test]
    fn unregistered_sensor_is_an_error() {
        let mut array: VariableArray = VariableArray::new();
        assert_eq!(
            array.add_variable(Variable::measured(SensorId(0), 0, "p", "u", "P")),
            Err(LoggerError::UnknownSensor { index: 0 })
        );
        // No sensors: the update is trivially complete
        assert_eq!(array.complete_update(UpdateOptions::FULL_CYCLE), Ok(true));
    }
}
