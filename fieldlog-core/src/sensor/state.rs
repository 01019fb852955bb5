//! State shared by every sensor driver

use core::cell::Cell;
use core::fmt::Write;

use heapless::String;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::constants::sensors::LOCATION_LENGTH;
use crate::constants::{MAX_VALUES_PER_SENSOR, NO_DATA};
use crate::power::{PinNumber, PowerError, PowerRail};
use crate::status::{SensorStatus, StatusFlag};
use crate::time::{self, Duration, Instant, TimeSource};

/// Timed phase of the sensor life-cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Power on until the sensor answers
    WarmUp,
    /// Wake until readings are trustworthy
    Stabilization,
    /// Measurement request until the result is ready
    Measurement,
}

impl Phase {
    const fn bit(self) -> u8 {
        match self {
            Phase::WarmUp => 1 << 0,
            Phase::Stabilization => 1 << 1,
            Phase::Measurement => 1 << 2,
        }
    }
}

/// Where a phase stands right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    /// Nominal duration not yet elapsed
    Waiting,
    /// Past nominal, before the hard maximum: ask the device
    Probe,
    /// Past the hard maximum, or the phase was never started
    Ready,
}

/// Nominal and maximum duration of each timed phase
///
/// A phase is never ready before its nominal duration. Between nominal
/// and maximum the driver may ask the device; past the maximum the phase
/// is ready whatever the device says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Expected warm-up time
    pub warm_up: Duration,
    /// Longest warm-up before giving up on the device
    pub warm_up_max: Duration,
    /// Expected stabilization time
    pub stabilization: Duration,
    /// Longest stabilization before giving up on the device
    pub stabilization_max: Duration,
    /// Expected measurement time
    pub measurement: Duration,
    /// Longest measurement before giving up on the device
    pub measurement_max: Duration,
}

impl Timing {
    /// No waiting at all
    pub const IMMEDIATE: Self = Self::new(0, 0, 0);

    /// Fixed durations, maximum equal to nominal
    pub const fn new(warm_up_ms: u32, stabilization_ms: u32, measurement_ms: u32) -> Self {
        Self {
            warm_up: Duration::from_ticks(warm_up_ms),
            warm_up_max: Duration::from_ticks(warm_up_ms),
            stabilization: Duration::from_ticks(stabilization_ms),
            stabilization_max: Duration::from_ticks(stabilization_ms),
            measurement: Duration::from_ticks(measurement_ms),
            measurement_max: Duration::from_ticks(measurement_ms),
        }
    }

    /// Set the hard maximum of each phase
    ///
    /// A maximum below its nominal duration is raised to the nominal one.
    pub const fn with_max(
        mut self,
        warm_up_max_ms: u32,
        stabilization_max_ms: u32,
        measurement_max_ms: u32,
    ) -> Self {
        self.warm_up_max = Duration::from_ticks(max_u32(warm_up_max_ms, self.warm_up.ticks()));
        self.stabilization_max =
            Duration::from_ticks(max_u32(stabilization_max_ms, self.stabilization.ticks()));
        self.measurement_max =
            Duration::from_ticks(max_u32(measurement_max_ms, self.measurement.ticks()));
        self
    }

    /// Nominal and maximum duration of `phase`
    pub const fn window(&self, phase: Phase) -> (Duration, Duration) {
        match phase {
            Phase::WarmUp => (self.warm_up, self.warm_up_max),
            Phase::Stabilization => (self.stabilization, self.stabilization_max),
            Phase::Measurement => (self.measurement, self.measurement_max),
        }
    }

    /// Worst case for one measurement from power-on
    pub fn worst_case(&self) -> Duration {
        Duration::from_ticks(
            self.warm_up_max
                .ticks()
                .saturating_add(self.stabilization_max.ticks())
                .saturating_add(self.measurement_max.ticks()),
        )
    }
}

const fn max_u32(a: u32, b: u32) -> u32 {
    if a > b { a } else { b }
}

/// Shared driver state: configuration, timestamps, status and accumulators
///
/// Every driver embeds one and hands it out through
/// [`Sensor::core`](super::Sensor::core). The lifetime `'c` is that of the
/// clock and the power rail the sensor was built with.
pub struct SensorCore<'c> {
    name: &'static str,
    location: String<LOCATION_LENGTH>,
    num_values: u8,
    timing: Timing,

    power_pin: Option<PinNumber>,
    secondary_power_pin: Option<PinNumber>,
    data_pin: Option<PinNumber>,

    measurements_to_average: u8,
    allowed_retries: u8,
    attempts_completed: u8,
    retries_made: u8,

    power_on_at: Option<Instant>,
    activated_at: Option<Instant>,
    measurement_requested_at: Option<Instant>,
    // One bit per `Phase` that ran past its maximum
    timed_out: Cell<u8>,

    /// Life-cycle flags
    pub status: SensorStatus,
    values: [f32; MAX_VALUES_PER_SENSOR],
    good_counts: [u8; MAX_VALUES_PER_SENSOR],

    clock: &'c dyn TimeSource,
    rail: &'c dyn PowerRail,
}

impl<'c> SensorCore<'c> {
    /// New sensor returning `num_values` results
    ///
    /// `num_values` is capped at [`MAX_VALUES_PER_SENSOR`]. Power is not
    /// controlled until a pin is given.
    pub fn new(
        name: &'static str,
        num_values: u8,
        timing: Timing,
        clock: &'c dyn TimeSource,
        rail: &'c dyn PowerRail,
    ) -> Self {
        Self {
            name,
            location: String::new(),
            num_values: num_values.min(MAX_VALUES_PER_SENSOR as u8),
            timing,
            power_pin: None,
            secondary_power_pin: None,
            data_pin: None,
            measurements_to_average: 1,
            allowed_retries: 0,
            attempts_completed: 0,
            retries_made: 0,
            power_on_at: None,
            activated_at: None,
            measurement_requested_at: None,
            timed_out: Cell::new(0),
            status: SensorStatus::new(),
            values: [NO_DATA; MAX_VALUES_PER_SENSOR],
            good_counts: [0; MAX_VALUES_PER_SENSOR],
            clock,
            rail,
        }
    }

    /// Switch power through `pin`
    pub fn with_power_pin(mut self, pin: PinNumber) -> Self {
        self.power_pin = Some(pin);
        self
    }

    /// Also switch `pin` (adapter, level shifter)
    pub fn with_secondary_power_pin(mut self, pin: PinNumber) -> Self {
        self.secondary_power_pin = Some(pin);
        self
    }

    /// Data line, for drivers that need it
    ///
    /// Also labels the sensor `Pin<n>` unless a location is already set.
    pub fn with_data_pin(mut self, pin: PinNumber) -> Self {
        self.data_pin = Some(pin);
        if self.location.is_empty() {
            let _ = write!(self.location, "Pin{}", pin);
        }
        self
    }

    /// Human-readable location, truncated to fit
    pub fn with_location(mut self, location: &str) -> Self {
        self.location.clear();
        for c in location.chars() {
            if self.location.push(c).is_err() {
                break;
            }
        }
        self
    }

    /// Average `n` readings per update (at least one)
    pub fn with_measurements_to_average(mut self, n: u8) -> Self {
        self.measurements_to_average = n.max(1);
        self
    }

    /// Retry a failed reading up to `n` times before counting it
    pub fn with_allowed_retries(mut self, n: u8) -> Self {
        self.allowed_retries = n;
        self
    }

    /// Driver name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Location label
    pub fn location(&self) -> &str {
        self.location.as_str()
    }

    /// Results per reading
    pub fn num_values(&self) -> u8 {
        self.num_values
    }

    /// Phase durations
    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Primary power pin
    pub fn power_pin(&self) -> Option<PinNumber> {
        self.power_pin
    }

    /// Secondary power pin
    pub fn secondary_power_pin(&self) -> Option<PinNumber> {
        self.secondary_power_pin
    }

    /// Data pin
    pub fn data_pin(&self) -> Option<PinNumber> {
        self.data_pin
    }

    /// Readings averaged per update
    pub fn measurements_to_average(&self) -> u8 {
        self.measurements_to_average
    }

    /// Readings finished this update, failed or not
    pub fn attempts_completed(&self) -> u8 {
        self.attempts_completed
    }

    /// Retries made on the current reading
    pub fn retries_made(&self) -> u8 {
        self.retries_made
    }

    /// Accumulated (or, after averaging, final) values
    pub fn values(&self) -> &[f32] {
        &self.values[..self.num_values as usize]
    }

    /// Good readings accumulated per value
    pub fn good_counts(&self) -> &[u8] {
        &self.good_counts[..self.num_values as usize]
    }

    /// Current clock reading
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Power rail this sensor switches
    pub fn rail(&self) -> &'c dyn PowerRail {
        self.rail
    }

    /// Power-on time, if powered
    pub fn power_on_at(&self) -> Option<Instant> {
        self.power_on_at
    }

    /// Wake time, if awake
    pub fn activated_at(&self) -> Option<Instant> {
        self.activated_at
    }

    /// Time of the outstanding measurement request
    pub fn measurement_requested_at(&self) -> Option<Instant> {
        self.measurement_requested_at
    }

    fn mark_powered(&mut self, keep_existing: bool) {
        if !(keep_existing && self.power_on_at.is_some()) {
            self.power_on_at = Some(self.clock.now());
            self.restart_phase(Phase::WarmUp);
        }
    }

    fn mark_unpowered(&mut self) {
        self.power_on_at = None;
        self.activated_at = None;
        self.measurement_requested_at = None;
    }

    fn mark_awake(&mut self, awake: bool) {
        self.activated_at = awake.then(|| self.clock.now());
        self.restart_phase(Phase::Stabilization);
    }

    fn restart_phase(&self, phase: Phase) {
        self.timed_out.set(self.timed_out.get() & !phase.bit());
    }

    /// Whether any power pin is set
    pub fn power_controlled(&self) -> bool {
        self.power_pin.is_some() || self.secondary_power_pin.is_some()
    }

    fn report_pin_error(&mut self, error: PowerError) {
        log_warn!("{} at {}: {}", self.name, self.location.as_str(), error);
        self.status.set(StatusFlag::ErrorOccurred);
    }

    /// Raise the power pins and start the warm-up clock
    ///
    /// Each configured pin is driven on its own. When every pin was already
    /// high the original power-on time is kept so the warm-up already served
    /// is not repeated. A pin error leaves `PowerSuccessful` unset and sets
    /// `ErrorOccurred`.
    pub fn power_up(&mut self) {
        self.status.set(StatusFlag::PowerAttempted);

        if !self.power_controlled() {
            log_debug!("Power to {} is not controlled", self.name);
            self.mark_powered(true);
            self.status.set(StatusFlag::PowerSuccessful);
            return;
        }

        let mut already_on = true;
        let mut ok = true;
        let pins = [self.power_pin, self.secondary_power_pin];
        for pin in pins.into_iter().flatten() {
            let switched = match self.rail.is_pin_high(pin) {
                Ok(true) => Ok(()),
                Ok(false) => {
                    log_debug!("Powering {} at {} with pin {}", self.name, self.location.as_str(), pin);
                    already_on = false;
                    self.rail.set_pin(pin, true)
                }
                Err(e) => Err(e),
            };
            if let Err(e) = switched {
                self.report_pin_error(e);
                ok = false;
            }
        }

        if ok {
            self.mark_powered(already_on);
            self.status.set(StatusFlag::PowerSuccessful);
        }
    }

    /// Drop the power pins and clear power, wake and measurement state
    ///
    /// Does nothing when power is not controlled. Pin errors are reported
    /// but the sensor is still treated as off.
    pub fn power_down(&mut self) {
        if !self.power_controlled() {
            log_debug!("Power to {} is not controlled", self.name);
            return;
        }

        let pins = [self.power_pin, self.secondary_power_pin];
        for pin in pins.into_iter().flatten() {
            log_debug!("Turning off power to {} with pin {}", self.name, pin);
            if let Err(e) = self.rail.set_pin(pin, false) {
                self.report_pin_error(e);
            }
        }
        self.mark_unpowered();
        self.status.clear_power_cascade();
    }

    /// Read the real pin state into the status bits
    ///
    /// Powered means every configured pin reads high. A pin that cannot be
    /// read counts as off.
    pub fn check_power_on(&mut self, debug: bool) -> bool {
        let mut powered = true;
        let pins = [self.power_pin, self.secondary_power_pin];
        for pin in pins.into_iter().flatten() {
            match self.rail.is_pin_high(pin) {
                Ok(high) => powered &= high,
                Err(e) => {
                    self.report_pin_error(e);
                    powered = false;
                }
            }
        }

        if debug {
            log_debug!("Power to {} is on: {}", self.name, powered);
        }
        if powered {
            self.mark_powered(true);
            self.status.set(StatusFlag::PowerSuccessful);
        } else {
            self.mark_unpowered();
            self.status.clear_power_cascade();
        }
        powered
    }

    /// Mark the sensor awake and start the stabilization clock
    ///
    /// Fails, leaving the wake attempted, when the sensor has no power.
    pub fn wake(&mut self) -> bool {
        self.status.set(StatusFlag::WakeAttempted);

        if !self.status.power_successful() {
            log_warn!(
                "{} at {} does not have power and cannot wake",
                self.name,
                self.location.as_str()
            );
            self.mark_awake(false);
            return false;
        }

        log_debug!("Waking {} at {}", self.name, self.location.as_str());
        self.mark_awake(true);
        self.status.set(StatusFlag::WakeSuccessful);
        true
    }

    /// Mark the sensor asleep, dropping any outstanding measurement
    pub fn sleep(&mut self) {
        log_debug!("Putting {} at {} to sleep", self.name, self.location.as_str());
        self.mark_awake(false);
        self.status.clear_wake_bits();
        self.clear_measurement();
    }

    /// Where `phase` stands
    ///
    /// A phase that was never started (no power-on, wake or request time)
    /// is `Ready`. Running past a maximum longer than the nominal duration
    /// is logged once per run of the phase.
    pub fn phase_state(&self, phase: Phase) -> PhaseState {
        let started = match phase {
            Phase::WarmUp => self.power_on_at,
            Phase::Stabilization => self.activated_at,
            Phase::Measurement => self.measurement_requested_at,
        };
        let Some(started) = started else { return PhaseState::Ready };

        let elapsed = time::elapsed(started, self.clock.now());
        let (nominal, max) = self.timing.window(phase);

        if elapsed <= nominal {
            PhaseState::Waiting
        } else if elapsed > max {
            if max > nominal && self.timed_out.get() & phase.bit() == 0 {
                self.timed_out.set(self.timed_out.get() | phase.bit());
                log_warn!(
                    "{} at {}: {:?} timed out after {} ms",
                    self.name,
                    self.location.as_str(),
                    phase,
                    elapsed.ticks()
                );
            }
            PhaseState::Ready
        } else {
            PhaseState::Probe
        }
    }

    /// Whether the current run of `phase` went past its maximum
    pub fn timed_out(&self, phase: Phase) -> bool {
        self.timed_out.get() & phase.bit() != 0
    }

    /// The single place that writes measurement-start bits
    ///
    /// A rejected start still counts as attempted, so the scheduler moves
    /// straight on to collecting (and recording the failure).
    pub fn record_measurement_start(&mut self, accepted: bool) {
        if accepted {
            self.measurement_requested_at = Some(self.clock.now());
            self.restart_phase(Phase::Measurement);
            self.status.set(StatusFlag::MeasurementSuccessful);
        } else {
            self.measurement_requested_at = None;
            self.status.set(StatusFlag::MeasurementAttempted);
            self.status.clear(StatusFlag::MeasurementSuccessful);
        }
    }

    /// Fold one result into the running sum
    ///
    /// The `-9999` sentinel and non-finite values are ignored.
    pub fn verify_and_add_result(&mut self, index: usize, value: f32) {
        if index >= self.num_values as usize {
            return;
        }
        if value == NO_DATA || !value.is_finite() {
            log_debug!("{}: ignoring bad result for value {}", self.name, index);
            return;
        }

        if self.good_counts[index] == 0 {
            self.values[index] = value;
        } else {
            self.values[index] += value;
        }
        self.good_counts[index] = self.good_counts[index].saturating_add(1);
    }

    /// Close the current reading
    ///
    /// Clears the measurement bits so the next reading can start. A failed
    /// reading is retried until `allowed_retries` is used up and only then
    /// counts as a completed attempt.
    pub fn finish_attempt(&mut self, success: bool) {
        self.status.clear_measurement_bits();
        self.measurement_requested_at = None;

        if success {
            self.attempts_completed = self.attempts_completed.saturating_add(1);
            self.retries_made = 0;
            return;
        }

        self.retries_made = self.retries_made.saturating_add(1);
        if self.retries_made > self.allowed_retries {
            log_debug!("{}: reading failed after {} retries", self.name, self.allowed_retries);
            self.attempts_completed = self.attempts_completed.saturating_add(1);
            self.retries_made = 0;
        }
    }

    /// Divide each sum by its number of good results
    pub fn average(&mut self) {
        let n = self.num_values as usize;
        for (value, count) in self.values[..n].iter_mut().zip(&self.good_counts[..n]) {
            if *count > 0 {
                *value /= *count as f32;
            }
        }
    }

    /// Reset values to the sentinel and all per-update counters
    pub fn clear_values(&mut self) {
        self.values = [NO_DATA; MAX_VALUES_PER_SENSOR];
        self.good_counts = [0; MAX_VALUES_PER_SENSOR];
        self.attempts_completed = 0;
        self.retries_made = 0;
    }

    /// Mark every remaining reading of this update as done
    pub fn force_skip_remaining(&mut self) {
        self.attempts_completed = self.measurements_to_average;
        self.retries_made = 0;
    }

    /// Drop an outstanding measurement request
    pub fn clear_measurement(&mut self) {
        self.status.clear_measurement_bits();
        self.measurement_requested_at = None;
    }
}

impl core::fmt::Debug for SensorCore<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SensorCore")
            .field("name", &self.name)
            .field("location", &self.location.as_str())
            .field("status", &self.status)
            .field("attempts_completed", &self.attempts_completed)
            .field("values", &self.values())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::MockRail;
    use crate::time::MockClock;

    #[test]
    fn averages_only_good_results() {
        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let mut core = SensorCore::new("test", 2, Timing::IMMEDIATE, &clock, &rail);

        core.verify_and_add_result(0, 10.0);
        core.verify_and_add_result(0, NO_DATA);
        core.verify_and_add_result(0, 20.0);
        core.verify_and_add_result(1, f32::NAN);
        core.verify_and_add_result(5, 1.0);
        core.average();

        assert_eq!(core.values(), &[15.0, NO_DATA]);
        assert_eq!(core.good_counts(), &[2, 0]);
    }

    #[test]
    fn retries_before_counting() {
        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let mut core = SensorCore::new("test", 1, Timing::IMMEDIATE, &clock, &rail)
            .with_allowed_retries(2);

        core.finish_attempt(false);
        core.finish_attempt(false);
        assert_eq!(core.attempts_completed(), 0);
        core.finish_attempt(false);
        assert_eq!(core.attempts_completed(), 1);
        core.finish_attempt(true);
        assert_eq!(core.attempts_completed(), 2);
    }

    #[test]
    fn rejected_start_is_still_attempted() {
        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let mut core = SensorCore::new("test", 1, Timing::IMMEDIATE, &clock, &rail);

        core.record_measurement_start(false);
        assert!(core.status.measurement_attempted());
        assert!(!core.status.measurement_successful());
        assert!(core.measurement_requested_at().is_none());

        core.record_measurement_start(true);
        assert!(core.status.measurement_successful());
        assert!(core.measurement_requested_at().is_some());
    }

    #[test]
    fn phase_windows() {
        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let timing = Timing::new(100, 0, 0).with_max(300, 0, 0);
        let mut core = SensorCore::new("test", 1, timing, &clock, &rail);

        assert_eq!(core.phase_state(Phase::WarmUp), PhaseState::Ready);

        core.mark_powered(false);
        clock.set(100);
        assert_eq!(core.phase_state(Phase::WarmUp), PhaseState::Waiting);
        clock.set(101);
        assert_eq!(core.phase_state(Phase::WarmUp), PhaseState::Probe);
        clock.set(301);
        assert_eq!(core.phase_state(Phase::WarmUp), PhaseState::Ready);
    }

    #[test]
    fn timeout_is_flagged_once_per_run() {
        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let timing = Timing::new(10, 0, 0).with_max(50, 0, 0);
        let mut core = SensorCore::new("test", 1, timing, &clock, &rail).with_power_pin(2);

        core.power_up();
        clock.set(40);
        assert_eq!(core.phase_state(Phase::WarmUp), PhaseState::Probe);
        assert!(!core.timed_out(Phase::WarmUp));

        clock.set(60);
        for _ in 0..3 {
            assert_eq!(core.phase_state(Phase::WarmUp), PhaseState::Ready);
            assert!(core.timed_out(Phase::WarmUp));
        }
        assert!(!core.timed_out(Phase::Stabilization));

        // A fresh power-on starts a new run
        core.power_down();
        core.power_up();
        assert!(!core.timed_out(Phase::WarmUp));
        assert_eq!(core.phase_state(Phase::WarmUp), PhaseState::Waiting);
    }

    #[test]
    fn fixed_window_never_flags_timeout() {
        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let mut core = SensorCore::new("test", 1, Timing::new(0, 0, 10), &clock, &rail);

        core.record_measurement_start(true);
        clock.set(500);
        assert_eq!(core.phase_state(Phase::Measurement), PhaseState::Ready);
        assert!(!core.timed_out(Phase::Measurement));
    }

    #[test]
    fn data_pin_names_the_location() {
        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let core = SensorCore::new("test", 1, Timing::IMMEDIATE, &clock, &rail).with_data_pin(17);
        assert_eq!(core.data_pin(), Some(17));
        assert_eq!(core.location(), "Pin17");

        let labelled = SensorCore::new("test", 1, Timing::IMMEDIATE, &clock, &rail)
            .with_location("mast")
            .with_data_pin(17);
        assert_eq!(labelled.location(), "mast");
    }

    #[test]
    fn secondary_pin_alone_controls_power() {
        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let mut core = SensorCore::new("test", 1, Timing::IMMEDIATE, &clock, &rail)
            .with_secondary_power_pin(9);
        assert!(core.power_controlled());

        core.power_up();
        assert!(rail.is_high(9));
        assert!(core.status.power_successful());

        core.power_down();
        assert!(!rail.is_high(9));
        assert!(core.power_on_at().is_none());
    }

    #[test]
    fn unreadable_pin_counts_as_off() {
        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let mut core = SensorCore::new("test", 1, Timing::IMMEDIATE, &clock, &rail).with_power_pin(3);
        core.power_up();
        rail.set_faulty(3, true);

        assert!(!core.check_power_on(false));
        assert!(!core.status.power_successful());
        assert!(core.status.is_set(StatusFlag::ErrorOccurred));
    }

    #[test]
    fn location_is_truncated() {
        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let core = SensorCore::new("test", 1, Timing::IMMEDIATE, &clock, &rail)
            .with_location("a location label that is much too long");
        assert_eq!(core.location().len(), LOCATION_LENGTH);
    }

    #[test]
    fn max_never_below_nominal() {
        let timing = Timing::new(500, 0, 0).with_max(100, 0, 0);
        assert_eq!(timing.warm_up_max.ticks(), 500);
        assert_eq!(timing.worst_case().ticks(), 500);
    }
}
