//! The sensor contract
//!
//! Every physical device a logger talks to is a [`Sensor`]. The scheduler
//! knows nothing about buses or protocols: it only sees the life-cycle
//! operations below, called in this order for each reading:
//!
//! ```text
//! power_up ─▶ is_warmed_up ─▶ wake ─▶ is_stable ─▶ start_single_measurement
//!                                                        │
//!     sleep ◀─ (repeat until enough readings) ◀─ add_single_measurement_result
//!       │                                                ▲
//!       ▼                                     is_measurement_complete
//! power_down
//! ```
//!
//! Drivers embed a [`SensorCore`] and implement two methods. The defaults
//! handle timing, power pins and status bits; drivers override only the
//! steps where the device needs a command.
//!
//! ## Implementing a driver
//!
//! ```rust
//! use fieldlog_core::sensor::{Sensor, SensorCore};
//!
//! struct Thermistor<'c> {
//!     core: SensorCore<'c>,
//! }
//!
//! impl<'c> Sensor<'c> for Thermistor<'c> {
//!     fn core(&self) -> &SensorCore<'c> {
//!         &self.core
//!     }
//!
//!     fn core_mut(&mut self) -> &mut SensorCore<'c> {
//!         &mut self.core
//!     }
//!
//!     fn add_single_measurement_result(&mut self) -> bool {
//!         let ok = self.core.status.measurement_successful();
//!         if ok {
//!             self.core.verify_and_add_result(0, 21.5);
//!         }
//!         self.core.finish_attempt(ok);
//!         ok
//!     }
//! }
//! ```

mod state;

pub use self::state::{Phase, PhaseState, SensorCore, Timing};

use crate::constants::SETUP_ATTEMPTS;
use crate::power::PinNumber;
use crate::status::{SensorStatus, StatusFlag};

/// Stable index of a sensor registered in a
/// [`VariableArray`](crate::array::VariableArray)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorId(pub u8);

impl SensorId {
    /// Position in the sensor registry
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A physical sensor driven through power, wake, measurement and sleep
///
/// Object safe: the scheduler holds sensors as `&mut dyn Sensor`.
pub trait Sensor<'c> {
    /// Shared state
    fn core(&self) -> &SensorCore<'c>;

    /// Shared state, mutable
    fn core_mut(&mut self) -> &mut SensorCore<'c>;

    /// Read the result of the finished measurement
    ///
    /// Implementations feed each value through
    /// [`SensorCore::verify_and_add_result`] and close the reading with
    /// [`SensorCore::finish_attempt`], which advances the attempt counter.
    fn add_single_measurement_result(&mut self) -> bool;

    /// Ask the device whether `phase` is over
    ///
    /// Called only between the nominal and the maximum duration of the
    /// phase. `None` means the device cannot tell, and the nominal
    /// duration decides.
    fn poll_device_ready(&mut self, _phase: Phase) -> Option<bool> {
        None
    }

    /// Driver name
    fn name(&self) -> &'static str {
        self.core().name()
    }

    /// Location label
    fn location<'s>(&'s self) -> &'s str
    where
        'c: 's,
    {
        self.core().location()
    }

    /// Current status byte
    fn status(&self) -> SensorStatus {
        self.core().status
    }

    /// Check one status flag
    fn status_bit(&self, flag: StatusFlag) -> bool {
        self.core().status.is_set(flag)
    }

    /// Values of the last reading (the `-9999` sentinel where none)
    fn values<'s>(&'s self) -> &'s [f32]
    where
        'c: 's,
    {
        self.core().values()
    }

    /// One-time initialisation
    fn setup(&mut self) -> bool {
        let core = self.core_mut();
        log_debug!(
            "Setting up {} at {}: {} values, {} readings averaged",
            core.name(),
            core.location(),
            core.num_values(),
            core.measurements_to_average()
        );
        core.status.set(StatusFlag::SetupSuccessful);
        true
    }

    /// Switch power on
    ///
    /// Drivers that override this call [`SensorCore::power_up`] first.
    fn power_up(&mut self) {
        self.core_mut().power_up();
    }

    /// Switch power off
    ///
    /// Clears power, wake and measurement status. A sensor whose power is
    /// not controlled keeps its status untouched.
    fn power_down(&mut self) {
        self.core_mut().power_down();
    }

    /// Read the real pin state into the status bits
    ///
    /// An unpowered sensor loses its wake and measurement bits: whatever
    /// woke it before is no longer valid.
    fn check_power_on(&mut self, debug: bool) -> bool {
        self.core_mut().check_power_on(debug)
    }

    /// Clear both power bits and nothing else
    fn clear_power_status(&mut self) {
        self.core_mut().status.clear_power_bits();
    }

    /// Bring the sensor out of low-power mode
    ///
    /// Drivers that send a wake command call [`SensorCore::wake`] first and
    /// only talk to the device when it succeeded.
    fn wake(&mut self) -> bool {
        self.core_mut().wake()
    }

    /// Put the sensor into low-power mode without cutting power
    fn sleep(&mut self) -> bool {
        self.core_mut().sleep();
        true
    }

    /// Ready to wake: enough time since power-on
    ///
    /// A sensor without power will never warm up, so it reports ready.
    fn is_warmed_up(&mut self, debug: bool) -> bool {
        if !self.core().status.power_successful() {
            if debug {
                log_debug!("{} does not have power and cannot warm up", self.name());
            }
            return true;
        }
        self.phase_ready(Phase::WarmUp)
    }

    /// Ready to measure: enough time since wake
    ///
    /// A sensor that is not awake will never stabilize, so it reports
    /// ready.
    fn is_stable(&mut self, debug: bool) -> bool {
        if !self.core().status.wake_successful() {
            if debug {
                log_debug!("{} is not awake and cannot stabilize", self.name());
            }
            return true;
        }
        self.phase_ready(Phase::Stabilization)
    }

    /// Result available: enough time since the measurement request
    ///
    /// A sensor with no accepted request will never return a value, so it
    /// reports complete.
    fn is_measurement_complete(&mut self, debug: bool) -> bool {
        if !self.core().status.measurement_successful() {
            if debug {
                log_debug!("{} is not measuring", self.name());
            }
            return true;
        }
        self.phase_ready(Phase::Measurement)
    }

    /// Timing check for `phase`, consulting the device when the window
    /// allows
    fn phase_ready(&mut self, phase: Phase) -> bool {
        match self.core().phase_state(phase) {
            PhaseState::Waiting => false,
            PhaseState::Ready => true,
            PhaseState::Probe => self.poll_device_ready(phase).unwrap_or(true),
        }
    }

    /// Request one reading
    ///
    /// The default accepts the request when the sensor is awake. Drivers
    /// that send a command override this and report the outcome through
    /// [`SensorCore::record_measurement_start`].
    fn start_single_measurement(&mut self) -> bool {
        let core = self.core_mut();
        let accepted = core.status.wake_successful();
        if !accepted {
            log_warn!("{} at {} is not awake, no measurement started", core.name(), core.location());
        }
        core.record_measurement_start(accepted);
        accepted
    }

    /// Clear both measurement bits and the request time
    fn clear_measurement_status(&mut self) {
        self.core_mut().clear_measurement();
    }

    /// Reset values to the sentinel and the per-update counters
    fn clear_values(&mut self) {
        log_debug!("Clearing value array for {}", self.name());
        self.core_mut().clear_values();
    }

    /// Turn the accumulated sums into averages
    fn average_measurements(&mut self) {
        log_debug!("Averaging results from {}", self.name());
        self.core_mut().average();
    }

    /// Hand every value to `sink` as `(result index, value)`
    fn notify_variables(&self, sink: &mut dyn FnMut(u8, f32)) {
        for (i, value) in self.values().iter().enumerate() {
            sink(i as u8, *value);
        }
    }

    /// Readings to average per update
    fn measurements_to_average(&self) -> u8 {
        self.core().measurements_to_average()
    }

    /// Readings finished this update
    fn completed_measurement_attempts(&self) -> u8 {
        self.core().attempts_completed()
    }

    /// Give up on the rest of this update
    fn force_skip_remaining(&mut self) {
        self.core_mut().force_skip_remaining();
    }

    /// Primary power pin
    fn power_pin(&self) -> Option<PinNumber> {
        self.core().power_pin()
    }

    /// Secondary power pin
    fn secondary_power_pin(&self) -> Option<PinNumber> {
        self.core().secondary_power_pin()
    }

    /// Take a complete reading of this sensor alone, blocking
    ///
    /// Powers and wakes the sensor if needed, averages the configured number
    /// of readings and then puts the sensor back the way it was found.
    /// Variables are not notified.
    fn update(&mut self) -> bool {
        let was_on = self.check_power_on(false);
        if !was_on {
            self.power_up();
        }

        let was_awake = self.status_bit(StatusFlag::WakeSuccessful);
        if !was_awake {
            while !self.is_warmed_up(false) {}
            if !self.wake() {
                if !was_on {
                    self.power_down();
                }
                return false;
            }
        }

        self.clear_measurement_status();
        self.clear_values();
        while !self.is_stable(false) {}

        let mut success = true;
        while self.completed_measurement_attempts() < self.measurements_to_average() {
            success &= self.start_single_measurement();
            while !self.is_measurement_complete(false) {}
            success &= self.add_single_measurement_result();
        }
        self.average_measurements();

        if !was_awake {
            success &= self.sleep();
        }
        if !was_on {
            self.power_down();
        }
        success
    }
}

/// Run `setup()` until it succeeds, at most [`SETUP_ATTEMPTS`] times
pub fn setup_with_retries<'c>(sensor: &mut (dyn Sensor<'c> + '_)) -> bool {
    for attempt in 1..=SETUP_ATTEMPTS {
        if sensor.setup() {
            return true;
        }
        log_debug!("Setup of {} failed (attempt {})", sensor.name(), attempt);
    }
    log_warn!("Setup of {} failed {} times", sensor.name(), SETUP_ATTEMPTS);
    false
}
