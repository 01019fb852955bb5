//! Common test utilities for integration tests
//!
//! Provides a scripted sensor that counts every life-cycle call so tests
//! can assert how often the scheduler touched each device.

#![allow(dead_code)]

use fieldlog_core::power::{PinNumber, PowerRail};
use fieldlog_core::sensor::{Phase, Sensor, SensorCore, Timing};
use fieldlog_core::time::TimeSource;
use fieldlog_core::StatusFlag;

/// Calls received by a [`MockSensor`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub setup: u32,
    pub power_up: u32,
    pub power_down: u32,
    pub wake: u32,
    pub sleep: u32,
    pub start: u32,
    pub collect: u32,
}

/// Sensor whose value `i` is `base + i` on every reading
pub struct MockSensor<'c> {
    core: SensorCore<'c>,
    pub calls: Calls,
    base: f32,
    fail_wake: bool,
    device_ready: Option<bool>,
}

impl<'c> MockSensor<'c> {
    pub fn new(
        name: &'static str,
        num_values: u8,
        timing: Timing,
        clock: &'c dyn TimeSource,
        rail: &'c dyn PowerRail,
    ) -> Self {
        Self {
            core: SensorCore::new(name, num_values, timing, clock, rail),
            calls: Calls::default(),
            base: 1.0,
            fail_wake: false,
            device_ready: None,
        }
    }

    pub fn with_power_pin(mut self, pin: PinNumber) -> Self {
        self.core = self.core.with_power_pin(pin);
        self
    }

    pub fn with_secondary_power_pin(mut self, pin: PinNumber) -> Self {
        self.core = self.core.with_secondary_power_pin(pin);
        self
    }

    pub fn with_measurements_to_average(mut self, n: u8) -> Self {
        self.core = self.core.with_measurements_to_average(n);
        self
    }

    pub fn reporting(mut self, base: f32) -> Self {
        self.base = base;
        self
    }

    /// Every wake fails as if the device never answered
    pub fn failing_wake(mut self) -> Self {
        self.fail_wake = true;
        self
    }

    /// Answer "ready" as soon as the nominal time has passed
    pub fn ready_early(mut self) -> Self {
        self.device_ready = Some(true);
        self
    }

    /// Answer "not ready" to every status query, so each phase runs to
    /// its maximum
    pub fn never_ready(mut self) -> Self {
        self.device_ready = Some(false);
        self
    }
}

impl<'c> Sensor<'c> for MockSensor<'c> {
    fn core(&self) -> &SensorCore<'c> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SensorCore<'c> {
        &mut self.core
    }

    fn poll_device_ready(&mut self, _phase: Phase) -> Option<bool> {
        self.device_ready
    }

    fn setup(&mut self) -> bool {
        self.calls.setup += 1;
        self.core.status.set(StatusFlag::SetupSuccessful);
        true
    }

    fn power_up(&mut self) {
        self.calls.power_up += 1;
        self.core.power_up();
    }

    fn power_down(&mut self) {
        self.calls.power_down += 1;
        self.core.power_down();
    }

    fn wake(&mut self) -> bool {
        self.calls.wake += 1;
        if self.fail_wake {
            self.core.status.set(StatusFlag::WakeAttempted);
            return false;
        }
        self.core.wake()
    }

    fn sleep(&mut self) -> bool {
        self.calls.sleep += 1;
        self.core.sleep();
        true
    }

    fn start_single_measurement(&mut self) -> bool {
        self.calls.start += 1;
        let accepted = self.core.status.wake_successful();
        self.core.record_measurement_start(accepted);
        accepted
    }

    fn add_single_measurement_result(&mut self) -> bool {
        self.calls.collect += 1;
        let ok = self.core.status.measurement_successful();
        if ok {
            for i in 0..self.core.num_values() as usize {
                self.core.verify_and_add_result(i, self.base + i as f32);
            }
        }
        self.core.finish_attempt(ok);
        ok
    }
}
