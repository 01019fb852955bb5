//! Voltage divider on an external ADC
//!
//! Measures a high voltage through a divider feeding a 16-bit ADC. The ADC
//! input is only trusted between -0.3 V and 3.6 V; anything outside that
//! is reported as missing rather than scaled.

use core::fmt::Write;

use heapless::String;

use crate::constants::sensors::LOCATION_LENGTH;
use crate::constants::NO_DATA;
use crate::power::{PinNumber, PowerRail};
use crate::sensor::{Sensor, SensorCore, Timing};
use crate::time::TimeSource;

/// Default I2C address of an ADS1115
pub const ADS1115_ADDRESS: u8 = 0x48;

/// Warm-up of the divider's buffer amplifier (ms)
pub const WARM_UP_MS: u32 = 2;

/// Lowest trusted ADC input (V)
pub const MIN_INPUT_VOLTS: f32 = -0.3;

/// Highest trusted ADC input (V)
pub const MAX_INPUT_VOLTS: f32 = 3.6;

/// Single-ended ADC conversion
pub trait AnalogReader {
    /// Bus or conversion failure
    type Error;

    /// Convert `channel` and return the input voltage
    fn read_volts(&mut self, channel: u8) -> Result<f32, Self::Error>;
}

impl<T: AnalogReader + ?Sized> AnalogReader for &mut T {
    type Error = T::Error;

    fn read_volts(&mut self, channel: u8) -> Result<f32, Self::Error> {
        (**self).read_volts(channel)
    }
}

/// External voltage through a divider of ratio `gain`
///
/// One value: the voltage at the divider input, in volts.
pub struct ExternalVoltage<'c, A> {
    core: SensorCore<'c>,
    adc: A,
    channel: u8,
    gain: f32,
}

impl<'c, A: AnalogReader> ExternalVoltage<'c, A> {
    /// Driver for `channel` of the ADC at `address`
    pub fn new(
        adc: A,
        address: u8,
        channel: u8,
        gain: f32,
        clock: &'c dyn TimeSource,
        rail: &'c dyn PowerRail,
    ) -> Self {
        let mut location: String<LOCATION_LENGTH> = String::new();
        // "ADS1115_0x48_Channel255" is 23 characters
        let _ = write!(location, "ADS1115_0x{:x}_Channel{}", address, channel);

        let core = SensorCore::new("ExternalVoltage", 1, Timing::new(WARM_UP_MS, 0, 0), clock, rail)
            .with_location(&location);
        Self { core, adc, channel, gain }
    }

    /// Switch the divider with `pin`
    pub fn with_power_pin(mut self, pin: PinNumber) -> Self {
        self.core = self.core.with_power_pin(pin);
        self
    }

    /// Average `n` readings per update
    pub fn with_measurements_to_average(mut self, n: u8) -> Self {
        self.core = self.core.with_measurements_to_average(n);
        self
    }

    /// Divider ratio
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Give back the ADC
    pub fn release(self) -> A {
        self.adc
    }

    fn convert(&mut self) -> Option<f32> {
        let volts = match self.adc.read_volts(self.channel) {
            Ok(v) => v,
            Err(_) => {
                log_warn!("{} at {}: conversion failed", self.core.name(), self.core.location());
                return None;
            }
        };
        log_debug!("{} channel {} read {} V", self.core.name(), self.channel, volts);

        if volts > MIN_INPUT_VOLTS && volts < MAX_INPUT_VOLTS {
            Some(volts * self.gain)
        } else {
            log_debug!("{} V is outside the ADC input range", volts);
            None
        }
    }
}

impl<'c, A: AnalogReader> Sensor<'c> for ExternalVoltage<'c, A> {
    fn core(&self) -> &SensorCore<'c> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SensorCore<'c> {
        &mut self.core
    }

    fn add_single_measurement_result(&mut self) -> bool {
        let result = if self.core.status.measurement_successful() {
            self.convert()
        } else {
            log_debug!("{} is not measuring", self.core.name());
            None
        };

        self.core.verify_and_add_result(0, result.unwrap_or(NO_DATA));
        let ok = result.is_some();
        self.core.finish_attempt(ok);
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::MockRail;
    use crate::time::MockClock;

    struct Script<'s> {
        readings: &'s [Result<f32, ()>],
        next: usize,
    }

    impl AnalogReader for Script<'_> {
        type Error = ();

        fn read_volts(&mut self, channel: u8) -> Result<f32, ()> {
            assert_eq!(channel, 2);
            let reading = self.readings.get(self.next).copied().unwrap_or(Err(()));
            self.next += 1;
            reading
        }
    }

    #[test]
    fn location_names_the_adc() {
        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let script = Script { readings: &[], next: 0 };
        let sensor = ExternalVoltage::new(script, ADS1115_ADDRESS, 2, 10.0, &clock, &rail);

        assert_eq!(sensor.location(), "ADS1115_0x48_Channel2");
        assert_eq!(sensor.name(), "ExternalVoltage");
        assert_eq!(sensor.core().num_values(), 1);
    }

    #[test]
    fn scales_and_rejects_out_of_range() {
        let clock = MockClock::auto_step(0, 5);
        let rail = MockRail::default();
        let script = Script { readings: &[Ok(1.2), Ok(3.7), Err(()), Ok(0.8)], next: 0 };
        let mut sensor = ExternalVoltage::new(script, ADS1115_ADDRESS, 2, 10.0, &clock, &rail)
            .with_power_pin(4)
            .with_measurements_to_average(4);

        assert!(!sensor.update());
        assert_eq!(sensor.completed_measurement_attempts(), 4);
        assert_eq!(sensor.core().good_counts(), &[2]);
        assert!((sensor.values()[0] - 10.0).abs() < 1e-4);
        assert!(!rail.is_high(4));
    }

    #[test]
    fn not_measuring_reports_missing() {
        let clock = MockClock::new(0);
        let rail = MockRail::default();
        let script = Script { readings: &[Ok(1.0)], next: 0 };
        let mut sensor = ExternalVoltage::new(script, ADS1115_ADDRESS, 2, 3.0, &clock, &rail);

        assert!(!sensor.add_single_measurement_result());
        assert_eq!(sensor.values(), &[NO_DATA]);
        assert_eq!(sensor.release().next, 0);
    }
}
