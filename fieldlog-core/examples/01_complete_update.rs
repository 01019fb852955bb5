//! Complete Update Example
//!
//! This example runs one logging interval the way a deployed logger does:
//! every sensor is powered, warmed up, woken, measured, put to sleep and
//! powered down, with all the waiting overlapped.
//!
//! ## What You'll Learn
//!
//! - Writing a sensor driver on top of `SensorCore`
//! - Using the reference `ExternalVoltage` driver
//! - Registering sensors, measured and calculated variables
//! - Reading the results back as text
//!
//! ## Running the Example
//!
//! ```bash
//! cargo run --example 01_complete_update
//! ```

use fieldlog_core::drivers::{AnalogReader, ExternalVoltage};
use fieldlog_core::power::MockRail;
use fieldlog_core::sensor::{Sensor, SensorCore, Timing};
use fieldlog_core::time::MonotonicClock;
use fieldlog_core::variable::Readings;
use fieldlog_core::{UpdateOptions, Variable, VariableArray};

/// Water temperature and depth from a pressure transducer
struct DepthProbe<'c> {
    core: SensorCore<'c>,
}

impl<'c> Sensor<'c> for DepthProbe<'c> {
    fn core(&self) -> &SensorCore<'c> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SensorCore<'c> {
        &mut self.core
    }

    fn add_single_measurement_result(&mut self) -> bool {
        let ok = self.core.status.measurement_successful();
        if ok {
            self.core.verify_and_add_result(0, 14.2);
            self.core.verify_and_add_result(1, 812.0);
        }
        self.core.finish_attempt(ok);
        ok
    }
}

/// Stands in for an ADS1115 on the I2C bus
struct SimulatedAdc;

impl AnalogReader for SimulatedAdc {
    type Error = ();

    fn read_volts(&mut self, _channel: u8) -> Result<f32, ()> {
        Ok(1.24)
    }
}

fn water_level(r: &Readings<'_>) -> f32 {
    // Sensor sits 1.5 m above the stream bed
    r.by_code("Depth").map(|depth| 1500.0 - depth).unwrap_or(-9999.0)
}

fn main() {
    println!("fieldlog Complete Update Example");
    println!("================================\n");

    let clock = MonotonicClock::new();
    let rail = MockRail::default();

    let mut probe = DepthProbe {
        core: SensorCore::new("DepthProbe", 2, Timing::new(500, 200, 300), &clock, &rail)
            .with_power_pin(22)
            .with_location("SDI12-0_Pin7")
            .with_measurements_to_average(3),
    };
    let mut battery = ExternalVoltage::new(SimulatedAdc, 0x48, 0, 10.0, &clock, &rail).with_power_pin(22);

    let mut array: VariableArray = VariableArray::new();
    let probe_id = array.add_sensor(&mut probe).expect("room for the probe");
    let battery_id = array.add_sensor(&mut battery).expect("room for the divider");

    array
        .add_variable(Variable::measured(probe_id, 0, "temperature", "degreeCelsius", "Temp").with_resolution(1))
        .expect("valid variable");
    array
        .add_variable(Variable::measured(probe_id, 1, "waterDepth", "millimeter", "Depth"))
        .expect("valid variable");
    array
        .add_variable(Variable::measured(battery_id, 0, "batteryVoltage", "volt", "Batt").with_resolution(2))
        .expect("valid variable");
    array
        .add_variable(Variable::calculated(water_level, "waterLevel", "millimeter", "Level"))
        .expect("valid variable");

    array
        .variable_mut(0)
        .expect("variable 0")
        .set_uuid("12345678-abcd-1234-ef00-1234567890ab")
        .expect("uuid fits");

    println!("{} variables from {} sensors", array.variable_count(), array.sensor_count());
    println!("UUIDs valid: {}\n", array.check_variable_uuids());

    let started = std::time::Instant::now();
    match array.complete_update(UpdateOptions::FULL_CYCLE) {
        Ok(true) => println!("Update finished in {:?}", started.elapsed()),
        Ok(false) => println!("Update finished with failures in {:?}", started.elapsed()),
        Err(e) => {
            println!("Update aborted: {}", e);
            return;
        }
    }

    let mut report = String::new();
    array.print_sensor_data(&mut report).expect("String never fails");
    println!("\n{}", report);
}
