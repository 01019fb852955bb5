//! Buffered Logging Example
//!
//! Loggers usually measure far more often than they transmit. This example
//! measures every 15 minutes of simulated time, stages each result in a
//! small `LogBuffer`, and "transmits" the buffer as CSV whenever it fills.
//!
//! ## What You'll Learn
//!
//! - Driving an update one pass at a time with `begin_update`/`poll_update`
//! - Appending records with `buffer_record`
//! - Draining a full buffer and starting over
//!
//! ## Running the Example
//!
//! ```bash
//! cargo run --example 02_buffered_logging
//! ```

use fieldlog_core::power::MockRail;
use fieldlog_core::sensor::{Sensor, SensorCore, Timing};
use fieldlog_core::time::MockClock;
use fieldlog_core::{LogBuffer, LogBufferError, LoggerError, UpdateOptions, Variable, VariableArray};

const INTERVAL_S: u32 = 15 * 60;
const START_EPOCH: u32 = 1_700_000_000;

/// Air temperature that warms by half a degree every reading
struct Thermistor<'c> {
    core: SensorCore<'c>,
    temperature: f32,
}

impl<'c> Sensor<'c> for Thermistor<'c> {
    fn core(&self) -> &SensorCore<'c> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SensorCore<'c> {
        &mut self.core
    }

    fn add_single_measurement_result(&mut self) -> bool {
        let ok = self.core.status.measurement_successful();
        if ok {
            self.core.verify_and_add_result(0, self.temperature);
            self.temperature += 0.5;
        }
        self.core.finish_attempt(ok);
        ok
    }
}

fn transmit<const N: usize>(buffer: &LogBuffer<N>) {
    println!("Transmitting {} records ({}% full):", buffer.num_records(), buffer.percent_full());
    for record in buffer.records() {
        let values: Vec<String> = record.values().map(|v| format!("{:.1}", v)).collect();
        println!("  {},{}", record.timestamp(), values.join(","));
    }
}

fn main() {
    println!("fieldlog Buffered Logging Example");
    println!("=================================\n");

    // Simulated millisecond clock, one tick per read
    let clock = MockClock::auto_step(0, 1);
    let rail = MockRail::default();

    let mut air = Thermistor {
        core: SensorCore::new("Thermistor", 1, Timing::new(20, 10, 5), &clock, &rail).with_power_pin(4),
        temperature: 18.0,
    };

    let mut array: VariableArray = VariableArray::new();
    let id = array.add_sensor(&mut air).expect("room for the sensor");
    array
        .add_variable(Variable::measured(id, 0, "airTemperature", "degreeCelsius", "AirTemp"))
        .expect("valid variable");

    // Room for five records of one value
    let mut buffer: LogBuffer<40> = LogBuffer::new();
    buffer.set_num_variables(array.variable_count() as u8);

    for interval in 0..12 {
        let timestamp = START_EPOCH + interval * INTERVAL_S;

        let mut cycle = array.begin_update(UpdateOptions::FULL_CYCLE).expect("registry is valid");
        let ok = loop {
            match array.poll_update(&mut cycle) {
                Ok(ok) => break ok,
                // A real logger would service its modem or display here
                Err(nb::Error::WouldBlock) => continue,
                Err(nb::Error::Other(e)) => panic!("update failed: {}", e),
            }
        };
        println!("Interval {:2}: {} passes, success {}", interval, cycle.passes(), ok);

        match array.buffer_record(&mut buffer, timestamp) {
            Ok(_) => {}
            Err(LoggerError::Buffer(LogBufferError::NoSpace { .. })) => {
                transmit(&buffer);
                buffer.clear();
                array.buffer_record(&mut buffer, timestamp).expect("empty buffer has room");
            }
            Err(e) => panic!("cannot buffer: {}", e),
        }
    }

    transmit(&buffer);
}
