//! Reference sensor drivers
//!
//! Drivers own their bus handle and a [`SensorCore`](crate::sensor::SensorCore);
//! everything device specific stays behind a small hardware trait so the
//! drivers run against mocks on the host.

pub mod analog;

pub use analog::{AnalogReader, ExternalVoltage};
