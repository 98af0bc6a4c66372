//! # onebit-sensors
//!
//! Sensor drivers for embassy-based microcontroller boards:
//!
//! - **ultrasonic**: HC-SR04 style trigger/echo driver with unit conversion
//! - **sonar**: background distance tracking with a median-of-5 filter and
//!   threshold handlers
//! - **dht11**: bit-banged DHT11 temperature / humidity reader
//!
//! Drivers are written against `embedded-hal` 1.0 traits and `embassy-time`,
//! so they run on any HAL that provides both. Log lines go through
//! [`serial_log`].

#![cfg_attr(not(test), no_std)]

pub mod constants;
pub mod dht11;
pub mod error;
pub mod serial_log;
pub mod sonar;
pub mod tracker;
pub mod ultrasonic;

pub use error::{Dht11Error, SonarError};
pub use sonar::{Sonar, SonarConfig};
pub use ultrasonic::{DistanceUnit, EdgeEcho, PolledEcho, UltrasonicSensor};
