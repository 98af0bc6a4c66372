//! Error types for the sensor drivers

use thiserror::Error;

/// Ultrasonic tracker errors.
///
/// These are in-band results, not faults: a missing echo simply means
/// nothing is in range.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SonarError {
    #[error("ultrasonic pins have not been initialized")]
    Uninitialized,

    #[error("no echo received before the range timeout")]
    NoEcho,

    #[error("distance handler table is full")]
    ObserverLimit,
}

impl SonarError {
    /// Value reported to block-style callers in place of a distance.
    pub const BLOCK_SENTINEL: i32 = -1;

    /// Collapse a measurement result into the block convention: the distance,
    /// or `-1` for any error.
    pub fn as_block_value(result: Result<u32, SonarError>) -> i32 {
        match result {
            Ok(distance) => i32::try_from(distance).unwrap_or(i32::MAX),
            Err(_) => Self::BLOCK_SENTINEL,
        }
    }
}

/// DHT11 read errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dht11Error {
    #[error("DHT11 data pin could not be driven or read")]
    Pin,

    #[error("DHT11 did not answer the start signal")]
    NoResponse,

    #[error("DHT11 line stuck while reading a frame")]
    Timeout,

    #[error("DHT11 checksum mismatch (expected {expected:#04x}, got {actual:#04x})")]
    Checksum { expected: u8, actual: u8 },
}

pub type SonarResult<T> = Result<T, SonarError>;
pub type Dht11Result<T> = Result<T, Dht11Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_value_maps_errors_to_minus_one() {
        assert_eq!(SonarError::as_block_value(Ok(68)), 68);
        assert_eq!(SonarError::as_block_value(Err(SonarError::NoEcho)), -1);
        assert_eq!(
            SonarError::as_block_value(Err(SonarError::Uninitialized)),
            -1
        );
    }
}
