//! DHT11 temperature / humidity sensor over a bit-banged single-wire bus.
//!
//! The data line needs an open-drain pin with a pull-up: the host pulls it
//! low for the start signal, then releases it and times the sensor's
//! answer. Bit timing is in the tens of microseconds, so reads use a
//! blocking delay and should not be interleaved with other work.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::constants::dht11::{
    BIT_SAMPLE_DELAY_US, EDGE_TIMEOUT_US, FRAME_BITS, RESPONSE_DELAY_US, START_SIGNAL_MS,
};
use crate::error::{Dht11Error, Dht11Result};
use crate::log_warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

/// One decoded frame
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Dht11Reading {
    /// Relative humidity in percent
    pub humidity: f32,
    /// Temperature in degrees Celsius
    pub temperature: f32,
}

impl Dht11Reading {
    /// Decode `[hum_int, hum_dec, temp_int, temp_dec, checksum]`
    pub fn from_frame(frame: &[u8; 5]) -> Dht11Result<Self> {
        let expected = frame[..4]
            .iter()
            .fold(0u8, |sum, byte| sum.wrapping_add(*byte));
        if expected != frame[4] {
            return Err(Dht11Error::Checksum {
                expected,
                actual: frame[4],
            });
        }

        let humidity = f32::from(frame[0]) + f32::from(frame[1]) / 10.0;
        let mut temperature = f32::from(frame[2]) + f32::from(frame[3] & 0x7f) / 10.0;
        // Sub-zero readings set the top bit of the decimal byte.
        if frame[3] & 0x80 != 0 {
            temperature = -temperature;
        }

        Ok(Self {
            humidity,
            temperature,
        })
    }

    pub fn temperature_in(&self, unit: TemperatureUnit) -> f32 {
        match unit {
            TemperatureUnit::Celsius => self.temperature,
            TemperatureUnit::Fahrenheit => self.temperature * 9.0 / 5.0 + 32.0,
        }
    }
}

pub struct Dht11<P, D> {
    pin: P,
    delay: D,
    last: Option<Dht11Reading>,
}

impl<P, D> Dht11<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    /// Takes the open-drain data pin and releases the bus
    pub fn new(mut pin: P, delay: D) -> Self {
        let _ = pin.set_high();
        Self {
            pin,
            delay,
            last: None,
        }
    }

    /// Last successfully decoded frame
    pub fn last_reading(&self) -> Option<Dht11Reading> {
        self.last
    }

    pub fn read_temperature(&mut self, unit: TemperatureUnit) -> Dht11Result<f32> {
        self.read().map(|reading| reading.temperature_in(unit))
    }

    pub fn read_humidity(&mut self) -> Dht11Result<f32> {
        self.read().map(|reading| reading.humidity)
    }

    /// Run one full transaction and decode the frame
    pub fn read(&mut self) -> Dht11Result<Dht11Reading> {
        let result = self
            .read_frame()
            .and_then(|frame| Dht11Reading::from_frame(&frame));
        match result {
            Ok(reading) => self.last = Some(reading),
            Err(err) => log_warn!("DHT11: read failed: {}", err),
        }
        result
    }

    fn read_frame(&mut self) -> Dht11Result<[u8; 5]> {
        // Start signal, then hand the line back to the pull-up
        self.pin.set_low().map_err(|_| Dht11Error::Pin)?;
        self.delay.delay_ms(START_SIGNAL_MS);
        self.pin.set_high().map_err(|_| Dht11Error::Pin)?;
        self.delay.delay_us(RESPONSE_DELAY_US);

        // Sensor answers with ~80us low followed by ~80us high
        if self.is_high()? {
            return Err(Dht11Error::NoResponse);
        }
        self.wait_while(false)?;
        self.wait_while(true)?;

        // Each bit: ~50us low, then high for ~26us ('0') or ~70us ('1')
        let mut frame = [0u8; 5];
        for bit in 0..FRAME_BITS {
            self.wait_while(true)?;
            self.wait_while(false)?;
            self.delay.delay_us(BIT_SAMPLE_DELAY_US);
            if self.is_high()? {
                frame[bit / 8] |= 0x80 >> (bit % 8);
            }
        }
        Ok(frame)
    }

    fn is_high(&mut self) -> Dht11Result<bool> {
        self.pin.is_high().map_err(|_| Dht11Error::Pin)
    }

    /// Poll in 1us steps until the line leaves `level`
    fn wait_while(&mut self, level: bool) -> Dht11Result<()> {
        let mut waited_us = 0;
        while self.is_high()? == level {
            if waited_us >= EDGE_TIMEOUT_US {
                return Err(Dht11Error::Timeout);
            }
            self.delay.delay_us(1);
            waited_us += 1;
        }
        Ok(())
    }
}
