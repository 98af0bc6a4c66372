use embassy_time::{with_timeout, Duration, Instant, Timer};
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::digital::Wait;

use crate::constants::ultrasonic::{
    MAX_RANGE_CM, MICROS_PER_CM, MICROS_PER_INCH, ONE_SHOT_RANGE_CM, POLLING_DELAY_US,
    TRIGGER_PULSE_DURATION_US, TRIGGER_SETUP_DELAY_US,
};
use crate::error::{SonarError, SonarResult};

/// Distance unit used by the measurement and threshold APIs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DistanceUnit {
    Centimeters,
    Inches,
}

impl DistanceUnit {
    /// Round-trip microseconds per unit of distance
    pub const fn micros_per_unit(self) -> u32 {
        match self {
            DistanceUnit::Centimeters => MICROS_PER_CM,
            DistanceUnit::Inches => MICROS_PER_INCH,
        }
    }

    /// Convert a round-trip time to a distance (integer division)
    pub const fn from_round_trip(self, round_trip_us: u32) -> u32 {
        round_trip_us / self.micros_per_unit()
    }

    /// Convert a distance to the round-trip time that sound needs to cover it
    pub const fn to_round_trip(self, distance: u32) -> u32 {
        distance.saturating_mul(self.micros_per_unit())
    }
}

/// Round-trip budget for a given range in centimetres
pub const fn range_timeout(max_range_cm: u32) -> Duration {
    Duration::from_micros(max_range_cm as u64 * MICROS_PER_CM as u64)
}

/// Source of echo pulse widths.
///
/// Implementations wait for the echo line to go high, then measure how long
/// it stays high. `None` means no complete pulse arrived within `timeout`.
#[allow(async_fn_in_trait)]
pub trait EchoPin {
    async fn pulse_in(&mut self, timeout: Duration) -> Option<Duration>;
}

/// Echo input driven by pin edge interrupts
pub struct EdgeEcho<P> {
    pin: P,
}

impl<P: Wait> EdgeEcho<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }
}

impl<P: Wait> EchoPin for EdgeEcho<P> {
    async fn pulse_in(&mut self, timeout: Duration) -> Option<Duration> {
        with_timeout(timeout, self.pin.wait_for_high())
            .await
            .ok()?
            .ok()?;
        let echo_start = Instant::now();

        with_timeout(timeout, self.pin.wait_for_low())
            .await
            .ok()?
            .ok()?;
        Some(echo_start.elapsed())
    }
}

/// Echo input sampled in a polling loop, for pins without edge support
pub struct PolledEcho<P> {
    pin: P,
}

impl<P: InputPin> PolledEcho<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }
}

impl<P: InputPin> EchoPin for PolledEcho<P> {
    async fn pulse_in(&mut self, timeout: Duration) -> Option<Duration> {
        // Wait for echo to go high (start of echo pulse)
        let start_time = Instant::now();
        while self.pin.is_low().ok()? {
            if start_time.elapsed() > timeout {
                return None;
            }
            Timer::after(Duration::from_micros(POLLING_DELAY_US)).await;
        }

        // Wait for echo to go low (end of echo pulse)
        let echo_start = Instant::now();
        while self.pin.is_high().ok()? {
            if echo_start.elapsed() > timeout {
                return None;
            }
            Timer::after(Duration::from_micros(POLLING_DELAY_US)).await;
        }

        Some(echo_start.elapsed())
    }
}

/// Ultrasonic sensor driver for HC-SR04 style sensors
pub struct UltrasonicSensor<T, E> {
    trig_pin: T,
    echo: E,
}

impl<T: OutputPin, E: EchoPin> UltrasonicSensor<T, E> {
    /// Creates a new ultrasonic sensor instance, leaving the trigger low
    pub fn new(mut trig_pin: T, echo: E) -> Self {
        let _ = trig_pin.set_low();
        Self { trig_pin, echo }
    }

    /// Send the 10us trigger pulse that starts a ranging cycle
    pub async fn trigger(&mut self) {
        // Ensure trigger pin starts low
        let _ = self.trig_pin.set_low();
        Timer::after(Duration::from_micros(TRIGGER_SETUP_DELAY_US)).await;

        let _ = self.trig_pin.set_high();
        Timer::after(Duration::from_micros(TRIGGER_PULSE_DURATION_US)).await;
        let _ = self.trig_pin.set_low();
    }

    /// Trigger and return the echo round-trip time in microseconds.
    ///
    /// The echo wait is capped at the round trip for `max_range_cm`.
    pub async fn measure_round_trip(&mut self, max_range_cm: u32) -> SonarResult<u32> {
        self.trigger().await;

        let width = self
            .echo
            .pulse_in(range_timeout(max_range_cm))
            .await
            .ok_or(SonarError::NoEcho)?;

        match u32::try_from(width.as_micros()) {
            Ok(0) => Err(SonarError::NoEcho),
            Ok(micros) => Ok(micros),
            Err(_) => Err(SonarError::NoEcho),
        }
    }

    /// Single measurement in `unit` over the default 400cm range
    pub async fn measure_distance(&mut self, unit: DistanceUnit) -> SonarResult<u32> {
        self.measure_distance_within(unit, MAX_RANGE_CM).await
    }

    /// Single measurement in `unit` with a caller-chosen range
    pub async fn measure_distance_within(
        &mut self,
        unit: DistanceUnit,
        max_range_cm: u32,
    ) -> SonarResult<u32> {
        let round_trip_us = self.measure_round_trip(max_range_cm).await?;
        Ok(unit.from_round_trip(round_trip_us))
    }

    /// Give the pins back
    pub fn release(self) -> (T, E) {
        (self.trig_pin, self.echo)
    }
}

/// Set up a sensor on the given pins and take one reading in `unit`,
/// waiting for echoes from up to 500cm away.
pub async fn measure_with_pins<T: OutputPin, E: EchoPin>(
    trig_pin: T,
    echo: E,
    unit: DistanceUnit,
) -> SonarResult<u32> {
    let mut sensor = UltrasonicSensor::new(trig_pin, echo);
    sensor.measure_distance_within(unit, ONE_SHOT_RANGE_CM).await
}

#[cfg(test)]
pub(crate) mod testing {
    //! Pin fakes shared by the driver and tracker tests.

    use core::convert::Infallible;
    use std::cell::Cell;
    use std::rc::Rc;

    use embassy_time::Duration;
    use embedded_hal::digital::{ErrorType, OutputPin};

    use super::EchoPin;

    /// Trigger pin that counts rising edges
    #[derive(Clone, Default)]
    pub struct CountingTrig {
        pub pulses: Rc<Cell<u32>>,
        high: bool,
    }

    impl ErrorType for CountingTrig {
        type Error = Infallible;
    }

    impl OutputPin for CountingTrig {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            if !self.high {
                self.pulses.set(self.pulses.get() + 1);
            }
            self.high = true;
            Ok(())
        }
    }

    /// Echo source answering every trigger with a fixed pulse width
    #[derive(Clone, Default)]
    pub struct FixedEcho {
        pub round_trip_us: Rc<Cell<Option<u64>>>,
    }

    impl FixedEcho {
        pub fn answering(round_trip_us: Option<u64>) -> Self {
            Self {
                round_trip_us: Rc::new(Cell::new(round_trip_us)),
            }
        }
    }

    impl EchoPin for FixedEcho {
        async fn pulse_in(&mut self, timeout: Duration) -> Option<Duration> {
            let width = Duration::from_micros(self.round_trip_us.get()?);
            (width <= timeout).then_some(width)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{CountingTrig, FixedEcho};
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn unit_conversions_use_integer_division() {
        assert_eq!(DistanceUnit::Centimeters.from_round_trip(4000), 68);
        assert_eq!(DistanceUnit::Inches.from_round_trip(4000), 27);
        assert_eq!(DistanceUnit::Centimeters.from_round_trip(57), 0);
        assert_eq!(DistanceUnit::Centimeters.to_round_trip(20), 1160);
        assert_eq!(DistanceUnit::Inches.to_round_trip(10), 1480);
        assert_eq!(DistanceUnit::Inches.to_round_trip(u32::MAX), u32::MAX);
    }

    #[test]
    fn timeout_covers_full_range() {
        assert_eq!(range_timeout(400), Duration::from_micros(23_200));
    }

    #[test]
    fn measurement_sends_one_trigger_pulse() {
        let trig = CountingTrig::default();
        let pulses = trig.pulses.clone();
        let mut sensor = UltrasonicSensor::new(trig, FixedEcho::answering(Some(1160)));

        let distance = block_on(sensor.measure_distance(DistanceUnit::Centimeters));

        assert_eq!(distance, Ok(20));
        assert_eq!(pulses.get(), 1);
    }

    #[test]
    fn zero_width_echo_is_no_echo() {
        let mut sensor = UltrasonicSensor::new(CountingTrig::default(), FixedEcho::answering(Some(0)));
        assert_eq!(
            block_on(sensor.measure_round_trip(MAX_RANGE_CM)),
            Err(SonarError::NoEcho)
        );
    }

    #[test]
    fn echo_beyond_range_is_no_echo() {
        let mut sensor =
            UltrasonicSensor::new(CountingTrig::default(), FixedEcho::answering(Some(25_000)));
        assert_eq!(
            block_on(sensor.measure_distance(DistanceUnit::Centimeters)),
            Err(SonarError::NoEcho)
        );
        // The one-shot helper listens out to 500cm.
        let (trig, echo) = sensor.release();
        assert_eq!(
            block_on(measure_with_pins(trig, echo, DistanceUnit::Centimeters)),
            Ok(431)
        );
    }

    #[test]
    fn inches_measurement() {
        let mut sensor =
            UltrasonicSensor::new(CountingTrig::default(), FixedEcho::answering(Some(1480)));
        assert_eq!(block_on(sensor.measure_distance(DistanceUnit::Inches)), Ok(10));
    }
}
