//! Background distance tracking on top of [`UltrasonicSensor`].
//!
//! A [`Sonar`] owns the sensor pins and the [`TrackerState`]. Spawn
//! [`Sonar::run`] as a task; it pings the sensor every cycle, keeps a
//! median-of-5 over the echoes and calls registered handlers when the median
//! crosses their threshold, on the way in and on the way out. Foreground code can query the latest median
//! without blocking, or take a one-off measurement.
//!
//! ```rust,ignore
//! static SONAR: Sonar<CriticalSectionRawMutex, Output<'static>, EdgeEcho<Input<'static>>> =
//!     Sonar::new(SonarConfig::new());
//!
//! SONAR.initialize(trig, EdgeEcho::new(echo)).await;
//! SONAR.on_object_detected_within(20, DistanceUnit::Centimeters, on_near)?;
//! spawner.spawn(sonar_task())?; // calls SONAR.run()
//! ```

use core::cell::RefCell;

use embassy_futures::select::{select, Either};
use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use embedded_hal::digital::OutputPin;
use heapless::Vec;

use crate::constants::ultrasonic::{
    CYCLE_MS, MAX_OBSERVERS, MAX_RANGE_CM, NO_OBJECT_ROUND_TRIP_US, STALE_SLACK_MS,
};
use crate::error::{SonarError, SonarResult};
use crate::tracker::{FiredThresholds, ObserverKind, Sample, TrackerState};
use crate::ultrasonic::{DistanceUnit, EchoPin, UltrasonicSensor};
use crate::{log_info, log_warn};

/// Distance handler. Runs inside the background loop.
pub type Handler = fn();

/// Background tracking parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SonarConfig {
    /// Time between trigger pulses
    pub cycle: Duration,
    /// Extra age beyond one cycle before the newest sample is considered stale
    pub stale_slack: Duration,
    /// Echo wait limit, expressed as a range
    pub max_range_cm: u32,
    /// Round trip recorded when nothing answers
    pub no_object_us: u32,
}

impl SonarConfig {
    pub const fn new() -> Self {
        Self {
            cycle: Duration::from_millis(CYCLE_MS),
            stale_slack: Duration::from_millis(STALE_SLACK_MS),
            max_range_cm: MAX_RANGE_CM,
            no_object_us: NO_OBJECT_ROUND_TRIP_US,
        }
    }

    fn new_state(&self) -> TrackerState {
        TrackerState::new(
            self.no_object_us,
            self.cycle.as_millis() + self.stale_slack.as_millis(),
        )
    }
}

impl Default for SonarConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy)]
struct Subscription {
    threshold_us: u32,
    kind: ObserverKind,
    handler: Handler,
}

/// Ultrasonic distance tracker for one sensor
pub struct Sonar<M: RawMutex, T, E> {
    config: SonarConfig,
    sensor: Mutex<M, Option<UltrasonicSensor<T, E>>>,
    state: BlockingMutex<M, RefCell<Option<TrackerState>>>,
    subscriptions: BlockingMutex<M, RefCell<Vec<Subscription, MAX_OBSERVERS>>>,
    stop: Signal<M, ()>,
}

impl<M: RawMutex, T, E> Sonar<M, T, E> {
    pub const fn new(config: SonarConfig) -> Self {
        Self {
            config,
            sensor: Mutex::new(None),
            state: BlockingMutex::new(RefCell::new(None)),
            subscriptions: BlockingMutex::new(RefCell::new(Vec::new())),
            stop: Signal::new(),
        }
    }

    pub fn config(&self) -> &SonarConfig {
        &self.config
    }

    /// True once `distance` is strictly greater than the filtered distance.
    ///
    /// Yields once before reading so a tight polling loop leaves room for
    /// the background task. Always false before [`initialize`](Self::initialize).
    pub async fn is_within_distance(&self, distance: u32, unit: DistanceUnit) -> bool {
        yield_now().await;
        self.read_state(|state| {
            state.pins_bound() && unit.from_round_trip(state.median_us()) < distance
        })
        .unwrap_or(false)
    }

    /// Latest filtered distance, or `None` before initialization
    pub fn median_distance(&self, unit: DistanceUnit) -> Option<u32> {
        self.read_state(|state| {
            state
                .pins_bound()
                .then(|| unit.from_round_trip(state.median_us()))
        })
        .flatten()
    }

    /// Call `handler` when an object comes within `distance`, and again when
    /// it moves back out.
    ///
    /// A zero distance is ignored. Registering before
    /// [`initialize`](Self::initialize) is allowed; the handler starts
    /// firing once the pins are bound and [`run`](Self::run) is going.
    pub fn on_object_detected_within(
        &self,
        distance: u32,
        unit: DistanceUnit,
        handler: Handler,
    ) -> SonarResult<()> {
        self.register(distance, unit, handler, ObserverKind::ObjectDetected)
    }

    /// Call `handler` when the distance crosses `distance`.
    ///
    /// Shares its event with [`on_object_detected_within`](Self::on_object_detected_within):
    /// both fire when the median drops to the threshold and when it moves
    /// back above it. Use [`median_distance`](Self::median_distance) inside
    /// the handler to tell the two apart.
    pub fn on_distance_change_within(
        &self,
        distance: u32,
        unit: DistanceUnit,
        handler: Handler,
    ) -> SonarResult<()> {
        self.register(distance, unit, handler, ObserverKind::DistanceChange)
    }

    pub fn observer_count(&self) -> usize {
        self.read_state(|state| state.observers().len())
            .unwrap_or(0)
    }

    /// Ask [`run`](Self::run) to return at the end of its current cycle.
    ///
    /// A stop requested while the loop is not running is discarded by the
    /// next [`run`](Self::run).
    pub fn stop(&self) {
        self.stop.signal(());
    }

    /// Record an echo that came back at `now_ms`
    pub fn record_round_trip(&self, now_ms: u64, round_trip_us: u32) {
        self.state.lock(|cell| {
            if let Some(state) = cell.borrow_mut().as_mut() {
                state.push_sample(Sample {
                    timestamp_ms: now_ms,
                    round_trip_us,
                });
            }
        });
    }

    /// Run one tracking step at `now_ms` and notify handlers of any crossing.
    ///
    /// Handlers run after the state lock is released, so they may call back
    /// into the sonar. The returned list has one entry per observer that
    /// crossed, but the event for a threshold is raised once per step: every
    /// handler subscribed to that threshold runs exactly once, however many
    /// observers share it.
    pub fn evaluate_at(&self, now_ms: u64) -> FiredThresholds {
        let (fired, median_us) = self.state.lock(|cell| {
            cell.borrow_mut()
                .as_mut()
                .map(|state| (state.evaluate(now_ms), state.median_us()))
                .unwrap_or_default()
        });

        for (i, &threshold_us) in fired.iter().enumerate() {
            if fired[..i].contains(&threshold_us) {
                continue;
            }
            self.dispatch(threshold_us, median_us <= threshold_us);
        }
        fired
    }

    fn dispatch(&self, threshold_us: u32, approaching: bool) {
        let handlers: Vec<Subscription, MAX_OBSERVERS> = self.subscriptions.lock(|subs| {
            subs.borrow()
                .iter()
                .filter(|sub| sub.threshold_us == threshold_us)
                .copied()
                .collect()
        });

        for sub in handlers {
            log_info!(
                "Ultrasonic: {:?} handler at {}us ({})",
                sub.kind,
                threshold_us,
                if approaching { "in" } else { "out" }
            );
            (sub.handler)();
        }
    }

    fn register(
        &self,
        distance: u32,
        unit: DistanceUnit,
        handler: Handler,
        kind: ObserverKind,
    ) -> SonarResult<()> {
        if distance == 0 {
            return Ok(());
        }
        let threshold_us = unit.to_round_trip(distance);

        if let Err(err) = self.with_state(|state| state.add_observer(threshold_us, kind)) {
            log_warn!("Ultrasonic: handler table full, {:?} at {}us dropped", kind, threshold_us);
            return Err(err);
        }
        // Observers and subscriptions have the same capacity and grow together.
        self.subscriptions.lock(|subs| {
            let _ = subs.borrow_mut().push(Subscription {
                threshold_us,
                kind,
                handler,
            });
        });

        log_info!("Ultrasonic: registered {:?} handler at {}us", kind, threshold_us);
        Ok(())
    }

    /// Mutable access to the tracker state, creating it on first use
    fn with_state<R>(&self, f: impl FnOnce(&mut TrackerState) -> R) -> R {
        self.state.lock(|cell| {
            let mut slot = cell.borrow_mut();
            f(slot.get_or_insert_with(|| self.config.new_state()))
        })
    }

    fn read_state<R>(&self, f: impl FnOnce(&TrackerState) -> R) -> Option<R> {
        self.state.lock(|cell| cell.borrow().as_ref().map(f))
    }
}

impl<M: RawMutex, T: OutputPin, E: EchoPin> Sonar<M, T, E> {
    /// Bind the sensor pins and restart filtering from "no object".
    ///
    /// Handlers registered earlier stay registered.
    pub async fn initialize(&self, trig_pin: T, echo: E) {
        *self.sensor.lock().await = Some(UltrasonicSensor::new(trig_pin, echo));

        let kept = self.with_state(|state| {
            state.reset_window();
            state.bind_pins();
            state.observers().len()
        });
        log_info!("Ultrasonic: pins bound, {} handler(s) kept", kept);
    }

    /// Trigger the sensor now and wait for the echo.
    ///
    /// Waits for the background loop to finish its own ping first.
    pub async fn measure_once(&self, unit: DistanceUnit) -> SonarResult<u32> {
        let mut guard = self.sensor.lock().await;
        let sensor = guard.as_mut().ok_or(SonarError::Uninitialized)?;
        sensor
            .measure_distance_within(unit, self.config.max_range_cm)
            .await
    }

    /// Background measurement loop. Returns after [`stop`](Self::stop).
    pub async fn run(&self) {
        self.stop.reset();
        log_info!(
            "Ultrasonic: background loop started ({}ms cycle)",
            self.config.cycle.as_millis()
        );

        loop {
            let cycle_start = Instant::now();
            self.evaluate_at(cycle_start.as_millis());
            self.ping().await;

            match select(Timer::at(cycle_start + self.config.cycle), self.stop.wait()).await {
                Either::First(()) => {}
                Either::Second(()) => break,
            }
        }

        log_info!("Ultrasonic: background loop stopped");
    }

    /// Trigger and feed the echo, if any, into the window
    async fn ping(&self) {
        let mut guard = self.sensor.lock().await;
        let Some(sensor) = guard.as_mut() else {
            return;
        };
        // No echo leaves the window alone; the staleness rule backfills it.
        if let Ok(round_trip_us) = sensor.measure_round_trip(self.config.max_range_cm).await {
            self.record_round_trip(Instant::now().as_millis(), round_trip_us);
        }
    }
}
