//! Median-filtered round-trip tracking with threshold observers.
//!
//! [`TrackerState`] is the pure half of the sonar: it owns the sample window,
//! the current median and the observer table, and knows nothing about pins,
//! clocks or executors. The caller feeds it timestamps and echo samples.

use heapless::{Deque, Vec};

use crate::constants::ultrasonic::{MAX_OBSERVERS, WINDOW_LEN};
use crate::error::{SonarError, SonarResult};

/// One round-trip measurement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sample {
    pub timestamp_ms: u64,
    pub round_trip_us: u32,
}

/// How a handler was registered. Both kinds fire on the same crossing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ObserverKind {
    ObjectDetected,
    DistanceChange,
}

/// Threshold on the median round trip.
///
/// Armed observers fire once the median drops to the threshold and stay
/// fired until the median moves back above it. Both edges are reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Observer {
    pub threshold_us: u32,
    pub armed: bool,
    pub kind: ObserverKind,
}

/// Thresholds crossed during one evaluation, in either direction, one entry
/// per observer
pub type FiredThresholds = Vec<u32, MAX_OBSERVERS>;

pub struct TrackerState {
    window: Deque<Sample, WINDOW_LEN>,
    median_us: u32,
    observers: Vec<Observer, MAX_OBSERVERS>,
    no_object_us: u32,
    stale_after_ms: u64,
    pins_bound: bool,
}

impl TrackerState {
    /// Fresh state with a single "no object" sample and no observers.
    ///
    /// A sample older than `stale_after_ms` at evaluation time is replaced
    /// by a new "no object" sample.
    pub fn new(no_object_us: u32, stale_after_ms: u64) -> Self {
        let mut state = Self {
            window: Deque::new(),
            median_us: no_object_us,
            observers: Vec::new(),
            no_object_us,
            stale_after_ms,
            pins_bound: false,
        };
        state.reset_window();
        state
    }

    /// Drop all samples and reseed with the sentinel. Observers are kept.
    pub fn reset_window(&mut self) {
        self.window.clear();
        self.push_sample(Sample {
            timestamp_ms: 0,
            round_trip_us: self.no_object_us,
        });
        self.median_us = self.no_object_us;
    }

    pub fn bind_pins(&mut self) {
        self.pins_bound = true;
    }

    pub fn pins_bound(&self) -> bool {
        self.pins_bound
    }

    pub fn median_us(&self) -> u32 {
        self.median_us
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.window.iter()
    }

    pub fn observers(&self) -> &[Observer] {
        &self.observers
    }

    /// Append a sample, evicting the oldest when the window is full
    pub fn push_sample(&mut self, sample: Sample) {
        if self.window.is_full() {
            self.window.pop_front();
        }
        // Room was made above.
        let _ = self.window.push_back(sample);
    }

    pub fn add_observer(&mut self, threshold_us: u32, kind: ObserverKind) -> SonarResult<()> {
        self.observers
            .push(Observer {
                threshold_us,
                armed: true,
                kind,
            })
            .map_err(|_| SonarError::ObserverLimit)
    }

    /// Run one background cycle at `now_ms`.
    ///
    /// Backfills a sentinel when the newest sample is stale, recomputes the
    /// median and returns the thresholds of observers that just changed
    /// state: armed to fired as the median drops to the threshold, fired to
    /// armed as it moves back above.
    pub fn evaluate(&mut self, now_ms: u64) -> FiredThresholds {
        let stale = self
            .window
            .back()
            .map_or(true, |newest| {
                newest.timestamp_ms.saturating_add(self.stale_after_ms) < now_ms
            });
        if stale {
            self.push_sample(Sample {
                timestamp_ms: now_ms,
                round_trip_us: self.no_object_us,
            });
        }

        self.median_us = self.compute_median();

        let mut fired = FiredThresholds::new();
        for observer in self.observers.iter_mut() {
            if observer.armed && self.median_us <= observer.threshold_us {
                observer.armed = false;
                // One slot per observer, so this cannot overflow.
                let _ = fired.push(observer.threshold_us);
            } else if !observer.armed && self.median_us > observer.threshold_us {
                observer.armed = true;
                let _ = fired.push(observer.threshold_us);
            }
        }
        fired
    }

    fn compute_median(&self) -> u32 {
        let mut round_trips = [0u32; WINDOW_LEN];
        let len = self.window.len();
        for (slot, sample) in round_trips.iter_mut().zip(self.window.iter()) {
            *slot = sample.round_trip_us;
        }
        median(&mut round_trips[..len]).unwrap_or(self.no_object_us)
    }
}

/// Lower median: sorts `values` in place and returns `sorted[(len - 1) / 2]`
pub fn median(values: &mut [u32]) -> Option<u32> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    Some(values[(values.len() - 1) >> 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ultrasonic::DistanceUnit;

    const NO_OBJECT: u32 = 4000;
    const STALE_AFTER: u64 = 155;

    fn state_with(round_trips: &[u32]) -> TrackerState {
        let mut state = TrackerState::new(NO_OBJECT, STALE_AFTER);
        for (i, &rtt) in round_trips.iter().enumerate() {
            state.push_sample(Sample {
                timestamp_ms: 1000 + i as u64,
                round_trip_us: rtt,
            });
        }
        state
    }

    #[test]
    fn median_of_five_is_middle_element() {
        assert_eq!(median(&mut [4000, 4000, 4000, 120, 130]), Some(4000));
        assert_eq!(median(&mut [900, 100, 500, 300, 700]), Some(500));
    }

    #[test]
    fn median_of_even_window_takes_lower_middle() {
        assert_eq!(median(&mut [4000, 580]), Some(580));
        assert_eq!(median(&mut [40, 10, 30, 20]), Some(20));
        assert_eq!(median(&mut [0u32; 0]), None);
    }

    #[test]
    fn worked_example_reads_68_cm() {
        let mut state = state_with(&[4000, 4000, 4000, 120, 130]);
        state.evaluate(1004);
        assert_eq!(state.median_us(), 4000);
        assert_eq!(DistanceUnit::Centimeters.from_round_trip(state.median_us()), 68);
    }

    #[test]
    fn single_outlier_is_filtered() {
        let mut state = state_with(&[600, 610, 4000, 590, 605]);
        state.evaluate(1004);
        assert_eq!(state.median_us(), 605);
    }

    #[test]
    fn new_state_holds_one_sentinel() {
        let state = TrackerState::new(NO_OBJECT, STALE_AFTER);
        assert_eq!(state.window_len(), 1);
        assert_eq!(state.median_us(), NO_OBJECT);
        assert!(!state.pins_bound());
    }

    #[test]
    fn window_never_exceeds_five() {
        let mut state = TrackerState::new(NO_OBJECT, STALE_AFTER);
        let mut now = 0;
        for i in 0..50u32 {
            now += 145;
            if i % 3 == 0 {
                state.push_sample(Sample {
                    timestamp_ms: now,
                    round_trip_us: 500 + i,
                });
            }
            state.evaluate(now);
            assert!(state.window_len() <= WINDOW_LEN);
        }
        assert_eq!(state.window_len(), WINDOW_LEN);
    }

    #[test]
    fn stale_window_gets_sentinel() {
        let mut state = state_with(&[600]);
        // Newest sample at 1000: still fresh at 1155.
        state.evaluate(1155);
        assert_eq!(state.window_len(), 2);
        state.evaluate(1156);
        assert_eq!(state.window_len(), 3);
        assert_eq!(state.samples().last().map(|s| s.round_trip_us), Some(NO_OBJECT));
    }

    #[test]
    fn observer_fires_once_then_rearms() {
        let mut state = TrackerState::new(NO_OBJECT, STALE_AFTER);
        state.add_observer(1160, ObserverKind::ObjectDetected).unwrap();

        let mut now = 1000;
        let mut step = |state: &mut TrackerState, rtt: u32| {
            now += 145;
            state.push_sample(Sample {
                timestamp_ms: now,
                round_trip_us: rtt,
            });
            state.evaluate(now)
        };

        // [4000, 600]: the lower median is already the close reading.
        assert_eq!(step(&mut state, 600).as_slice(), &[1160]);
        assert!(!state.observers()[0].armed);

        // Stays fired while the object is in range.
        assert!(step(&mut state, 600).is_empty());
        assert!(step(&mut state, 600).is_empty());
        assert!(step(&mut state, 600).is_empty());

        // Object leaves: two far readings are not enough to move the median.
        assert!(step(&mut state, 4000).is_empty());
        assert!(step(&mut state, 4000).is_empty());
        assert!(!state.observers()[0].armed);

        // The third one does, and the clearance is reported once.
        assert_eq!(step(&mut state, 4000).as_slice(), &[1160]);
        assert!(state.observers()[0].armed);
        assert!(step(&mut state, 4000).is_empty());

        // And comes back.
        step(&mut state, 600);
        step(&mut state, 600);
        assert_eq!(step(&mut state, 600).as_slice(), &[1160]);
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut state = state_with(&[1160, 1160, 1160, 1160, 1160]);
        state.add_observer(1160, ObserverKind::DistanceChange).unwrap();
        assert_eq!(state.evaluate(1004).as_slice(), &[1160]);
    }

    #[test]
    fn every_observer_reports_its_own_crossing() {
        let mut state = state_with(&[300, 300, 300, 300, 300]);
        state.add_observer(1160, ObserverKind::ObjectDetected).unwrap();
        state.add_observer(1160, ObserverKind::DistanceChange).unwrap();
        state.add_observer(200, ObserverKind::ObjectDetected).unwrap();

        assert_eq!(state.evaluate(1004).as_slice(), &[1160, 1160]);
        assert!(state.observers()[2].armed);
    }

    #[test]
    fn reset_keeps_observers() {
        let mut state = state_with(&[300, 300, 300]);
        state.add_observer(1160, ObserverKind::ObjectDetected).unwrap();
        state.reset_window();
        assert_eq!(state.window_len(), 1);
        assert_eq!(state.median_us(), NO_OBJECT);
        assert_eq!(state.observers().len(), 1);
    }

    #[test]
    fn observer_table_is_bounded() {
        let mut state = TrackerState::new(NO_OBJECT, STALE_AFTER);
        for _ in 0..MAX_OBSERVERS {
            state.add_observer(580, ObserverKind::ObjectDetected).unwrap();
        }
        assert_eq!(
            state.add_observer(580, ObserverKind::ObjectDetected),
            Err(SonarError::ObserverLimit)
        );
    }
}
