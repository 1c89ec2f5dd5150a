use serde::Serialize;

use crate::{Event, Thresholds};

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ThresholdCrossing {
    pub threshold: f64,
    /// Relative time of the first upward crossing; `None` if the run never crossed.
    pub first_crossing_s: Option<u64>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TrackerSummary {
    pub crossings: Vec<ThresholdCrossing>,
    pub global_max: f64,
    pub events_seen: usize,
}

impl TrackerSummary {
    pub fn crossing_for(&self, threshold: f64) -> Option<&ThresholdCrossing> {
        self.crossings.iter().find(|c| c.threshold == threshold)
    }
}

/// Watches raw event values for first threshold crossings and the overall maximum.
///
/// A crossing compares each event against the previous *event* value, never
/// against a forward-filled bucket value.
#[derive(Debug)]
pub struct Tracker {
    crossings: Vec<ThresholdCrossing>,
    previous: f64,
    global_max: f64,
    events_seen: usize,
}

impl Tracker {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            crossings: thresholds
                .as_slice()
                .iter()
                .map(|threshold| ThresholdCrossing {
                    threshold: *threshold,
                    first_crossing_s: None,
                })
                .collect(),
            previous: 0.0,
            global_max: 0.0,
            events_seen: 0,
        }
    }

    pub fn observe(&mut self, event: &Event) {
        for crossing in self.crossings.iter_mut() {
            if crossing.first_crossing_s.is_none()
                && self.previous <= crossing.threshold
                && event.value > crossing.threshold
            {
                crossing.first_crossing_s = Some(event.time_s);
            }
        }
        if event.value > self.global_max {
            self.global_max = event.value;
        }
        self.previous = event.value;
        self.events_seen += 1;
    }

    pub fn finish(self) -> TrackerSummary {
        TrackerSummary {
            crossings: self.crossings,
            global_max: self.global_max,
            events_seen: self.events_seen,
        }
    }
}

pub fn track(events: &[Event], thresholds: &Thresholds) -> TrackerSummary {
    let mut tracker = Tracker::new(thresholds);
    for event in events {
        tracker.observe(event);
    }
    tracker.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(pairs: &[(u64, f64)]) -> Vec<Event> {
        pairs
            .iter()
            .map(|(t, v)| Event::new(*t, *v).expect("valid event"))
            .collect()
    }

    #[test]
    fn first_crossing_is_kept_and_recrossing_ignored() {
        let thresholds = Thresholds::new(vec![64.0]).expect("thresholds");
        let summary = track(
            &events(&[(5, 0.0), (10, 70.0), (20, 60.0), (30, 90.0)]),
            &thresholds,
        );
        let crossing = summary.crossing_for(64.0).expect("tracked threshold");
        assert_eq!(crossing.first_crossing_s, Some(10));
        assert_eq!(summary.global_max, 90.0);
        assert_eq!(summary.events_seen, 4);
    }

    #[test]
    fn zero_threshold_crosses_on_first_positive_value() {
        let summary = track(
            &events(&[(3, 0.0), (8, 0.0), (12, 1.0)]),
            &Thresholds::default(),
        );
        assert_eq!(
            summary.crossing_for(0.0).and_then(|c| c.first_crossing_s),
            Some(12)
        );
        assert_eq!(
            summary.crossing_for(64.0).and_then(|c| c.first_crossing_s),
            None
        );
    }

    #[test]
    fn value_equal_to_threshold_is_not_a_crossing() {
        let thresholds = Thresholds::new(vec![64.0]).expect("thresholds");
        let summary = track(&events(&[(1, 64.0), (2, 65.0)]), &thresholds);
        assert_eq!(summary.crossings[0].first_crossing_s, Some(2));
    }

    #[test]
    fn jump_from_above_threshold_is_not_a_crossing() {
        let thresholds = Thresholds::new(vec![10.0]).expect("thresholds");
        let summary = track(&events(&[(1, 50.0), (2, 80.0)]), &thresholds);
        assert_eq!(summary.crossings[0].first_crossing_s, Some(1));

        let summary = track(&events(&[(1, 50.0), (2, 5.0), (9, 20.0)]), &thresholds);
        assert_eq!(summary.crossings[0].first_crossing_s, Some(1));
    }

    #[test]
    fn empty_run_reports_no_crossings() {
        let summary = track(&[], &Thresholds::default());
        assert!(summary.crossings.iter().all(|c| c.first_crossing_s.is_none()));
        assert_eq!(summary.global_max, 0.0);
        assert_eq!(summary.events_seen, 0);
    }
}
