use serde::{Deserialize, Serialize};

use crate::EventError;

/// One score observation, `time_s` seconds after the run started.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub time_s: u64,
    pub value: f64,
}

impl Event {
    pub fn new(time_s: u64, value: f64) -> Result<Self, EventError> {
        if !value.is_finite() {
            return Err(EventError::NonFiniteValue { time_s });
        }
        if value < 0.0 {
            return Err(EventError::NegativeValue { time_s, value });
        }
        Ok(Self { time_s, value })
    }

    /// Builds an event from an absolute epoch timestamp anchored at `start_time`.
    pub fn at(timestamp: i64, start_time: i64, value: f64) -> Result<Self, EventError> {
        let offset = timestamp
            .checked_sub(start_time)
            .ok_or(EventError::OffsetOverflow {
                timestamp,
                start_time,
            })?;
        if offset < 0 {
            return Err(EventError::BeforeStart {
                timestamp,
                start_time,
            });
        }
        Self::new(offset as u64, value)
    }
}

/// A loaded experiment run. Never mutated after the loader returns it.
#[derive(Clone, Debug, PartialEq)]
pub struct Run {
    pub index: usize,
    pub start_time: i64,
    pub events: Vec<Event>,
}

impl Run {
    pub fn new(index: usize, start_time: i64, events: Vec<Event>) -> Self {
        Self {
            index,
            start_time,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_rejects_negative_and_non_finite_values() {
        assert!(Event::new(5, -1.0).is_err());
        assert!(Event::new(5, f64::INFINITY).is_err());
        assert!(Event::new(5, 0.0).is_ok());
    }

    #[test]
    fn event_at_subtracts_start_time() {
        let event = Event::at(1_500_000_090, 1_500_000_000, 12.0).expect("event");
        assert_eq!(event.time_s, 90);
        assert_eq!(event.value, 12.0);
    }

    #[test]
    fn event_at_rejects_timestamps_before_start() {
        let err = Event::at(99, 100, 1.0).expect_err("must fail");
        assert!(err.to_string().contains("before run start"));
    }

    #[test]
    fn event_at_reports_offsets_outside_i64() {
        assert_eq!(
            Event::at(i64::MAX, -10, 1.0),
            Err(EventError::OffsetOverflow {
                timestamp: i64::MAX,
                start_time: -10,
            })
        );
        assert!(matches!(
            Event::at(i64::MIN, 10, 1.0),
            Err(EventError::OffsetOverflow { .. })
        ));
    }
}
