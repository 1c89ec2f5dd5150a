//! Resampling of irregular per-run score logs onto a shared fixed-interval grid.

mod aggregate;
mod bucket;
mod config;
mod event;
mod tracker;

use serde::Serialize;
use thiserror::Error;

pub use aggregate::{aggregate, AggregatedMatrix, MatrixRow};
pub use bucket::{bucketize, BucketedSeries, Bucketizer};
pub use config::{
    GridConfig, SamplingMode, Thresholds, DEFAULT_HORIZON_S, DEFAULT_STEP_SIZE_S,
    DEFAULT_THRESHOLDS, MAX_BUCKETS,
};
pub use event::{Event, Run};
pub use tracker::{track, ThresholdCrossing, Tracker, TrackerSummary};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid grid: {0}")]
    InvalidGrid(String),
    #[error("invalid thresholds: {0}")]
    InvalidThresholds(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("value at t={time_s}s is not a finite number")]
    NonFiniteValue { time_s: u64 },
    #[error("value {value} at t={time_s}s is negative")]
    NegativeValue { time_s: u64, value: f64 },
    #[error("timestamp {timestamp} is before run start {start_time}")]
    BeforeStart { timestamp: i64, start_time: i64 },
    #[error("timestamp {timestamp} is out of range relative to run start {start_time}")]
    OffsetOverflow { timestamp: i64, start_time: i64 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregateError {
    #[error("no runs to aggregate")]
    NoRuns,
    #[error(
        "run {run_index}: series domain {found_len} buckets (step {found_step_s}s, horizon {found_horizon_s}s) \
         does not match expected {expected_len} buckets (step {expected_step_s}s, horizon {expected_horizon_s}s)"
    )]
    DomainMismatch {
        run_index: usize,
        expected_step_s: u64,
        expected_horizon_s: u64,
        expected_len: usize,
        found_step_s: u64,
        found_horizon_s: u64,
        found_len: usize,
    },
}

/// Bucketed series plus tracker summary for one run.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RunAnalysis {
    pub run_index: usize,
    pub series: BucketedSeries,
    pub summary: TrackerSummary,
}

/// Single pass over a run's events feeding both the bucketizer and the tracker.
///
/// The tracker sees every event; the bucketizer stops consuming once the
/// horizon is filled.
pub fn analyze_run(
    run: &Run,
    grid: GridConfig,
    mode: SamplingMode,
    thresholds: &Thresholds,
) -> RunAnalysis {
    let mut bucketizer = Bucketizer::new(grid, mode);
    let mut tracker = Tracker::new(thresholds);
    for event in &run.events {
        tracker.observe(event);
        if bucketizer.is_open() {
            bucketizer.push(event);
        }
    }
    RunAnalysis {
        run_index: run.index,
        series: bucketizer.finish(),
        summary: tracker.finish(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_run_matches_separate_passes() {
        let events = vec![
            Event::new(10, 5.0).expect("event"),
            Event::new(70, 70.0).expect("event"),
            Event::new(100, 3.0).expect("event"),
            Event::new(400, 90.0).expect("event"),
        ];
        let run = Run::new(4, 1_000, events.clone());
        let grid = GridConfig::new(60, 180).expect("grid");
        let thresholds = Thresholds::default();

        let analysis = analyze_run(&run, grid, SamplingMode::Monotonic, &thresholds);
        assert_eq!(analysis.run_index, 4);
        assert_eq!(
            analysis.series,
            bucketize(&events, grid, SamplingMode::Monotonic)
        );
        assert_eq!(analysis.summary, track(&events, &thresholds));
        assert_eq!(analysis.series.values(), &[5.0, 70.0, 70.0]);
        // Past-horizon events still count toward the global maximum.
        assert_eq!(analysis.summary.global_max, 90.0);
    }
}
