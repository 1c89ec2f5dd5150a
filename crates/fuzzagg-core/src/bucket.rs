use serde::Serialize;

use crate::{Event, GridConfig, SamplingMode, MAX_BUCKETS};

/// Dense per-run samples over every boundary of a [`GridConfig`].
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct BucketedSeries {
    grid: GridConfig,
    values: Vec<f64>,
}

impl BucketedSeries {
    pub fn grid(&self) -> GridConfig {
        self.grid
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, boundary: u64) -> Option<f64> {
        self.grid
            .index_of(boundary)
            .and_then(|idx| self.values.get(idx).copied())
    }

    /// `(boundary_s, value)` pairs in boundary order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, f64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(move |(idx, value)| (self.grid.boundary(idx), *value))
    }

    pub fn last_value(&self) -> Option<f64> {
        self.values.last().copied()
    }
}

/// Incremental forward-fill sampler.
///
/// Boundary `b` receives the running value as of the last event with
/// `time_s <= b`, or 0 when no such event exists.
#[derive(Debug)]
pub struct Bucketizer {
    grid: GridConfig,
    mode: SamplingMode,
    current: f64,
    next_boundary: u64,
    values: Vec<f64>,
}

impl Bucketizer {
    pub fn new(grid: GridConfig, mode: SamplingMode) -> Self {
        Self {
            grid,
            mode,
            current: 0.0,
            next_boundary: grid.step_s,
            values: Vec::with_capacity(grid.bucket_count().min(MAX_BUCKETS as usize)),
        }
    }

    /// True while at least one boundary is still waiting for a value.
    pub fn is_open(&self) -> bool {
        self.values.len() < self.grid.bucket_count()
    }

    fn close_boundary(&mut self) {
        self.values.push(self.current);
        self.next_boundary = self.next_boundary.saturating_add(self.grid.step_s);
    }

    /// Feeds one event. Returns `false` once the horizon is reached and
    /// further events can no longer change the series.
    pub fn push(&mut self, event: &Event) -> bool {
        if !self.is_open() {
            return false;
        }
        while event.time_s > self.next_boundary && self.is_open() {
            self.close_boundary();
        }
        self.current = self.mode.update(self.current, event.value);
        self.is_open()
    }

    /// Pads every remaining boundary with the last known value.
    pub fn finish(mut self) -> BucketedSeries {
        while self.is_open() {
            self.close_boundary();
        }
        debug_assert_eq!(self.values.len(), self.grid.bucket_count());
        BucketedSeries {
            grid: self.grid,
            values: self.values,
        }
    }
}

pub fn bucketize(events: &[Event], grid: GridConfig, mode: SamplingMode) -> BucketedSeries {
    let mut bucketizer = Bucketizer::new(grid, mode);
    for event in events {
        if !bucketizer.push(event) {
            break;
        }
    }
    bucketizer.finish()
}
