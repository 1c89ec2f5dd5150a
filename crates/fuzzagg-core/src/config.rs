use serde::{Deserialize, Serialize};

use crate::ConfigError;

pub const DEFAULT_STEP_SIZE_S: u64 = 60;
pub const DEFAULT_HORIZON_S: u64 = 18_000;
pub const DEFAULT_THRESHOLDS: [f64; 2] = [0.0, 64.0];
/// Upper bound on boundaries per run; each run holds one `f64` per boundary.
pub const MAX_BUCKETS: u64 = 10_000_000;

/// How a bucket's value is derived from the events seen so far.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Most recent event value.
    Instantaneous,
    /// Running maximum of every event value so far.
    Monotonic,
}

impl SamplingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplingMode::Instantaneous => "instantaneous",
            SamplingMode::Monotonic => "monotonic",
        }
    }

    pub(crate) fn update(&self, current: f64, observed: f64) -> f64 {
        match self {
            SamplingMode::Instantaneous => observed,
            SamplingMode::Monotonic => current.max(observed),
        }
    }
}

/// Fixed sampling grid shared by every run of one aggregation.
///
/// The boundaries are `step_s, 2*step_s, ..` up to and including the last
/// multiple of `step_s` that does not exceed `horizon_s`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GridConfig {
    pub step_s: u64,
    pub horizon_s: u64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            step_s: DEFAULT_STEP_SIZE_S,
            horizon_s: DEFAULT_HORIZON_S,
        }
    }
}

impl GridConfig {
    pub fn new(step_s: u64, horizon_s: u64) -> Result<Self, ConfigError> {
        let grid = Self { step_s, horizon_s };
        grid.validate()?;
        Ok(grid)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_s == 0 {
            return Err(ConfigError::InvalidGrid(
                "step size must be positive".to_string(),
            ));
        }
        if self.horizon_s < self.step_s {
            return Err(ConfigError::InvalidGrid(format!(
                "horizon {}s is shorter than one step of {}s",
                self.horizon_s, self.step_s
            )));
        }
        if self.horizon_s.checked_add(self.step_s).is_none() {
            return Err(ConfigError::InvalidGrid(format!(
                "horizon {}s plus one step of {}s overflows",
                self.horizon_s, self.step_s
            )));
        }
        if self.horizon_s / self.step_s > MAX_BUCKETS {
            return Err(ConfigError::InvalidGrid(format!(
                "{} buckets exceeds the limit of {}",
                self.horizon_s / self.step_s,
                MAX_BUCKETS
            )));
        }
        Ok(())
    }

    pub fn bucket_count(&self) -> usize {
        (self.horizon_s / self.step_s) as usize
    }

    pub fn boundary(&self, index: usize) -> u64 {
        (index as u64 + 1) * self.step_s
    }

    pub fn boundaries(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.bucket_count()).map(move |idx| self.boundary(idx))
    }

    /// Index of `boundary` in the domain, if it is one of the grid points.
    pub fn index_of(&self, boundary: u64) -> Option<usize> {
        if boundary == 0 || boundary % self.step_s != 0 || boundary > self.horizon_s {
            return None;
        }
        Some((boundary / self.step_s - 1) as usize)
    }
}

/// Strictly ascending, finite score thresholds watched by the tracker.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(transparent)]
pub struct Thresholds(Vec<f64>);

impl Thresholds {
    pub fn new(values: Vec<f64>) -> Result<Self, ConfigError> {
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(ConfigError::InvalidThresholds(format!(
                "threshold {} is not a finite number",
                bad
            )));
        }
        for pair in values.windows(2) {
            if pair[0] >= pair[1] {
                return Err(ConfigError::InvalidThresholds(format!(
                    "thresholds must be strictly ascending ({} then {})",
                    pair[0], pair[1]
                )));
            }
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self(DEFAULT_THRESHOLDS.to_vec())
    }
}

impl<'de> Deserialize<'de> for Thresholds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Vec::<f64>::deserialize(deserializer)?;
        Thresholds::new(raw).map_err(serde::de::Error::custom)
    }
}
