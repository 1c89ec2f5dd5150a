use chrono::Utc;
use fuzzagg_core::{aggregate, analyze_run, AggregateError, AggregatedMatrix, RunAnalysis};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AggregateConfig;
use crate::loader::{LoadError, RunLoader};

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RunFailure {
    pub run_index: usize,
    pub code: String,
    pub message: String,
}

impl From<&LoadError> for RunFailure {
    fn from(err: &LoadError) -> Self {
        Self {
            run_index: err.run(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{} of {total} runs failed to load; first: {}", .failures.len(), first_message(.failures))]
    RunsFailed {
        total: usize,
        failures: Vec<RunFailure>,
    },
    #[error("aggregation failed: {0}")]
    Aggregate(#[from] AggregateError),
}

fn first_message(failures: &[RunFailure]) -> &str {
    failures.first().map(|f| f.message.as_str()).unwrap_or("none")
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::RunsFailed { .. } => "runs_failed",
            PipelineError::Aggregate(_) => "aggregate_failed",
        }
    }

    pub fn details(&self) -> Value {
        match self {
            PipelineError::RunsFailed { total, failures } => json!({
                "total_runs": total,
                "failures": failures,
            }),
            PipelineError::Aggregate(err) => json!({ "message": err.to_string() }),
        }
    }
}

/// Result of one completed aggregation, ready to be written.
#[derive(Debug)]
pub struct AggregationOutcome {
    pub matrix: AggregatedMatrix,
    pub analyses: Vec<RunAnalysis>,
    pub failures: Vec<RunFailure>,
}

impl AggregationOutcome {
    pub fn summary_json(&self, config: &AggregateConfig) -> Value {
        let runs: Vec<Value> = self
            .analyses
            .iter()
            .map(|analysis| {
                json!({
                    "run": analysis.run_index,
                    "events": analysis.summary.events_seen,
                    "global_max": analysis.summary.global_max,
                    "final_value": analysis.series.last_value(),
                    "crossings": analysis.summary.crossings,
                })
            })
            .collect();
        json!({
            "pipeline": config.kind.as_str(),
            "mode": config.mode.as_str(),
            "step_s": config.grid.step_s,
            "horizon_s": config.grid.horizon_s,
            "rows": self.matrix.row_count(),
            "columns": self.matrix.run_count() + 1,
            "global_max": self.global_max(),
            "runs": runs,
            "failed_runs": self.failures,
            "generated_at": Utc::now().to_rfc3339(),
        })
    }

    /// Largest value observed by any aggregated run.
    pub fn global_max(&self) -> f64 {
        self.analyses
            .iter()
            .map(|a| a.summary.global_max)
            .fold(0.0, f64::max)
    }
}

/// Loads and bucketizes every configured run in parallel, then aggregates.
///
/// Failed runs abort the whole aggregation unless `config.skip_failed` is set,
/// in which case their columns are left out.
pub fn collect_runs<L: RunLoader>(
    loader: &L,
    config: &AggregateConfig,
) -> Result<AggregationOutcome, PipelineError> {
    let indices = config.run_indices();
    info!(
        runs = indices.len(),
        first_run = config.first_run,
        mode = config.mode.as_str(),
        step_s = config.grid.step_s,
        horizon_s = config.grid.horizon_s,
        source = %loader.describe(),
        "collecting runs"
    );
    let started = Instant::now();

    let results: Vec<Result<RunAnalysis, LoadError>> = indices
        .par_iter()
        .map(|index| -> Result<RunAnalysis, LoadError> {
            let run = loader.load(*index)?;
            let analysis = analyze_run(&run, config.grid, config.mode, &config.thresholds);
            debug!(
                run = *index,
                events = analysis.summary.events_seen,
                global_max = analysis.summary.global_max,
                "run bucketized"
            );
            Ok(analysis)
        })
        .collect();

    let mut analyses = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(analysis) => analyses.push(analysis),
            Err(err) => {
                warn!(run = err.run(), code = err.code(), "{}", err);
                failures.push(RunFailure::from(&err));
            }
        }
    }
    if !failures.is_empty() && !config.skip_failed {
        return Err(PipelineError::RunsFailed {
            total: indices.len(),
            failures,
        });
    }

    let series = analyses
        .iter()
        .map(|a| (a.run_index, a.series.clone()))
        .collect();
    let matrix = aggregate(config.grid, series)?;
    info!(
        rows = matrix.row_count(),
        runs = matrix.run_count(),
        skipped = failures.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "aggregation complete"
    );
    Ok(AggregationOutcome {
        matrix,
        analyses,
        failures,
    })
}
