mod config;
mod loader;
mod pipeline;
mod scorer;
mod writer;

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tracing::info;

pub use config::{
    AflColumns, AggregateConfig, ConfigLayer, PipelineKind, SpfColumns, DEFAULT_FIRST_RUN,
    DEFAULT_OUTPUT,
};
pub use loader::{
    parse_afl_start_time, parse_spf_start_time, resolve_artifact, AflLoader, LoadError,
    RunLayout, RunLoader, SpfLoader,
};
pub use pipeline::{collect_runs, AggregationOutcome, PipelineError, RunFailure};
pub use scorer::{parse_cost_row, CostScorer, ProcessCostScorer, ScoreError};
pub use writer::{
    format_value, render_matrix_csv, run_header, write_matrix, writes_to_stdout, STDOUT_TARGET,
    TIME_HEADER,
};

pub struct AggregateResult {
    pub outcome: AggregationOutcome,
    pub output: PathBuf,
}

/// Collects the configured runs with `loader` and writes the table to `config.output`.
pub fn aggregate_with_loader<L: RunLoader>(
    loader: &L,
    config: &AggregateConfig,
) -> Result<AggregateResult> {
    let outcome = collect_runs(loader, config)?;
    write_matrix(&outcome.matrix, &config.output)?;
    info!(
        output = %config.output.display(),
        rows = outcome.matrix.row_count(),
        "wrote collected data"
    );
    Ok(AggregateResult {
        outcome,
        output: config.output.clone(),
    })
}

pub fn aggregate_afl(layout: RunLayout, config: &AggregateConfig) -> Result<AggregateResult> {
    let loader = AflLoader::new(layout, config.afl);
    aggregate_with_loader(&loader, config)
}

/// Scores SPF exports with the configured external helper. Scratch cost files
/// live in `scratch_dir` and are removed after each call.
pub fn aggregate_spf(
    layout: RunLayout,
    config: &AggregateConfig,
    scratch_dir: PathBuf,
) -> Result<AggregateResult> {
    let command = config
        .cost_cmd
        .clone()
        .ok_or_else(|| anyhow!("the spf pipeline requires a cost helper (cost_cmd)"))?;
    let scorer = ProcessCostScorer::new(command, config.spf.cost_value, scratch_dir);
    let loader = SpfLoader::new(layout, config.spf, scorer);
    aggregate_with_loader(&loader, config)
}
