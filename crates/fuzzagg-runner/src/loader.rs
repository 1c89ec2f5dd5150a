use fuzzagg_core::{Event, Run};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::config::{AflColumns, SpfColumns};
use crate::scorer::{CostScorer, ScoreError};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("run {run}: cannot read {path}: {source}")]
    Io {
        run: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("run {run}: no usable start time in {path}: {reason}")]
    MissingStartTime {
        run: usize,
        path: PathBuf,
        reason: String,
    },
    #[error("run {run}: {path} row {row}: {reason}")]
    MalformedRow {
        run: usize,
        path: PathBuf,
        row: u64,
        reason: String,
    },
    #[error("run {run}: scoring {artifact} failed: {source}")]
    Score {
        run: usize,
        artifact: PathBuf,
        #[source]
        source: ScoreError,
    },
}

impl LoadError {
    pub fn run(&self) -> usize {
        match self {
            LoadError::Io { run, .. }
            | LoadError::MissingStartTime { run, .. }
            | LoadError::MalformedRow { run, .. }
            | LoadError::Score { run, .. } => *run,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            LoadError::Io { .. } => "io_error",
            LoadError::MissingStartTime { .. } => "missing_start_time",
            LoadError::MalformedRow { .. } => "malformed_row",
            LoadError::Score { .. } => "score_failed",
        }
    }
}

/// Run directories named `<prefix><index><suffix>`.
///
/// Experiment folders are numbered by plain concatenation
/// (`…/01-sort-kelinci-1`, `…-2`, …), so this is string-based, not a join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunLayout {
    pub prefix: String,
    pub suffix: String,
}

impl RunLayout {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn run_dir(&self, index: usize) -> PathBuf {
        PathBuf::from(format!("{}{}{}", self.prefix, index, self.suffix))
    }
}

/// Produces the event stream of one numbered run.
pub trait RunLoader: Sync {
    fn describe(&self) -> String;
    fn load(&self, index: usize) -> Result<Run, LoadError>;
}

fn read_text(run: usize, path: &Path) -> Result<String, LoadError> {
    fs::read_to_string(path).map_err(|source| LoadError::Io {
        run,
        path: path.to_path_buf(),
        source,
    })
}

fn csv_records(run: usize, path: &Path) -> Result<Vec<(u64, csv::StringRecord)>, LoadError> {
    let file = fs::File::open(path).map_err(|source| LoadError::Io {
        run,
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);
    let mut out = Vec::new();
    // Header is line 1.
    let mut row: u64 = 1;
    for record in reader.records() {
        row += 1;
        let record = record.map_err(|err| LoadError::MalformedRow {
            run,
            path: path.to_path_buf(),
            row: err.position().map(|p| p.line()).unwrap_or(row),
            reason: err.to_string(),
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(row);
        out.push((line, record));
    }
    Ok(out)
}

fn field<'r>(
    run: usize,
    path: &Path,
    row: u64,
    record: &'r csv::StringRecord,
    column: usize,
) -> Result<&'r str, LoadError> {
    record.get(column).ok_or_else(|| LoadError::MalformedRow {
        run,
        path: path.to_path_buf(),
        row,
        reason: format!("missing column {} ({} fields)", column, record.len()),
    })
}

fn parse_timestamp(run: usize, path: &Path, row: u64, raw: &str) -> Result<i64, LoadError> {
    raw.parse::<i64>().map_err(|_| LoadError::MalformedRow {
        run,
        path: path.to_path_buf(),
        row,
        reason: format!("timestamp '{}' is not an integer", raw),
    })
}

fn make_event(
    run: usize,
    path: &Path,
    row: u64,
    timestamp: i64,
    start_time: i64,
    value: f64,
) -> Result<Event, LoadError> {
    Event::at(timestamp, start_time, value).map_err(|err| LoadError::MalformedRow {
        run,
        path: path.to_path_buf(),
        row,
        reason: err.to_string(),
    })
}

/// AFL `fuzzer_stats` starts with `start_time : <epoch>`.
pub fn parse_afl_start_time(contents: &str) -> Result<i64, String> {
    let first = contents
        .lines()
        .next()
        .ok_or_else(|| "file is empty".to_string())?;
    let (_, raw) = first
        .split_once(':')
        .ok_or_else(|| format!("first line '{}' has no ':'", first.trim()))?;
    raw.trim()
        .parse::<i64>()
        .map_err(|_| format!("'{}' is not an epoch timestamp", raw.trim()))
}

/// SPF `import-statistics.txt` holds the start epoch in the first field of line 2.
pub fn parse_spf_start_time(contents: &str) -> Result<i64, String> {
    let second = contents
        .lines()
        .nth(1)
        .ok_or_else(|| "file has no second line".to_string())?;
    let raw = second.split(',').next().unwrap_or("").trim();
    raw.parse::<i64>()
        .map_err(|_| format!("'{}' is not an epoch timestamp", raw))
}

/// Reads `<run>/afl/fuzzer_stats` and `<run>/afl/plot_data`.
#[derive(Clone, Debug)]
pub struct AflLoader {
    layout: RunLayout,
    columns: AflColumns,
}

impl AflLoader {
    pub fn new(layout: RunLayout, columns: AflColumns) -> Self {
        Self { layout, columns }
    }

    pub fn stats_path(&self, index: usize) -> PathBuf {
        self.layout.run_dir(index).join("afl").join("fuzzer_stats")
    }

    pub fn plot_data_path(&self, index: usize) -> PathBuf {
        self.layout.run_dir(index).join("afl").join("plot_data")
    }
}

impl RunLoader for AflLoader {
    fn describe(&self) -> String {
        format!(
            "afl plot data under {}<i>{} (time column {}, value column {})",
            self.layout.prefix, self.layout.suffix, self.columns.time, self.columns.value
        )
    }

    fn load(&self, index: usize) -> Result<Run, LoadError> {
        let stats_path = self.stats_path(index);
        let start_time = parse_afl_start_time(&read_text(index, &stats_path)?).map_err(
            |reason| LoadError::MissingStartTime {
                run: index,
                path: stats_path.clone(),
                reason,
            },
        )?;

        let data_path = self.plot_data_path(index);
        let mut events = Vec::new();
        for (row, record) in csv_records(index, &data_path)? {
            let timestamp = parse_timestamp(
                index,
                &data_path,
                row,
                field(index, &data_path, row, &record, self.columns.time)?,
            )?;
            let raw_value = field(index, &data_path, row, &record, self.columns.value)?;
            let value = raw_value
                .parse::<f64>()
                .map_err(|_| LoadError::MalformedRow {
                    run: index,
                    path: data_path.clone(),
                    row,
                    reason: format!("value '{}' is not a number", raw_value),
                })?;
            events.push(make_event(
                index, &data_path, row, timestamp, start_time, value,
            )?);
        }
        debug!(run = index, events = events.len(), start_time, "loaded afl run");
        Ok(Run::new(index, start_time, events))
    }
}

/// Resolves an exported artifact reference (`./queue/id:0001`) against its run directory.
pub fn resolve_artifact(run_dir: &Path, reference: &str) -> Option<PathBuf> {
    let rel = reference.strip_prefix('.').unwrap_or(reference);
    let rel = rel.trim_start_matches('/');
    if rel.is_empty() {
        return None;
    }
    Some(run_dir.join(rel))
}

struct Sample {
    row: u64,
    timestamp: i64,
    artifact: PathBuf,
}

/// Reads SPF `import-statistics.txt` / `export-statistics.txt` and scores
/// every exported artifact with a [`CostScorer`].
pub struct SpfLoader<S> {
    layout: RunLayout,
    columns: SpfColumns,
    scorer: S,
}

impl<S: CostScorer> SpfLoader<S> {
    pub fn new(layout: RunLayout, columns: SpfColumns, scorer: S) -> Self {
        Self {
            layout,
            columns,
            scorer,
        }
    }

    pub fn import_stats_path(&self, index: usize) -> PathBuf {
        self.layout.run_dir(index).join("import-statistics.txt")
    }

    pub fn export_stats_path(&self, index: usize) -> PathBuf {
        self.layout.run_dir(index).join("export-statistics.txt")
    }
}

impl<S: CostScorer> RunLoader for SpfLoader<S> {
    fn describe(&self) -> String {
        format!(
            "spf exports under {}<i>{} (time column {}, artifact column {})",
            self.layout.prefix, self.layout.suffix, self.columns.time, self.columns.artifact
        )
    }

    fn load(&self, index: usize) -> Result<Run, LoadError> {
        let run_dir = self.layout.run_dir(index);
        let import_path = self.import_stats_path(index);
        let start_time = parse_spf_start_time(&read_text(index, &import_path)?).map_err(
            |reason| LoadError::MissingStartTime {
                run: index,
                path: import_path.clone(),
                reason,
            },
        )?;

        let export_path = self.export_stats_path(index);
        let mut samples = Vec::new();
        for (row, record) in csv_records(index, &export_path)? {
            let timestamp = parse_timestamp(
                index,
                &export_path,
                row,
                field(index, &export_path, row, &record, self.columns.time)?,
            )?;
            let reference = field(index, &export_path, row, &record, self.columns.artifact)?;
            let artifact =
                resolve_artifact(&run_dir, reference).ok_or_else(|| LoadError::MalformedRow {
                    run: index,
                    path: export_path.clone(),
                    row,
                    reason: format!("artifact reference '{}' is empty", reference),
                })?;
            // Reject bad timestamps before paying for the helper.
            make_event(index, &export_path, row, timestamp, start_time, 0.0)?;
            samples.push(Sample {
                row,
                timestamp,
                artifact,
            });
        }

        let values = samples
            .par_iter()
            .map(|sample| {
                self.scorer
                    .score(&sample.artifact)
                    .map_err(|source| LoadError::Score {
                        run: index,
                        artifact: sample.artifact.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<f64>, LoadError>>()?;

        let events = samples
            .iter()
            .zip(values)
            .map(|(sample, value)| {
                make_event(
                    index,
                    &export_path,
                    sample.row,
                    sample.timestamp,
                    start_time,
                    value,
                )
            })
            .collect::<Result<Vec<Event>, LoadError>>()?;
        debug!(run = index, events = events.len(), start_time, "loaded spf run");
        Ok(Run::new(index, start_time, events))
    }
}
