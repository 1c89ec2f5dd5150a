use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("failed to launch cost helper {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cost helper wrote no row (exit {status}): {stderr}")]
    NoCostRow { status: String, stderr: String },
    #[error("cost row '{line}' has no usable field {field}")]
    BadCostField { field: usize, line: String },
    #[error("scratch file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns one fuzzer-produced artifact into a numeric cost.
pub trait CostScorer: Send + Sync {
    fn score(&self, artifact: &Path) -> Result<f64, ScoreError>;
}

/// Runs an external helper as `<command..> <artifact> <cost-file>`.
///
/// The helper appends a `;`-separated row to `<cost-file>`. Every invocation
/// gets its own scratch cost file so calls can run concurrently.
#[derive(Debug)]
pub struct ProcessCostScorer {
    command: Vec<String>,
    value_field: usize,
    scratch_dir: PathBuf,
    counter: AtomicU64,
}

impl ProcessCostScorer {
    pub fn new(command: Vec<String>, value_field: usize, scratch_dir: PathBuf) -> Self {
        Self {
            command,
            value_field,
            scratch_dir,
            counter: AtomicU64::new(0),
        }
    }

    fn scratch_path(&self) -> PathBuf {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        self.scratch_dir.join(format!(
            ".cost-{}-{}-{}.csv",
            std::process::id(),
            Utc::now().timestamp_micros(),
            seq
        ))
    }
}

impl CostScorer for ProcessCostScorer {
    fn score(&self, artifact: &Path) -> Result<f64, ScoreError> {
        let Some((program, leading_args)) = self.command.split_first() else {
            return Err(ScoreError::Spawn {
                program: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            });
        };
        let cost_file = self.scratch_path();
        fs::create_dir_all(&self.scratch_dir)?;
        fs::write(&cost_file, b"")?;

        let output = Command::new(program)
            .args(leading_args)
            .arg(artifact)
            .arg(&cost_file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| ScoreError::Spawn {
                program: program.clone(),
                source,
            });
        let written = fs::read_to_string(&cost_file);
        let _ = fs::remove_file(&cost_file);
        let output = output?;
        let status = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());

        let row = written?
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.to_string());
        let Some(row) = row else {
            let stderr = String::from_utf8_lossy(&output.stderr)
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("")
                .to_string();
            return Err(ScoreError::NoCostRow { status, stderr });
        };
        if !output.status.success() {
            warn!(
                artifact = %artifact.display(),
                status = %status,
                "cost helper exited unsuccessfully but wrote a row"
            );
        }
        let value = parse_cost_row(&row, self.value_field)?;
        debug!(artifact = %artifact.display(), value, "scored artifact");
        Ok(value)
    }
}

/// Extracts field `field` of a `;`-separated cost row.
pub fn parse_cost_row(line: &str, field: usize) -> Result<f64, ScoreError> {
    line.split(';')
        .nth(field)
        .map(str::trim)
        .and_then(|raw| raw.parse::<f64>().ok())
        .ok_or_else(|| ScoreError::BadCostField {
            field,
            line: line.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_row_field_is_parsed() {
        let line = "id:000001;12;340;7;42";
        assert_eq!(parse_cost_row(line, 4).expect("field 4"), 42.0);
        assert_eq!(parse_cost_row(line, 3).expect("field 3"), 7.0);
    }

    #[test]
    fn cost_row_tolerates_whitespace() {
        assert_eq!(parse_cost_row("a; 1 ;  2.5 ", 2).expect("field"), 2.5);
    }

    #[test]
    fn missing_or_non_numeric_field_is_an_error() {
        assert!(matches!(
            parse_cost_row("a;b", 4),
            Err(ScoreError::BadCostField { field: 4, .. })
        ));
        assert!(parse_cost_row("a;b;c", 1).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn process_scorer_reads_last_row_written_by_helper() {
        let dir = std::env::temp_dir().join(format!(
            "fuzzagg_scorer_test_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        let scorer = ProcessCostScorer::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "printf 'x;0;0;3;%s\\n' \"$(wc -c < \"$1\" | tr -d ' ')\" >> \"$2\"".to_string(),
                "helper".to_string(),
            ],
            4,
            dir.join("scratch"),
        );
        let artifact = dir.join("input.bin");
        fs::write(&artifact, b"abcdefg").expect("artifact");
        assert_eq!(scorer.score(&artifact).expect("score"), 7.0);
        let leftovers = fs::read_dir(dir.join("scratch")).expect("scratch").count();
        assert_eq!(leftovers, 0);
        let _ = fs::remove_dir_all(dir);
    }

    #[cfg(unix)]
    #[test]
    fn process_scorer_reports_helper_that_writes_nothing() {
        let dir = std::env::temp_dir().join(format!(
            "fuzzagg_scorer_empty_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let scorer = ProcessCostScorer::new(
            vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()],
            4,
            dir.clone(),
        );
        let err = scorer
            .score(Path::new("/nonexistent/input"))
            .expect_err("no row");
        assert!(matches!(err, ScoreError::NoCostRow { ref status, .. } if status == "3"));
        let _ = fs::remove_dir_all(dir);
    }
}
