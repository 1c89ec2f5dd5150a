use anyhow::{Context, Result};
use chrono::Utc;
use fuzzagg_core::AggregatedMatrix;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

pub const TIME_HEADER: &str = "minutes";
pub const STDOUT_TARGET: &str = "-";

/// True when the table goes to stdout rather than a file.
pub fn writes_to_stdout(path: &Path) -> bool {
    path == Path::new(STDOUT_TARGET)
}

pub fn run_header(run_index: usize) -> String {
    format!("highscore#{}", run_index)
}

/// Integral values are written without a fractional part.
pub fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

pub fn render_matrix_csv(matrix: &AggregatedMatrix) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = vec![TIME_HEADER.to_string()];
    header.extend(matrix.run_indices().iter().map(|idx| run_header(*idx)));
    writer.write_record(&header)?;
    for row in matrix.rows() {
        let mut record = Vec::with_capacity(row.values.len() + 1);
        record.push(row.minutes().to_string());
        record.extend(row.values.iter().map(|v| format_value(*v)));
        writer.write_record(&record)?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("failed to flush csv buffer: {}", err))
}

/// Writes the table to `path`, or to stdout when `path` is `-`.
pub fn write_matrix(matrix: &AggregatedMatrix, path: &Path) -> Result<()> {
    let bytes = render_matrix_csv(matrix)?;
    if writes_to_stdout(path) {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(&bytes)?;
        handle.flush()?;
        return Ok(());
    }
    atomic_write_bytes(path, &bytes)
        .with_context(|| format!("failed to write {}", path.display()))
}

pub(crate) fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuzzagg_core::{aggregate, bucketize, Event, GridConfig, SamplingMode};

    fn matrix() -> AggregatedMatrix {
        let grid = GridConfig::new(60, 180).expect("grid");
        let run1 = bucketize(
            &[
                Event::new(10, 5.0).expect("event"),
                Event::new(70, 10.0).expect("event"),
                Event::new(200, 15.0).expect("event"),
            ],
            grid,
            SamplingMode::Instantaneous,
        );
        let run2 = bucketize(
            &[Event::new(100, 2.5).expect("event")],
            grid,
            SamplingMode::Instantaneous,
        );
        aggregate(grid, vec![(1, run1), (2, run2)]).expect("aggregate")
    }

    #[test]
    fn values_are_formatted_compactly() {
        assert_eq!(format_value(0.0), "0");
        assert_eq!(format_value(64.0), "64");
        assert_eq!(format_value(2.5), "2.5");
    }

    #[test]
    fn dash_targets_stdout() {
        assert!(writes_to_stdout(Path::new("-")));
        assert!(!writes_to_stdout(Path::new("./-")));
        assert!(!writes_to_stdout(Path::new("collected-data.csv")));
    }

    #[test]
    fn csv_has_minutes_header_and_one_row_per_boundary() {
        let text = String::from_utf8(render_matrix_csv(&matrix()).expect("render")).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "minutes,highscore#1,highscore#2",
                "1,5,0",
                "2,10,2.5",
                "3,10,2.5",
            ]
        );
    }

    #[test]
    fn write_matrix_replaces_file_atomically() {
        let dir = std::env::temp_dir().join(format!(
            "fuzzagg_writer_test_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let path = dir.join("nested").join("collected-data.csv");
        write_matrix(&matrix(), &path).expect("first write");
        write_matrix(&matrix(), &path).expect("second write");
        let text = fs::read_to_string(&path).expect("read");
        assert!(text.starts_with("minutes,highscore#1,highscore#2\n"));
        let entries = fs::read_dir(path.parent().expect("parent"))
            .expect("dir")
            .count();
        assert_eq!(entries, 1);
        let _ = fs::remove_dir_all(dir);
    }
}
