use serde::Serialize;

use crate::{AggregateError, BucketedSeries, GridConfig};

/// One output row: a grid boundary and every run's value at it.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct MatrixRow {
    pub boundary_s: u64,
    pub values: Vec<f64>,
}

impl MatrixRow {
    /// Whole minutes, truncated.
    pub fn minutes(&self) -> u64 {
        self.boundary_s / 60
    }
}

/// Boundary × run table built from finalized per-run series.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AggregatedMatrix {
    grid: GridConfig,
    run_indices: Vec<usize>,
    columns: Vec<Vec<f64>>,
}

impl AggregatedMatrix {
    pub fn grid(&self) -> GridConfig {
        self.grid
    }

    pub fn run_indices(&self) -> &[usize] {
        &self.run_indices
    }

    pub fn row_count(&self) -> usize {
        self.grid.bucket_count()
    }

    pub fn run_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, run_index: usize) -> Option<&[f64]> {
        self.run_indices
            .iter()
            .position(|idx| *idx == run_index)
            .map(|pos| self.columns[pos].as_slice())
    }

    pub fn rows(&self) -> impl Iterator<Item = MatrixRow> + '_ {
        self.grid.boundaries().enumerate().map(move |(row, boundary_s)| MatrixRow {
            boundary_s,
            values: self.columns.iter().map(|col| col[row]).collect(),
        })
    }
}

/// Merges per-run series, given as `(run_index, series)` in output column order.
///
/// Every series must cover exactly the domain of `grid`.
pub fn aggregate(
    grid: GridConfig,
    series: Vec<(usize, BucketedSeries)>,
) -> Result<AggregatedMatrix, AggregateError> {
    if series.is_empty() {
        return Err(AggregateError::NoRuns);
    }
    let expected = grid.bucket_count();
    let mut run_indices = Vec::with_capacity(series.len());
    let mut columns = Vec::with_capacity(series.len());
    for (run_index, run_series) in series {
        if run_series.grid() != grid || run_series.len() != expected {
            return Err(AggregateError::DomainMismatch {
                run_index,
                expected_step_s: grid.step_s,
                expected_horizon_s: grid.horizon_s,
                expected_len: expected,
                found_step_s: run_series.grid().step_s,
                found_horizon_s: run_series.grid().horizon_s,
                found_len: run_series.len(),
            });
        }
        run_indices.push(run_index);
        columns.push(run_series.values().to_vec());
    }
    Ok(AggregatedMatrix {
        grid,
        run_indices,
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bucketize, Event, SamplingMode};

    fn series(grid: GridConfig, pairs: &[(u64, f64)]) -> BucketedSeries {
        let events: Vec<Event> = pairs
            .iter()
            .map(|(t, v)| Event::new(*t, *v).expect("valid event"))
            .collect();
        bucketize(&events, grid, SamplingMode::Instantaneous)
    }

    #[test]
    fn matrix_has_one_row_per_boundary_and_one_column_per_run() {
        let grid = GridConfig::new(60, 300).expect("grid");
        let runs = vec![
            (1, series(grid, &[(10, 1.0), (130, 4.0)])),
            (2, series(grid, &[(70, 2.0)])),
            (3, series(grid, &[])),
        ];
        let expected_columns: Vec<Vec<f64>> =
            runs.iter().map(|(_, s)| s.values().to_vec()).collect();
        let matrix = aggregate(grid, runs).expect("aggregate");

        assert_eq!(matrix.row_count(), 5);
        assert_eq!(matrix.run_count(), 3);
        let rows: Vec<MatrixRow> = matrix.rows().collect();
        assert_eq!(rows.len(), 5);
        for row in &rows {
            assert_eq!(row.values.len(), 3);
        }
        for (k, column) in expected_columns.iter().enumerate() {
            let from_rows: Vec<f64> = rows.iter().map(|r| r.values[k]).collect();
            assert_eq!(&from_rows, column);
        }
        assert_eq!(matrix.column(2), Some(expected_columns[1].as_slice()));
    }

    #[test]
    fn rows_report_boundaries_and_minutes() {
        let grid = GridConfig::new(30, 120).expect("grid");
        let matrix = aggregate(grid, vec![(1, series(grid, &[(5, 3.0)]))]).expect("aggregate");
        let labels: Vec<(u64, u64)> = matrix.rows().map(|r| (r.boundary_s, r.minutes())).collect();
        assert_eq!(labels, vec![(30, 0), (60, 1), (90, 1), (120, 2)]);
    }

    #[test]
    fn mismatched_domain_is_rejected() {
        let grid = GridConfig::new(60, 300).expect("grid");
        let other = GridConfig::new(60, 240).expect("grid");
        let err = aggregate(
            grid,
            vec![(1, series(grid, &[])), (2, series(other, &[]))],
        )
        .expect_err("domain mismatch");
        match err {
            AggregateError::DomainMismatch {
                run_index,
                expected_len,
                found_len,
                ..
            } => {
                assert_eq!(run_index, 2);
                assert_eq!(expected_len, 5);
                assert_eq!(found_len, 4);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn empty_input_is_rejected() {
        let grid = GridConfig::default();
        assert!(matches!(aggregate(grid, Vec::new()), Err(AggregateError::NoRuns)));
    }
}
