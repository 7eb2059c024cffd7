//! Conversions between row-major `Vec<Vec<f64>>` payloads and nalgebra matrices.

use anyhow::{bail, Result};
use nalgebra::DMatrix;

pub fn l2_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Builds a dense matrix from rows, rejecting empty or ragged input.
pub fn matrix_from_rows(name: &str, rows: &[Vec<f64>]) -> Result<DMatrix<f64>> {
    let Some(first) = rows.first() else {
        bail!("{} must have at least one row.", name);
    };
    let cols = first.len();
    if cols == 0 {
        bail!("{} must have at least one column.", name);
    }
    if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != cols) {
        bail!(
            "{} is ragged: row {} has {} entries, expected {}.",
            name,
            idx,
            row.len(),
            cols
        );
    }
    Ok(DMatrix::from_fn(rows.len(), cols, |i, j| rows[i][j]))
}

pub fn rows_from_matrix(matrix: &DMatrix<f64>) -> Vec<Vec<f64>> {
    matrix
        .row_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}

/// Index of the largest entry; the first one wins ties.
pub fn argmax<'a>(values: impl IntoIterator<Item = &'a f64>) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (idx, &value) in values.into_iter().enumerate() {
        if value > best_value {
            best = idx;
            best_value = value;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::{argmax, matrix_from_rows, rows_from_matrix};

    #[test]
    fn matrix_round_trips_row_major_layout() {
        let rows = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let matrix = matrix_from_rows("m", &rows).expect("matrix should build");
        assert_eq!(matrix[(1, 0)], 4.0);
        assert_eq!(rows_from_matrix(&matrix), rows);
    }

    #[test]
    fn ragged_and_empty_rows_are_rejected() {
        let err = matrix_from_rows("features", &[vec![1.0], vec![1.0, 2.0]]).unwrap_err();
        assert!(err.to_string().contains("features is ragged"));
        assert!(matrix_from_rows("features", &[]).is_err());
    }

    #[test]
    fn argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), 1);
    }
}
