use crate::traits::Handler;
use crate::util::{matrix_from_rows, rows_from_matrix};
use anyhow::{anyhow, bail, Result};
use nalgebra::{Complex, DVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexNumber {
    pub re: f64,
    pub im: f64,
}

impl From<Complex<f64>> for ComplexNumber {
    fn from(value: Complex<f64>) -> Self {
        Self {
            re: value.re,
            im: value.im,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinearAlgebraInput {
    pub matrix: Vec<Vec<f64>>,
    #[serde(default)]
    pub vector: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearAlgebraOutput {
    pub determinant: f64,
    pub rank: usize,
    pub eigenvalues: Vec<ComplexNumber>,
    pub inverse: Option<Vec<Vec<f64>>>,
    pub solution: Option<Vec<f64>>,
}

const RANK_TOLERANCE: f64 = 1e-10;

/// Square-matrix summary plus an optional `Ax = b` solve.
pub struct LinearAlgebra;

impl Handler for LinearAlgebra {
    const LABEL: &'static str = "linear_algebra";
    const PARAMETERS: &'static [&'static str] = &["matrix", "vector"];

    type Input = LinearAlgebraInput;
    type Output = LinearAlgebraOutput;

    fn run(&self, input: LinearAlgebraInput) -> Result<LinearAlgebraOutput> {
        let matrix = matrix_from_rows("matrix", &input.matrix)?;
        if !matrix.is_square() {
            bail!(
                "matrix must be square, got {}x{}.",
                matrix.nrows(),
                matrix.ncols()
            );
        }

        let lu = matrix.clone().lu();
        let determinant = lu.determinant();
        let inverse = lu.try_inverse().map(|inv| rows_from_matrix(&inv));
        let rank = matrix.rank(RANK_TOLERANCE);
        let eigenvalues = matrix
            .complex_eigenvalues()
            .iter()
            .map(|&lambda| ComplexNumber::from(lambda))
            .collect();

        let solution = match input.vector {
            Some(b) => {
                if b.len() != matrix.nrows() {
                    bail!(
                        "vector length {} does not match matrix size {}.",
                        b.len(),
                        matrix.nrows()
                    );
                }
                let x = lu
                    .solve(&DVector::from_vec(b))
                    .ok_or_else(|| anyhow!("Matrix is singular."))?;
                Some(x.iter().copied().collect())
            }
            None => None,
        };

        Ok(LinearAlgebraOutput {
            determinant,
            rank,
            eigenvalues,
            inverse,
            solution,
        })
    }
}
