use crate::traits::Handler;
use crate::util::matrix_from_rows;
use anyhow::{anyhow, bail, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionSettings {
    pub fit_intercept: bool,
    /// Singular values below this are treated as zero (minimum-norm fit).
    pub rcond: f64,
}

impl Default for RegressionSettings {
    fn default() -> Self {
        Self {
            fit_intercept: true,
            rcond: 1e-10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegressionInput {
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    /// Rows to predict; defaults to the training rows.
    #[serde(default)]
    pub query: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub settings: RegressionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionOutput {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub r_squared: f64,
    pub predictions: Vec<f64>,
}

impl RegressionOutput {
    pub fn predict(&self, row: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(row)
                .map(|(c, x)| c * x)
                .sum::<f64>()
    }
}

/// Ordinary least squares solved through the SVD.
pub struct Regression;

impl Handler for Regression {
    const LABEL: &'static str = "regression";
    const PARAMETERS: &'static [&'static str] = &["features", "targets", "query", "settings"];

    type Input = RegressionInput;
    type Output = RegressionOutput;

    fn run(&self, input: RegressionInput) -> Result<RegressionOutput> {
        let settings = input.settings;
        let x = matrix_from_rows("features", &input.features)?;
        if input.targets.len() != x.nrows() {
            bail!(
                "targets has {} entries but features has {} rows.",
                input.targets.len(),
                x.nrows()
            );
        }

        let offset = usize::from(settings.fit_intercept);
        let design = DMatrix::from_fn(x.nrows(), x.ncols() + offset, |i, j| {
            if j < offset {
                1.0
            } else {
                x[(i, j - offset)]
            }
        });
        let y = DVector::from_column_slice(&input.targets);

        let beta = design
            .clone()
            .svd(true, true)
            .solve(&y, settings.rcond)
            .map_err(|e| anyhow!("Least squares solve failed: {}", e))?;

        let fitted = &design * &beta;
        let mean = y.mean();
        let ss_res = (&y - &fitted).norm_squared();
        let ss_tot: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();
        let r_squared = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res == 0.0 {
            1.0
        } else {
            0.0
        };

        let mut output = RegressionOutput {
            intercept: if settings.fit_intercept { beta[0] } else { 0.0 },
            coefficients: beta.iter().skip(offset).copied().collect(),
            r_squared,
            predictions: Vec::new(),
        };

        output.predictions = match &input.query {
            Some(rows) => {
                if let Some(row) = rows.iter().find(|r| r.len() != x.ncols()) {
                    bail!(
                        "query rows must have {} features, got {}.",
                        x.ncols(),
                        row.len()
                    );
                }
                rows.iter().map(|row| output.predict(row)).collect()
            }
            None => fitted.iter().copied().collect(),
        };
        debug!(r_squared, "regression fitted");

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::{Regression, RegressionInput, RegressionSettings};
    use crate::traits::Handler;

    #[test]
    fn recovers_exact_linear_relationship() {
        let features = vec![
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![2.0, 1.0],
            vec![3.0, 5.0],
            vec![4.0, 2.0],
        ];
        let targets: Vec<f64> = features.iter().map(|r| 1.0 + 2.0 * r[0] - 0.5 * r[1]).collect();
        let out = Regression
            .run(RegressionInput {
                features,
                targets,
                query: Some(vec![vec![10.0, 10.0]]),
                settings: RegressionSettings::default(),
            })
            .expect("well-posed fit");
        assert!((out.intercept - 1.0).abs() < 1e-9);
        assert!((out.coefficients[0] - 2.0).abs() < 1e-9);
        assert!((out.coefficients[1] + 0.5).abs() < 1e-9);
        assert!((out.r_squared - 1.0).abs() < 1e-12);
        assert!((out.predictions[0] - 16.0).abs() < 1e-8);
    }

    #[test]
    fn without_intercept_fits_through_origin() {
        let out = Regression
            .run(RegressionInput {
                features: vec![vec![1.0], vec![2.0], vec![3.0]],
                targets: vec![2.0, 4.0, 6.0],
                query: None,
                settings: RegressionSettings {
                    fit_intercept: false,
                    ..RegressionSettings::default()
                },
            })
            .expect("fit succeeds");
        assert_eq!(out.intercept, 0.0);
        assert!((out.coefficients[0] - 2.0).abs() < 1e-12);
        assert_eq!(out.predictions.len(), 3);
    }

    #[test]
    fn mismatched_targets_are_rejected() {
        let err = Regression
            .run(RegressionInput {
                features: vec![vec![1.0], vec![2.0]],
                targets: vec![1.0],
                query: None,
                settings: RegressionSettings::default(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("targets has 1 entries"));
    }
}
