use crate::traits::Handler;
use crate::util::{argmax, matrix_from_rows, rows_from_matrix};
use anyhow::{bail, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticSettings {
    pub learning_rate: f64,
    pub epochs: usize,
    /// L2 penalty on the weights (not the bias).
    pub l2: f64,
}

impl Default for LogisticSettings {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            epochs: 500,
            l2: 1e-4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassificationInput {
    pub features: Vec<Vec<f64>>,
    /// Class index per row, `0..n_classes`.
    pub labels: Vec<usize>,
    /// Rows to classify; defaults to the training rows.
    #[serde(default)]
    pub query: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub settings: LogisticSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationOutput {
    pub predictions: Vec<usize>,
    pub probabilities: Vec<Vec<f64>>,
    pub training_accuracy: f64,
}

/// Multinomial logistic regression trained by full-batch gradient descent.
pub struct Classification;

impl Handler for Classification {
    const LABEL: &'static str = "classification";
    const PARAMETERS: &'static [&'static str] = &["features", "labels", "query", "settings"];

    type Input = ClassificationInput;
    type Output = ClassificationOutput;

    fn run(&self, input: ClassificationInput) -> Result<ClassificationOutput> {
        let settings = input.settings;
        let x = with_bias(&matrix_from_rows("features", &input.features)?);
        let n = x.nrows();
        if input.labels.len() != n {
            bail!(
                "labels has {} entries but features has {} rows.",
                input.labels.len(),
                n
            );
        }
        let classes = input.labels.iter().max().map_or(0, |&m| m + 1);
        if classes < 2 {
            bail!("classification needs at least two classes.");
        }

        let targets = DMatrix::from_fn(n, classes, |i, k| {
            if input.labels[i] == k {
                1.0
            } else {
                0.0
            }
        });
        let mut weights = DMatrix::<f64>::zeros(x.ncols(), classes);
        let xt = x.transpose();
        let scale = settings.learning_rate / n as f64;

        for _ in 0..settings.epochs {
            let probs = softmax_rows(&x * &weights);
            let mut grad = &xt * (probs - &targets);
            // Bias row is unpenalized.
            for r in 1..grad.nrows() {
                for k in 0..classes {
                    grad[(r, k)] += settings.l2 * n as f64 * weights[(r, k)];
                }
            }
            weights -= grad * scale;
        }

        let train_probs = softmax_rows(&x * &weights);
        let correct = (0..n)
            .filter(|&i| argmax(train_probs.row(i).iter()) == input.labels[i])
            .count();
        let training_accuracy = correct as f64 / n as f64;
        debug!(training_accuracy, classes, "logistic regression trained");

        let probs = match &input.query {
            Some(rows) => {
                let q = matrix_from_rows("query", rows)?;
                if q.ncols() + 1 != x.ncols() {
                    bail!(
                        "query rows must have {} features, got {}.",
                        x.ncols() - 1,
                        q.ncols()
                    );
                }
                softmax_rows(&with_bias(&q) * &weights)
            }
            None => train_probs,
        };

        Ok(ClassificationOutput {
            predictions: (0..probs.nrows())
                .map(|i| argmax(probs.row(i).iter()))
                .collect(),
            probabilities: rows_from_matrix(&probs),
            training_accuracy,
        })
    }
}

fn with_bias(x: &DMatrix<f64>) -> DMatrix<f64> {
    x.clone().insert_column(0, 1.0)
}

fn softmax_rows(mut logits: DMatrix<f64>) -> DMatrix<f64> {
    for mut row in logits.row_iter_mut() {
        let max = row.max();
        row.apply(|v| *v = (*v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    logits
}
