use crate::traits::Handler;
use crate::util::{matrix_from_rows, rows_from_matrix};
use anyhow::{bail, Result};
use nalgebra::{DMatrix, RowDVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Widths of the tanh hidden layers, input side first.
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f64,
    pub epochs: usize,
    pub seed: u64,
    /// Record the training loss every this many epochs.
    pub log_every: usize,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            hidden_layers: vec![8],
            learning_rate: 0.1,
            epochs: 2000,
            seed: 42,
            log_every: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkInput {
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<Vec<f64>>,
    /// Rows to predict; defaults to the training rows.
    #[serde(default)]
    pub query: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub settings: NetworkSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkOutput {
    pub predictions: Vec<Vec<f64>>,
    pub final_loss: f64,
    pub loss_history: Vec<f64>,
    /// Layer widths from input to output.
    pub architecture: Vec<usize>,
}

struct Layer {
    weights: DMatrix<f64>,
    bias: RowDVector<f64>,
}

struct Mlp {
    layers: Vec<Layer>,
}

impl Mlp {
    /// Xavier-uniform weights, zero biases.
    fn new(sizes: &[usize], rng: &mut StdRng) -> Self {
        let layers = sizes
            .windows(2)
            .map(|pair| {
                let (fan_in, fan_out) = (pair[0], pair[1]);
                let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
                Layer {
                    weights: DMatrix::from_fn(fan_in, fan_out, |_, _| {
                        rng.gen_range(-limit..limit)
                    }),
                    bias: RowDVector::zeros(fan_out),
                }
            })
            .collect();
        Self { layers }
    }

    /// Activations of every layer, input included. The last layer is linear.
    fn forward(&self, input: &DMatrix<f64>) -> Vec<DMatrix<f64>> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input.clone());
        for (idx, layer) in self.layers.iter().enumerate() {
            let mut z = &activations[idx] * &layer.weights;
            for mut row in z.row_iter_mut() {
                row += &layer.bias;
            }
            if idx + 1 < self.layers.len() {
                z.apply(|v| *v = v.tanh());
            }
            activations.push(z);
        }
        activations
    }

    fn predict(&self, input: &DMatrix<f64>) -> DMatrix<f64> {
        self.forward(input).pop().unwrap_or_else(|| input.clone())
    }

    /// One full-batch gradient step on mean squared error; returns the
    /// loss before the update.
    fn train_step(&mut self, x: &DMatrix<f64>, y: &DMatrix<f64>, learning_rate: f64) -> f64 {
        let activations = self.forward(x);
        let output = &activations[self.layers.len()];
        let residual = output - y;
        let count = residual.len() as f64;
        let loss = residual.norm_squared() / count;

        let mut delta = residual * (2.0 / count);
        for idx in (0..self.layers.len()).rev() {
            let input = &activations[idx];
            let grad_w = input.transpose() * &delta;
            let grad_b = delta.row_sum();
            if idx > 0 {
                let back = &delta * self.layers[idx].weights.transpose();
                delta = back.zip_map(input, |d, a| d * (1.0 - a * a));
            }
            let layer = &mut self.layers[idx];
            layer.weights -= grad_w * learning_rate;
            layer.bias -= grad_b * learning_rate;
        }
        loss
    }
}

fn mse(prediction: &DMatrix<f64>, target: &DMatrix<f64>) -> f64 {
    (prediction - target).norm_squared() / target.len() as f64
}

/// Fully connected tanh network with a linear output layer, trained by
/// full-batch gradient descent on mean squared error.
pub struct NeuralNetwork;

impl Handler for NeuralNetwork {
    const LABEL: &'static str = "neural_network";
    const PARAMETERS: &'static [&'static str] = &["features", "targets", "query", "settings"];

    type Input = NetworkInput;
    type Output = NetworkOutput;

    fn run(&self, input: NetworkInput) -> Result<NetworkOutput> {
        let settings = &input.settings;
        let x = matrix_from_rows("features", &input.features)?;
        let y = matrix_from_rows("targets", &input.targets)?;
        if x.nrows() != y.nrows() {
            bail!(
                "features has {} rows but targets has {}.",
                x.nrows(),
                y.nrows()
            );
        }
        if settings.hidden_layers.iter().any(|&w| w == 0) {
            bail!("hidden layer widths must be positive.");
        }
        if settings.log_every == 0 {
            bail!("log_every must be at least 1.");
        }

        let mut architecture = vec![x.ncols()];
        architecture.extend(&settings.hidden_layers);
        architecture.push(y.ncols());

        let mut rng = StdRng::seed_from_u64(settings.seed);
        let mut mlp = Mlp::new(&architecture, &mut rng);
        let mut loss_history = Vec::new();
        for epoch in 0..settings.epochs {
            let loss = mlp.train_step(&x, &y, settings.learning_rate);
            if !loss.is_finite() {
                bail!("Training diverged at epoch {} (loss = {}).", epoch, loss);
            }
            if epoch % settings.log_every == 0 {
                loss_history.push(loss);
            }
        }
        let final_loss = mse(&mlp.predict(&x), &y);
        loss_history.push(final_loss);
        debug!(?architecture, final_loss, "network trained");

        let predictions = match &input.query {
            Some(rows) => {
                let q = matrix_from_rows("query", rows)?;
                if q.ncols() != x.ncols() {
                    bail!(
                        "query rows must have {} features, got {}.",
                        x.ncols(),
                        q.ncols()
                    );
                }
                mlp.predict(&q)
            }
            None => mlp.predict(&x),
        };

        Ok(NetworkOutput {
            predictions: rows_from_matrix(&predictions),
            final_loss,
            loss_history,
            architecture,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeepNetworkInput {
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<Vec<f64>>,
    #[serde(default)]
    pub query: Option<Vec<Vec<f64>>>,
    #[serde(default = "deep_settings")]
    pub settings: NetworkSettings,
}

pub fn deep_settings() -> NetworkSettings {
    NetworkSettings {
        hidden_layers: vec![16, 16, 8],
        epochs: 3000,
        ..NetworkSettings::default()
    }
}

/// Same trainer as [`NeuralNetwork`] with a deeper default stack.
pub struct DeepLearning;

impl Handler for DeepLearning {
    const LABEL: &'static str = "deep_learning";
    const PARAMETERS: &'static [&'static str] = NeuralNetwork::PARAMETERS;

    type Input = DeepNetworkInput;
    type Output = NetworkOutput;

    fn run(&self, input: DeepNetworkInput) -> Result<NetworkOutput> {
        NeuralNetwork.run(NetworkInput {
            features: input.features,
            targets: input.targets,
            query: input.query,
            settings: input.settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{DeepLearning, DeepNetworkInput, NetworkInput, NetworkSettings, NeuralNetwork};
    use crate::traits::Handler;

    #[test]
    fn fits_a_line() {
        let features: Vec<Vec<f64>> = (0..9).map(|i| vec![-1.0 + 0.25 * i as f64]).collect();
        let targets: Vec<Vec<f64>> = features.iter().map(|x| vec![2.0 * x[0] - 1.0]).collect();
        let out = NeuralNetwork
            .run(NetworkInput {
                features,
                targets,
                query: Some(vec![vec![0.5]]),
                settings: NetworkSettings::default(),
            })
            .expect("training succeeds");
        assert_eq!(out.architecture, vec![1, 8, 1]);
        assert!(out.final_loss < 1e-2, "loss {}", out.final_loss);
        assert!(out.loss_history[0] > out.final_loss);
        assert_eq!(out.loss_history.len(), 21);
        assert!((out.predictions[0][0] - 0.0).abs() < 0.2);
    }

    #[test]
    fn deep_learning_learns_xor_with_deeper_defaults() {
        let input: DeepNetworkInput = serde_json::from_value(serde_json::json!({
            "features": [[0, 0], [0, 1], [1, 0], [1, 1]],
            "targets": [[0], [1], [1], [0]]
        }))
        .expect("input should decode");
        let out = DeepLearning.run(input).expect("training succeeds");
        assert_eq!(out.architecture, vec![2, 16, 16, 8, 1]);
        for (pred, want) in out.predictions.iter().zip([0.0, 1.0, 1.0, 0.0]) {
            assert!((pred[0] - want).abs() < 0.1, "got {}, want {want}", pred[0]);
        }
    }

    #[test]
    fn zero_width_layer_is_rejected() {
        let err = NeuralNetwork
            .run(NetworkInput {
                features: vec![vec![0.0]],
                targets: vec![vec![0.0]],
                query: None,
                settings: NetworkSettings {
                    hidden_layers: vec![0],
                    ..NetworkSettings::default()
                },
            })
            .unwrap_err();
        assert!(err.to_string().contains("positive"));
    }
}
