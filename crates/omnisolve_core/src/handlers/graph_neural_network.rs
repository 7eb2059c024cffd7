use crate::traits::Handler;
use crate::util::{argmax, matrix_from_rows, rows_from_matrix};
use anyhow::{anyhow, bail, Result};
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GcnSettings {
    pub hidden_dim: usize,
    pub output_dim: usize,
    pub seed: u64,
}

impl Default for GcnSettings {
    fn default() -> Self {
        Self {
            hidden_dim: 16,
            output_dim: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphInput {
    /// Undirected edges as node index pairs.
    pub edges: Vec<(usize, usize)>,
    /// One feature row per node.
    pub features: Vec<Vec<f64>>,
    #[serde(default)]
    pub settings: GcnSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphOutput {
    pub embeddings: Vec<Vec<f64>>,
    pub predicted_classes: Vec<usize>,
}

/// `D^-1/2 (A + I) D^-1/2` for an undirected graph.
fn normalized_adjacency(num_nodes: usize, edges: &[(usize, usize)]) -> Result<CsrMatrix<f64>> {
    let mut links = BTreeSet::new();
    for &(a, b) in edges {
        if a >= num_nodes || b >= num_nodes {
            bail!(
                "edge ({}, {}) references a node outside 0..{}.",
                a,
                b,
                num_nodes
            );
        }
        links.insert((a, b));
        links.insert((b, a));
    }
    links.extend((0..num_nodes).map(|i| (i, i)));

    let mut degree = vec![0.0f64; num_nodes];
    for &(a, _) in &links {
        degree[a] += 1.0;
    }
    let (mut rows, mut cols, mut values) = (Vec::new(), Vec::new(), Vec::new());
    for &(a, b) in &links {
        rows.push(a);
        cols.push(b);
        values.push(1.0 / (degree[a] * degree[b]).sqrt());
    }
    let coo = CooMatrix::try_from_triplets(num_nodes, num_nodes, rows, cols, values)
        .map_err(|err| anyhow!("failed to assemble adjacency matrix: {}", err))?;
    Ok(CsrMatrix::from(&coo))
}

fn xavier(fan_in: usize, fan_out: usize, rng: &mut StdRng) -> DMatrix<f64> {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
    DMatrix::from_fn(fan_in, fan_out, |_, _| rng.gen_range(-limit..limit))
}

/// Two-layer graph convolution forward pass: `Â relu(Â X W1) W2`.
pub struct GraphNeuralNetwork;

impl Handler for GraphNeuralNetwork {
    const LABEL: &'static str = "graph_neural_network";
    const PARAMETERS: &'static [&'static str] = &["edges", "features", "settings"];

    type Input = GraphInput;
    type Output = GraphOutput;

    fn run(&self, input: GraphInput) -> Result<GraphOutput> {
        let settings = input.settings;
        if settings.hidden_dim == 0 || settings.output_dim == 0 {
            bail!("hidden_dim and output_dim must be positive.");
        }
        let x = matrix_from_rows("features", &input.features)?;
        let adjacency = normalized_adjacency(x.nrows(), &input.edges)?;

        let mut rng = StdRng::seed_from_u64(settings.seed);
        let w1 = xavier(x.ncols(), settings.hidden_dim, &mut rng);
        let w2 = xavier(settings.hidden_dim, settings.output_dim, &mut rng);

        let mut hidden = &adjacency * &(x * w1);
        hidden.apply(|v| *v = v.max(0.0));
        let embeddings = &adjacency * &(hidden * w2);
        debug!(
            nodes = embeddings.nrows(),
            nnz = adjacency.nnz(),
            "graph convolution finished"
        );

        Ok(GraphOutput {
            predicted_classes: embeddings.row_iter().map(|row| argmax(row.iter())).collect(),
            embeddings: rows_from_matrix(&embeddings),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{normalized_adjacency, GcnSettings, GraphInput, GraphNeuralNetwork};
    use crate::traits::Handler;

    #[test]
    fn adjacency_is_symmetric_with_self_loops() {
        let adjacency = normalized_adjacency(3, &[(0, 1), (1, 0), (1, 2)]).expect("valid graph");
        // 3 self loops plus two undirected edges, duplicates collapsed.
        assert_eq!(adjacency.nnz(), 7);
        let dense = nalgebra::DMatrix::from(&adjacency);
        assert_eq!(dense, dense.transpose());
        // Node 0 has degree 2, node 1 has degree 3.
        assert!((dense[(0, 1)] - 1.0 / 6f64.sqrt()).abs() < 1e-12);
        assert!((dense[(1, 1)] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn output_has_one_row_per_node() {
        let out = GraphNeuralNetwork
            .run(GraphInput {
                edges: vec![(0, 1), (1, 2), (2, 3)],
                features: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0], vec![0.5, 0.5]],
                settings: GcnSettings {
                    output_dim: 3,
                    ..GcnSettings::default()
                },
            })
            .expect("forward pass succeeds");
        assert_eq!(out.embeddings.len(), 4);
        assert!(out.embeddings.iter().all(|row| row.len() == 3));
        assert!(out.predicted_classes.iter().all(|&c| c < 3));
    }

    #[test]
    fn symmetric_nodes_share_embeddings() {
        // Star around node 0; leaves 1 and 2 are indistinguishable.
        let out = GraphNeuralNetwork
            .run(GraphInput {
                edges: vec![(0, 1), (0, 2)],
                features: vec![vec![1.0, -1.0], vec![0.3, 0.7], vec![0.3, 0.7]],
                settings: GcnSettings::default(),
            })
            .expect("forward pass succeeds");
        for (a, b) in out.embeddings[1].iter().zip(&out.embeddings[2]) {
            assert!((a - b).abs() < 1e-12);
        }
        assert_eq!(out.predicted_classes[1], out.predicted_classes[2]);
    }

    #[test]
    fn edge_to_missing_node_is_rejected() {
        let err = GraphNeuralNetwork
            .run(GraphInput {
                edges: vec![(0, 5)],
                features: vec![vec![1.0], vec![2.0]],
                settings: GcnSettings::default(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("outside 0..2"));
    }
}
