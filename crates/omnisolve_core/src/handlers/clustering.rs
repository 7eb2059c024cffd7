use crate::traits::Handler;
use crate::util::{matrix_from_rows, rows_from_matrix};
use anyhow::{bail, Result};
use nalgebra::{DMatrix, RowDVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansSettings {
    pub max_iterations: usize,
    /// Stop when no centroid moves farther than this.
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for KMeansSettings {
    fn default() -> Self {
        Self {
            max_iterations: 300,
            tolerance: 1e-6,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusteringInput {
    pub points: Vec<Vec<f64>>,
    pub k: usize,
    #[serde(default)]
    pub settings: KMeansSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringOutput {
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    /// Sum of squared distances to the assigned centroid.
    pub inertia: f64,
    pub iterations: usize,
}

/// Lloyd's k-means with k-means++ seeding.
pub struct Clustering;

impl Handler for Clustering {
    const LABEL: &'static str = "clustering";
    const PARAMETERS: &'static [&'static str] = &["points", "k", "settings"];

    type Input = ClusteringInput;
    type Output = ClusteringOutput;

    fn run(&self, input: ClusteringInput) -> Result<ClusteringOutput> {
        let settings = input.settings;
        let points = matrix_from_rows("points", &input.points)?;
        let n = points.nrows();
        if input.k == 0 {
            bail!("k must be at least 1.");
        }
        if input.k > n {
            bail!("k = {} exceeds the number of points ({}).", input.k, n);
        }

        let mut rng = StdRng::seed_from_u64(settings.seed);
        let mut centroids = seed_centroids(&points, input.k, &mut rng);
        let mut labels = vec![0usize; n];
        let mut iterations = 0;

        while iterations < settings.max_iterations {
            iterations += 1;
            for (i, label) in labels.iter_mut().enumerate() {
                *label = nearest(&centroids, &points.row(i).into_owned()).0;
            }

            let mut next = DMatrix::<f64>::zeros(input.k, points.ncols());
            let mut counts = vec![0usize; input.k];
            for (i, &label) in labels.iter().enumerate() {
                let mut row = next.row_mut(label);
                row += points.row(i);
                counts[label] += 1;
            }
            for (c, &count) in counts.iter().enumerate() {
                if count == 0 {
                    // Empty cluster keeps its previous centroid.
                    next.set_row(c, &centroids.row(c));
                } else {
                    let mut row = next.row_mut(c);
                    row /= count as f64;
                }
            }

            let shift = (0..input.k)
                .map(|c| (next.row(c) - centroids.row(c)).norm())
                .fold(0.0, f64::max);
            centroids = next;
            if shift <= settings.tolerance {
                break;
            }
        }

        let mut inertia = 0.0;
        for (i, label) in labels.iter_mut().enumerate() {
            let (best, dist) = nearest(&centroids, &points.row(i).into_owned());
            *label = best;
            inertia += dist;
        }
        debug!(iterations, inertia, "k-means converged");

        Ok(ClusteringOutput {
            labels,
            centroids: rows_from_matrix(&centroids),
            inertia,
            iterations,
        })
    }
}

/// k-means++: each new centroid is drawn with probability proportional to
/// its squared distance from the closest centroid chosen so far.
fn seed_centroids(points: &DMatrix<f64>, k: usize, rng: &mut StdRng) -> DMatrix<f64> {
    let n = points.nrows();
    let mut centroids = DMatrix::<f64>::zeros(k, points.ncols());
    centroids.set_row(0, &points.row(rng.gen_range(0..n)));

    for c in 1..k {
        let chosen = centroids.rows(0, c).into_owned();
        let weights: Vec<f64> = (0..n)
            .map(|i| nearest(&chosen, &points.row(i).into_owned()).1)
            .collect();
        let total: f64 = weights.iter().sum();
        let pick = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            weights
                .iter()
                .position(|&w| {
                    target -= w;
                    target <= 0.0
                })
                .unwrap_or(n - 1)
        } else {
            rng.gen_range(0..n)
        };
        centroids.set_row(c, &points.row(pick));
    }
    centroids
}

/// Index of the closest centroid and the squared distance to it.
fn nearest(centroids: &DMatrix<f64>, point: &RowDVector<f64>) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for c in 0..centroids.nrows() {
        let dist = (centroids.row(c) - point).norm_squared();
        if dist < best.1 {
            best = (c, dist);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::{Clustering, ClusteringInput, KMeansSettings};
    use crate::traits::Handler;

    fn two_blobs() -> Vec<Vec<f64>> {
        vec![
            vec![0.0, 0.0],
            vec![0.2, 0.1],
            vec![-0.1, 0.3],
            vec![10.0, 10.0],
            vec![10.2, 9.8],
            vec![9.9, 10.1],
        ]
    }

    #[test]
    fn separates_well_spaced_blobs() {
        let out = Clustering
            .run(ClusteringInput {
                points: two_blobs(),
                k: 2,
                settings: KMeansSettings::default(),
            })
            .expect("k-means succeeds");
        assert_eq!(out.labels[0], out.labels[1]);
        assert_eq!(out.labels[0], out.labels[2]);
        assert_eq!(out.labels[3], out.labels[4]);
        assert_eq!(out.labels[3], out.labels[5]);
        assert_ne!(out.labels[0], out.labels[3]);
        assert!(out.inertia < 1.0);
    }

    #[test]
    fn same_seed_gives_same_result() {
        let run = || {
            Clustering
                .run(ClusteringInput {
                    points: two_blobs(),
                    k: 3,
                    settings: KMeansSettings::default(),
                })
                .expect("k-means succeeds")
        };
        assert_eq!(run().labels, run().labels);
    }

    #[test]
    fn k_larger_than_point_count_is_rejected() {
        let err = Clustering
            .run(ClusteringInput {
                points: vec![vec![1.0]],
                k: 2,
                settings: KMeansSettings::default(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}
