use crate::traits::Handler;
use anyhow::{bail, Result};
use serde::Deserialize;

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecommenderInput {
    pub ratings_matrix: Vec<Vec<f64>>,
    pub user_index: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

/// Ranks one user's items by their rating, highest first.
///
/// Zero entries are ranked like any other rating. Equal ratings keep the
/// lower item index first.
pub struct RecommenderSystems;

impl Handler for RecommenderSystems {
    const LABEL: &'static str = "recommender_systems";
    const PARAMETERS: &'static [&'static str] = &["ratings_matrix", "user_index", "top_k"];

    type Input = RecommenderInput;
    type Output = Vec<usize>;

    fn run(&self, input: RecommenderInput) -> Result<Vec<usize>> {
        let Some(ratings) = input.ratings_matrix.get(input.user_index) else {
            bail!(
                "user_index {} is out of bounds for {} users.",
                input.user_index,
                input.ratings_matrix.len()
            );
        };
        if ratings.iter().any(|r| r.is_nan()) {
            bail!("ratings for user {} contain NaN.", input.user_index);
        }

        let mut items: Vec<usize> = (0..ratings.len()).collect();
        // Stable sort keeps ties in index order.
        items.sort_by(|&a, &b| ratings[b].total_cmp(&ratings[a]));
        items.truncate(input.top_k);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::{RecommenderInput, RecommenderSystems};
    use crate::traits::Handler;

    fn run(matrix: Vec<Vec<f64>>, user_index: usize, top_k: usize) -> anyhow::Result<Vec<usize>> {
        RecommenderSystems.run(RecommenderInput {
            ratings_matrix: matrix,
            user_index,
            top_k,
        })
    }

    #[test]
    fn returns_top_k_in_descending_order() {
        let matrix = vec![
            vec![1.0, 5.0, 3.0, 0.0, 4.0, 2.0, 4.5],
            vec![5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        ];
        assert_eq!(run(matrix, 0, 5).unwrap(), vec![1, 6, 4, 2, 5]);
    }

    #[test]
    fn ties_prefer_lower_index_and_short_rows_return_everything() {
        let matrix = vec![vec![2.0, 3.0, 3.0, 0.0]];
        assert_eq!(run(matrix, 0, 10).unwrap(), vec![1, 2, 0, 3]);
    }

    #[test]
    fn out_of_range_user_is_an_error() {
        let err = run(vec![vec![1.0]], 3, 5).unwrap_err();
        assert!(err.to_string().contains("out of bounds"));
    }
}
