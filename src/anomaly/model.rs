//! Pluggable outlier models
//!
//! The detector always runs its statistical layer. An [`OutlierModel`] adds a
//! multivariate pass over standardized feature rows; [`StatisticalOnly`] is
//! the no-op strategy used when no model is configured.

use serde::{Deserialize, Serialize};

use crate::error::ComputeError;
use crate::types::DetectionMethod;

/// Verdict for one feature row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierPrediction {
    pub is_outlier: bool,
    /// Higher is more anomalous
    pub score: f64,
}

/// Which outlier strategy the engine builds from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    StatisticalOnly,
    IsolationForest,
}

/// Strategy seam for multivariate outlier detection
pub trait OutlierModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Method recorded on events produced by this model; `None` disables the
    /// model pass entirely.
    fn detection_method(&self) -> Option<DetectionMethod>;

    /// Fit on `rows` and label each of them. `contamination` is the expected
    /// outlier share.
    fn fit_predict(
        &self,
        rows: &[Vec<f64>],
        contamination: f64,
    ) -> Result<Vec<OutlierPrediction>, ComputeError>;
}

/// No model: only the statistical layer runs
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticalOnly;

impl OutlierModel for StatisticalOnly {
    fn name(&self) -> &'static str {
        "statistical_only"
    }

    fn detection_method(&self) -> Option<DetectionMethod> {
        None
    }

    fn fit_predict(
        &self,
        rows: &[Vec<f64>],
        _contamination: f64,
    ) -> Result<Vec<OutlierPrediction>, ComputeError> {
        Ok(rows
            .iter()
            .map(|_| OutlierPrediction {
                is_outlier: false,
                score: 0.0,
            })
            .collect())
    }
}

/// Build the configured strategy
pub fn build_model(kind: ModelKind) -> Result<Box<dyn OutlierModel>, ComputeError> {
    match kind {
        ModelKind::StatisticalOnly => Ok(Box::new(StatisticalOnly)),
        #[cfg(feature = "isolation-forest")]
        ModelKind::IsolationForest => Ok(Box::new(forest::IsolationForest::default())),
        #[cfg(not(feature = "isolation-forest"))]
        ModelKind::IsolationForest => Err(ComputeError::InvalidConfig(
            "isolation forest requested but the `isolation-forest` feature is disabled"
                .to_string(),
        )),
    }
}

#[cfg(feature = "isolation-forest")]
pub use forest::IsolationForest;

#[cfg(feature = "isolation-forest")]
mod forest {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::{OutlierModel, OutlierPrediction};
    use crate::error::ComputeError;
    use crate::types::DetectionMethod;

    const EULER_GAMMA: f64 = 0.577_215_664_9;

    /// Isolation forest with a fixed seed, so repeated runs agree
    #[derive(Debug, Clone)]
    pub struct IsolationForest {
        pub n_trees: usize,
        pub max_samples: usize,
        pub seed: u64,
    }

    impl Default for IsolationForest {
        fn default() -> Self {
            Self {
                n_trees: 100,
                max_samples: 256,
                seed: 42,
            }
        }
    }

    enum Node {
        Leaf {
            size: usize,
        },
        Split {
            feature: usize,
            threshold: f64,
            left: Box<Node>,
            right: Box<Node>,
        },
    }

    /// Average path length of an unsuccessful BST search over `n` points
    fn average_path_length(n: usize) -> f64 {
        match n {
            0 | 1 => 0.0,
            2 => 1.0,
            _ => {
                let n = n as f64;
                2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
            }
        }
    }

    fn build(
        rows: &[Vec<f64>],
        indices: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> Node {
        if depth >= height_limit || indices.len() <= 1 {
            return Node::Leaf {
                size: indices.len(),
            };
        }

        let width = rows[indices[0]].len();
        let splittable: Vec<(usize, f64, f64)> = (0..width)
            .filter_map(|feature| {
                let mut lo = f64::INFINITY;
                let mut hi = f64::NEG_INFINITY;
                for &i in &indices {
                    lo = lo.min(rows[i][feature]);
                    hi = hi.max(rows[i][feature]);
                }
                (hi > lo).then_some((feature, lo, hi))
            })
            .collect();

        if splittable.is_empty() {
            return Node::Leaf {
                size: indices.len(),
            };
        }

        let (feature, lo, hi) = splittable[rng.random_range(0..splittable.len())];
        let threshold = rng.random_range(lo..hi);
        let (left, right): (Vec<usize>, Vec<usize>) =
            indices.into_iter().partition(|&i| rows[i][feature] < threshold);

        Node::Split {
            feature,
            threshold,
            left: Box::new(build(rows, left, depth + 1, height_limit, rng)),
            right: Box::new(build(rows, right, depth + 1, height_limit, rng)),
        }
    }

    fn path_length(node: &Node, row: &[f64], depth: usize) -> f64 {
        match node {
            Node::Leaf { size } => depth as f64 + average_path_length(*size),
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] < *threshold {
                    path_length(left, row, depth + 1)
                } else {
                    path_length(right, row, depth + 1)
                }
            }
        }
    }

    impl OutlierModel for IsolationForest {
        fn name(&self) -> &'static str {
            "isolation_forest"
        }

        fn detection_method(&self) -> Option<DetectionMethod> {
            Some(DetectionMethod::IsolationForest)
        }

        fn fit_predict(
            &self,
            rows: &[Vec<f64>],
            contamination: f64,
        ) -> Result<Vec<OutlierPrediction>, ComputeError> {
            let n = rows.len();
            if n < 2 {
                return Err(ComputeError::ModelError(format!(
                    "isolation forest needs at least 2 rows, got {n}"
                )));
            }
            let width = rows[0].len();
            if width == 0 || rows.iter().any(|r| r.len() != width) {
                return Err(ComputeError::ModelError(
                    "feature rows must share a non-zero width".to_string(),
                ));
            }

            let sample_size = self.max_samples.min(n).max(2);
            let height_limit = (sample_size as f64).log2().ceil() as usize;
            let mut rng = StdRng::seed_from_u64(self.seed);

            let trees: Vec<Node> = (0..self.n_trees.max(1))
                .map(|_| {
                    let sample = rand::seq::index::sample(&mut rng, n, sample_size).into_vec();
                    build(rows, sample, 0, height_limit, &mut rng)
                })
                .collect();

            let normalizer = average_path_length(sample_size);
            let scores: Vec<f64> = rows
                .iter()
                .map(|row| {
                    let mean_depth = trees.iter().map(|t| path_length(t, row, 0)).sum::<f64>()
                        / trees.len() as f64;
                    2f64.powf(-mean_depth / normalizer)
                })
                .collect();

            let outlier_count = ((n as f64 * contamination).ceil() as usize).min(n);
            let mut order: Vec<usize> = (0..n).collect();
            order.sort_by(|a, b| scores[*b].total_cmp(&scores[*a]).then(a.cmp(b)));

            let mut predictions: Vec<OutlierPrediction> = scores
                .iter()
                .map(|score| OutlierPrediction {
                    is_outlier: false,
                    score: *score,
                })
                .collect();
            for &i in order.iter().take(outlier_count) {
                predictions[i].is_outlier = true;
            }

            Ok(predictions)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn cluster_with_outlier() -> Vec<Vec<f64>> {
            let mut rows: Vec<Vec<f64>> = (0..60)
                .map(|i| vec![(i % 7) as f64 * 0.1, (i % 5) as f64 * 0.1])
                .collect();
            rows.push(vec![25.0, -30.0]);
            rows
        }

        #[test]
        fn test_far_point_is_outlier() {
            let rows = cluster_with_outlier();
            let predictions = IsolationForest::default().fit_predict(&rows, 0.05).unwrap();

            let last = predictions.last().unwrap();
            assert!(last.is_outlier);
            let max_score = predictions.iter().map(|p| p.score).fold(0.0, f64::max);
            assert_eq!(last.score, max_score);
        }

        #[test]
        fn test_contamination_sets_outlier_count() {
            let rows = cluster_with_outlier();
            let predictions = IsolationForest::default().fit_predict(&rows, 0.1).unwrap();

            // ceil(61 * 0.1)
            assert_eq!(predictions.iter().filter(|p| p.is_outlier).count(), 7);
        }

        #[test]
        fn test_seeded_forest_is_deterministic() {
            let rows = cluster_with_outlier();
            let forest = IsolationForest::default();

            assert_eq!(
                forest.fit_predict(&rows, 0.1).unwrap(),
                forest.fit_predict(&rows, 0.1).unwrap()
            );
        }

        #[test]
        fn test_rejects_single_row() {
            assert!(IsolationForest::default().fit_predict(&[vec![1.0]], 0.1).is_err());
        }
    }
}
