//! One-dimensional density scoring.
//!
//! The score of a value is `d / (d + radius)` where `d` is the distance to its
//! `min_cluster_size`-th nearest neighbour. Values inside a dense cluster score
//! near 0, isolated values approach 1.

use anyhow::{Result, bail};

use super::{OutlierScorer, ScorerFactory};

#[derive(Debug, Clone, Copy, Default)]
pub struct DensityScorerFactory;

impl ScorerFactory for DensityScorerFactory {
    fn build(&self, min_cluster_size: usize, radius: f64) -> Result<Box<dyn OutlierScorer>> {
        Ok(Box::new(DensityScorer::new(min_cluster_size, radius)?))
    }
}

#[derive(Debug, Clone)]
pub struct DensityScorer {
    min_cluster_size: usize,
    radius: f64,
}

impl DensityScorer {
    pub fn new(min_cluster_size: usize, radius: f64) -> Result<Self> {
        if min_cluster_size < 2 {
            bail!("min_cluster_size must be at least 2, got {min_cluster_size}");
        }
        if !(radius.is_finite() && radius > 0.0) {
            bail!("radius must be a positive finite number, got {radius}");
        }
        Ok(Self {
            min_cluster_size,
            radius,
        })
    }

    /// Distance from `sorted[i]` to its k-th nearest neighbour.
    fn k_distance(sorted: &[f64], i: usize, k: usize) -> f64 {
        let (mut left, mut right) = (i, i);
        let mut last = 0.0;
        for _ in 0..k {
            let go_left = match (left.checked_sub(1), right + 1 < sorted.len()) {
                (Some(l), true) => sorted[i] - sorted[l] <= sorted[right + 1] - sorted[i],
                (Some(_), false) => true,
                (None, true) => false,
                (None, false) => break,
            };
            if go_left {
                left -= 1;
                last = sorted[i] - sorted[left];
            } else {
                right += 1;
                last = sorted[right] - sorted[i];
            }
        }
        last
    }
}

impl OutlierScorer for DensityScorer {
    fn score(&self, values: &[f64]) -> Result<Vec<f64>> {
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            bail!("cannot score non-finite value {bad}");
        }
        if values.len() <= self.min_cluster_size {
            bail!(
                "need more than {} values to score, got {}",
                self.min_cluster_size,
                values.len()
            );
        }

        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        let sorted: Vec<f64> = order.iter().map(|&i| values[i]).collect();

        let mut scores = vec![0.0; values.len()];
        for (pos, &original) in order.iter().enumerate() {
            let d = Self::k_distance(&sorted, pos, self.min_cluster_size);
            scores[original] = d / (d + self.radius);
        }
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_small_cluster_size() {
        assert!(DensityScorer::new(1, 1.0).is_err());
        assert!(DensityScorer::new(2, 0.0).is_err());
        assert!(DensityScorerFactory.build(2, 1.0).is_ok());
    }

    #[test]
    fn test_isolated_value_scores_highest() {
        let mut values: Vec<f64> = (0..50).map(|i| (i % 5) as f64).collect();
        values.push(500.0);
        let scorer = DensityScorer::new(3, 1.0).unwrap();
        let scores = scorer.score(&values).unwrap();

        let (max_idx, _) = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        assert_eq!(max_idx, 50);
        assert!(scores[0] < 0.01);
    }

    #[test]
    fn test_scores_in_input_order() {
        let scorer = DensityScorer::new(2, 1.0).unwrap();
        let scores = scorer.score(&[10.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(scores[0] > scores[1]);
        assert_eq!(scores[1], scores[2]);
    }

    #[test]
    fn test_non_finite_is_error() {
        let scorer = DensityScorer::new(2, 1.0).unwrap();
        assert!(scorer.score(&[1.0, f64::NAN, 2.0, 3.0]).is_err());
    }
}
