//! Statistical primitives used by the stages.
//!
//! All functions work on plain slices and ignore non-finite input where noted.
//! Quantiles use linear interpolation between order statistics.

use anyhow::{Result, anyhow, bail};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::collections::HashMap;

/// Non-missing, non-NaN values.
pub fn present(values: &[Option<f64>]) -> Vec<f64> {
    values
        .iter()
        .flatten()
        .copied()
        .filter(|v| !v.is_nan())
        .collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Quantile `q` in `[0, 1]` with linear interpolation.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(quantile_sorted(&sorted, q))
}

/// Same as [`quantile`] on already sorted input.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = pos - lo as f64;
    let (a, b) = (sorted[lo], sorted[hi]);
    // keeps ±inf borders intact instead of producing NaN
    if a == b { a } else { a + (b - a) * frac }
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Ranks starting at 1, ties get the average of their positions.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let (Some(ma), Some(mb)) = (mean(a), mean(b)) else {
        return f64::NAN;
    };
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    cov / (va.sqrt() * vb.sqrt())
}

/// Spearman rank correlation over rows where both values are present.
///
/// Returns NaN when fewer than two complete rows remain or a side is constant.
pub fn spearman(a: &[Option<f64>], b: &[Option<f64>]) -> f64 {
    let (xs, ys): (Vec<f64>, Vec<f64>) = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) if !x.is_nan() && !y.is_nan() => Some((*x, *y)),
            _ => None,
        })
        .unzip();
    if xs.len() < 2 {
        return f64::NAN;
    }
    pearson(&average_ranks(&xs), &average_ranks(&ys))
}

/// Chi-square statistic and p-value of one feature against the classes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChiSquareScore {
    pub statistic: f64,
    pub p_value: f64,
}

/// Chi-square test of non-negative feature values against class labels.
///
/// Observed counts are the per-class sums of each feature; expected counts
/// distribute the feature total by class frequency. Fails on negative or
/// missing values, on mismatched lengths, and when fewer than two classes exist.
pub fn chi_square(features: &[Vec<Option<f64>>], classes: &[String]) -> Result<Vec<ChiSquareScore>> {
    let mut labels: Vec<&str> = classes.iter().map(String::as_str).collect();
    labels.sort_unstable();
    labels.dedup();
    if labels.len() < 2 {
        bail!("chi-square needs at least two classes, found {}", labels.len());
    }
    let class_index: HashMap<&str, usize> =
        labels.iter().enumerate().map(|(i, l)| (*l, i)).collect();
    let n = classes.len() as f64;
    let mut class_freq = vec![0.0; labels.len()];
    for c in classes {
        class_freq[class_index[c.as_str()]] += 1.0;
    }

    let dist = ChiSquared::new((labels.len() - 1) as f64).map_err(|e| anyhow!("{e}"))?;

    features
        .iter()
        .map(|values| {
            if values.len() != classes.len() {
                bail!("feature length {} != class length {}", values.len(), classes.len());
            }
            let mut observed = vec![0.0; labels.len()];
            let mut total = 0.0;
            for (value, class) in values.iter().zip(classes) {
                let v = value.ok_or_else(|| anyhow!("chi-square input contains missing values"))?;
                if v.is_nan() || v < 0.0 {
                    bail!("chi-square input must be non-negative, got {v}");
                }
                observed[class_index[class.as_str()]] += v;
                total += v;
            }
            let statistic: f64 = observed
                .iter()
                .zip(&class_freq)
                .map(|(obs, freq)| {
                    let expected = freq / n * total;
                    (obs - expected).powi(2) / expected
                })
                .sum();
            let p_value = if statistic.is_nan() {
                f64::NAN
            } else {
                dist.sf(statistic)
            };
            Ok(ChiSquareScore { statistic, p_value })
        })
        .collect()
}
