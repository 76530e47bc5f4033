//! Distribution comparison primitives.

use crate::config::{BinningStrategy, PsiAggregation};

/// Bin edges taken from baseline quantiles, open at both ends.
///
/// Repeated quantiles collapse into one edge so heavily tied baselines do not
/// produce empty zero-width buckets.
pub fn quantile_edges(baseline: &[f64], bins: usize) -> Vec<f64> {
    let mut sorted: Vec<f64> = baseline.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);

    let mut edges = vec![f64::NEG_INFINITY];
    if !sorted.is_empty() {
        for i in 1..bins {
            let idx = (sorted.len() * i / bins).min(sorted.len() - 1);
            let edge = sorted[idx];
            if edges.last().is_some_and(|last| *last < edge) {
                edges.push(edge);
            }
        }
    }
    edges.push(f64::INFINITY);
    edges
}

/// Equally spaced edges over the baseline range, open at both ends.
pub fn equal_width_edges(baseline: &[f64], bins: usize) -> Vec<f64> {
    let (min, max) = baseline
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });

    let mut edges = vec![f64::NEG_INFINITY];
    if min < max {
        let width = (max - min) / bins as f64;
        edges.extend((1..bins).map(|i| min + width * i as f64));
    }
    edges.push(f64::INFINITY);
    edges
}

pub fn edges_for(baseline: &[f64], bins: usize, strategy: BinningStrategy) -> Vec<f64> {
    match strategy {
        BinningStrategy::Quantile => quantile_edges(baseline, bins),
        BinningStrategy::EqualWidth => equal_width_edges(baseline, bins),
    }
}

/// Count values per right-closed bin `(edges[i], edges[i + 1]]`. NaNs are dropped.
pub fn bin_counts(data: &[f64], edges: &[f64]) -> Vec<usize> {
    let mut counts = vec![0; edges.len().saturating_sub(1)];
    if counts.is_empty() {
        return counts;
    }

    for &value in data {
        if value.is_nan() {
            continue;
        }
        let upper = edges.partition_point(|edge| *edge < value);
        let bin = upper.saturating_sub(1).min(counts.len() - 1);
        counts[bin] += 1;
    }
    counts
}

/// Per-bin share of `data`; empty buckets get `epsilon`.
pub fn bin_proportions(data: &[f64], edges: &[f64], epsilon: f64) -> Vec<f64> {
    let counts = bin_counts(data, edges);
    let total: usize = counts.iter().sum();
    counts
        .into_iter()
        .map(|count| {
            if count == 0 || total == 0 {
                epsilon
            } else {
                count as f64 / total as f64
            }
        })
        .collect()
}

/// `sum (actual - expected) * ln(actual / expected)` over paired buckets.
pub fn psi(expected: &[f64], actual: &[f64]) -> f64 {
    expected
        .iter()
        .zip(actual)
        .map(|(&e, &a)| (a - e) * (a / e).ln())
        .sum()
}

/// PSI of one feature, or `None` when either side has nothing to compare.
pub fn feature_psi(
    baseline: &[f64],
    current: &[f64],
    bins: usize,
    strategy: BinningStrategy,
    epsilon: f64,
) -> Option<f64> {
    if baseline.is_empty() || current.is_empty() {
        return None;
    }
    let edges = edges_for(baseline, bins, strategy);
    let expected = bin_proportions(baseline, &edges, epsilon);
    let actual = bin_proportions(current, &edges, epsilon);
    Some(psi(&expected, &actual))
}

/// Jensen-Shannon divergence in nats, within `[0, ln 2]`.
///
/// Inputs are normalized and the shorter one is zero padded. Returns 0 when
/// either side carries no mass.
pub fn js_divergence(p: &[f64], q: &[f64]) -> f64 {
    let width = p.len().max(q.len());
    let (Some(p), Some(q)) = (normalize(p, width), normalize(q, width)) else {
        return 0.0;
    };

    let m: Vec<f64> = p.iter().zip(&q).map(|(a, b)| 0.5 * (a + b)).collect();
    let js = 0.5 * kl(&p, &m) + 0.5 * kl(&q, &m);
    js.clamp(0.0, std::f64::consts::LN_2)
}

fn normalize(values: &[f64], width: usize) -> Option<Vec<f64>> {
    let total: f64 = values.iter().filter(|v| v.is_finite() && **v > 0.0).sum();
    if total <= 0.0 {
        return None;
    }
    let mut out: Vec<f64> = values
        .iter()
        .map(|v| if v.is_finite() && *v > 0.0 { v / total } else { 0.0 })
        .collect();
    out.resize(width, 0.0);
    Some(out)
}

fn kl(p: &[f64], q: &[f64]) -> f64 {
    p.iter()
        .zip(q)
        .filter(|(a, _)| **a > 0.0)
        .map(|(a, b)| a * (a / b).ln())
        .sum()
}

/// Collapse per-feature PSI into the model-level score; 0 when nothing was scored.
pub fn aggregate(scores: &[f64], aggregation: PsiAggregation) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    match aggregation {
        PsiAggregation::Max => scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        PsiAggregation::Mean => scores.iter().sum::<f64>() / scores.len() as f64,
    }
}
