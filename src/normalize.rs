//! Per-read signal normalization.
//!
//! IPD/PW frame counts and base qualities are normalized per read before
//! windowing, so feature values are comparable across reads with different
//! polymerase speeds.

use clap::ValueEnum;

/// Consistency constant relating the median absolute deviation to the
/// standard deviation of a normal distribution.
const MAD_NORMAL_CONSTANT: f64 = 0.674_489_750_196_081_7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NormMethod {
    Zscore,
    MinMax,
    MinMean,
    Mad,
}

/// Normalize `signals` in place semantics: returns `(x - shift) / scale`
/// rounded to 6 decimals. A zero scale (constant input) yields an all-zero
/// array of the same length rather than dividing by zero.
pub fn normalize_signals(signals: &[f64], method: NormMethod) -> Vec<f64> {
    let (shift, scale) = match method {
        NormMethod::Zscore => (mean(signals), stddev(signals)),
        NormMethod::MinMax => {
            let lo = min(signals);
            (lo, max(signals) - lo)
        }
        NormMethod::MinMean => (min(signals), mean(signals)),
        NormMethod::Mad => (median(signals), mad(signals)),
    };
    if scale == 0.0 {
        return vec![0.0; signals.len()];
    }
    signals
        .iter()
        .map(|&x| round6((x - shift) / scale))
        .collect()
}

/// Round to 6 decimals with ties to even, matching numpy's `around`.
pub fn round6(x: f64) -> f64 {
    (x * 1e6).round_ties_even() / 1e6
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

// Population standard deviation, matching numpy's default ddof=0.
fn stddev(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let m = mean(xs);
    (xs.iter().map(|&x| (x - m) * (x - m)).sum::<f64>() / xs.len() as f64).sqrt()
}

fn min(xs: &[f64]) -> f64 {
    xs.iter().copied().fold(f64::INFINITY, f64::min)
}

fn max(xs: &[f64]) -> f64 {
    xs.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn median(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn mad(xs: &[f64]) -> f64 {
    let med = median(xs);
    let devs: Vec<f64> = xs.iter().map(|&x| (x - med).abs()).collect();
    median(&devs) / MAD_NORMAL_CONSTANT
}
