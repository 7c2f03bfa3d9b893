use kinemod::normalize::{normalize_signals, round6, NormMethod};

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn stddev(xs: &[f64]) -> f64 {
    let m = mean(xs);
    (xs.iter().map(|&x| (x - m) * (x - m)).sum::<f64>() / xs.len() as f64).sqrt()
}

#[test]
fn zscore_output_has_zero_mean_unit_stddev() {
    let signals = vec![1.0, 2.0, 3.0, 4.0, 5.0, 10.0, 20.0];
    let normed = normalize_signals(&signals, NormMethod::Zscore);
    assert_eq!(normed.len(), signals.len());
    // Within rounding: values are rounded to 6 decimals.
    assert!(mean(&normed).abs() < 1e-5);
    assert!((stddev(&normed) - 1.0).abs() < 1e-5);
}

#[test]
fn constant_input_is_all_zero_under_every_method() {
    let signals = vec![7.0; 10];
    for method in [
        NormMethod::Zscore,
        NormMethod::MinMax,
        NormMethod::MinMean,
        NormMethod::Mad,
    ] {
        let normed = normalize_signals(&signals, method);
        assert_eq!(normed, vec![0.0; 10], "method {method:?}");
    }
}

#[test]
fn min_max_spans_zero_to_one() {
    let signals = vec![2.0, 4.0, 6.0, 8.0];
    let normed = normalize_signals(&signals, NormMethod::MinMax);
    assert_eq!(normed, vec![0.0, 0.333333, 0.666667, 1.0]);
}

#[test]
fn min_mean_shifts_by_min_scales_by_mean() {
    let signals = vec![2.0, 4.0, 6.0];
    // shift = 2, scale = 4
    let normed = normalize_signals(&signals, NormMethod::MinMean);
    assert_eq!(normed, vec![0.0, 0.5, 1.0]);
}

#[test]
fn mad_uses_normal_consistency_scale() {
    let signals = vec![1.0, 2.0, 3.0, 4.0, 5.0];
    // median = 3, mad = median(|x-3|) / 0.6744... = 1 / 0.6744...
    let normed = normalize_signals(&signals, NormMethod::Mad);
    let expected_scale = 1.0 / 0.674_489_750_196_081_7;
    let expected: Vec<f64> = signals
        .iter()
        .map(|&x| (((x - 3.0) / expected_scale) * 1e6).round() / 1e6)
        .collect();
    assert_eq!(normed, expected);
}

#[test]
fn empty_input_stays_empty() {
    assert!(normalize_signals(&[], NormMethod::Zscore).is_empty());
}

#[test]
fn rounding_breaks_ties_to_even() {
    // 1.0485765 * 1e6 is exactly 1048576.5 in f64; half-away-from-zero
    // rounding would give 1.048577 here.
    assert_eq!(round6(1.0485765), 1.048576);
    assert_eq!(round6(1.0485775), 1.048578);
}

#[test]
fn values_are_rounded_to_six_decimals() {
    let signals = vec![0.0, 1.0, 2.0];
    for value in normalize_signals(&signals, NormMethod::Zscore) {
        assert_eq!(value, (value * 1e6).round() / 1e6);
    }
}
