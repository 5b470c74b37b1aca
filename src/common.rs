use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_stats::QuantileExt;

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable log-softmax of a single row.
pub fn log_softmax(input: ArrayView1<f32>) -> Array1<f32> {
    let max_val = *input.max().unwrap_or(&0.0);
    if !max_val.is_finite() {
        // All -inf (or NaN): leave it to the loss to report non-finite values.
        return input.mapv(|_| f32::NAN);
    }
    let sum_exp: f64 = input.iter().map(|&x| ((x - max_val) as f64).exp()).sum();
    let log_norm = max_val as f64 + sum_exp.ln();
    input.mapv(|x| (x as f64 - log_norm) as f32)
}

/// Row-wise log-softmax of `[rows, classes]` logits.
pub fn log_softmax_rows(logits: ArrayView2<f32>) -> Array2<f32> {
    let mut out = Array2::zeros(logits.raw_dim());
    for (mut dst, src) in out.outer_iter_mut().zip(logits.outer_iter()) {
        dst.assign(&log_softmax(src));
    }
    out
}

/// `log(sum_k exp(terms[k]))`, with the all `-inf` case mapped to `-inf`.
pub fn log_sum_exp(terms: &[f64]) -> f64 {
    let max_val = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max_val == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = terms.iter().map(|&t| (t - max_val).exp()).sum();
    max_val + sum.ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_sigmoid() {
        assert_abs_diff_eq!(sigmoid(0.0), 0.5, epsilon = 1e-7);
        assert!(sigmoid(20.0) > 0.999);
        assert!(sigmoid(-20.0) < 0.001);
    }

    #[test]
    fn test_log_softmax_basic() {
        let input = arr1(&[1.0f32, 2.0, 3.0]);
        let output = log_softmax(input.view());
        assert_abs_diff_eq!(output[0].exp(), 0.09003057, epsilon = 1e-5);
        assert_abs_diff_eq!(output[1].exp(), 0.24472847, epsilon = 1e-5);
        assert_abs_diff_eq!(output[2].exp(), 0.66524096, epsilon = 1e-5);
        assert_abs_diff_eq!(output.mapv(f32::exp).sum(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_log_softmax_very_negative_inputs() {
        let input = arr1(&[-1000.0f32, -1001.0, -1002.0]);
        let output = log_softmax(input.view());
        assert_abs_diff_eq!(output[0].exp(), 0.66524096, epsilon = 1e-5);
        assert!(output.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_log_softmax_rows_is_per_row() {
        let logits = arr2(&[[0.0f32, 0.0], [0.0, 100.0]]);
        let out = log_softmax_rows(logits.view());
        assert_abs_diff_eq!(out[[0, 0]], (0.5f32).ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(out[[1, 1]], 0.0, epsilon = 1e-6);
        assert!(out[[1, 0]] < -99.0);
    }

    #[test]
    fn test_log_sum_exp() {
        let terms = [(0.25f64).ln(), (0.75f64).ln()];
        assert_abs_diff_eq!(log_sum_exp(&terms), 0.0, epsilon = 1e-12);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]), f64::NEG_INFINITY);
        assert_abs_diff_eq!(log_sum_exp(&[f64::NEG_INFINITY, 1.5]), 1.5, epsilon = 1e-12);
    }
}
