/// Numerically stable log-softmax:
///   log_softmax(v)_i = (v_i - max v) - ln(sum_j exp(v_j - max v))
///
/// An empty slice yields an empty vector.
pub fn log_softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return values.iter().map(|_| f64::NAN).collect();
    }
    let log_sum_exp = values.iter().map(|v| (v - max).exp()).sum::<f64>().ln();
    values.iter().map(|v| (v - max) - log_sum_exp).collect()
}

/// Returns the index of the maximum value (first one on ties), or `None` for
/// an empty slice. NaN entries never win.
pub fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probabilities_sum_to_one() {
        let v = [3.2, -1.0, 0.5, 12.0, 7.7];
        let total: f64 = log_softmax(&v).iter().map(|x| x.exp()).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn argmax_is_preserved() {
        let v = [0.1, 4.0, -2.0, 3.9];
        assert_eq!(argmax(&log_softmax(&v)), argmax(&v));
        assert_eq!(argmax(&v), Some(1));
    }

    #[test]
    fn large_values_do_not_overflow() {
        let ls = log_softmax(&[1000.0, 1000.0]);
        assert!((ls[0] - (0.5f64).ln()).abs() < 1e-12);
        assert!(ls.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn argmax_prefers_first_on_ties() {
        assert_eq!(argmax(&[1.0, 2.0, 2.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }
}
