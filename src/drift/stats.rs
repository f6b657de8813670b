//! Distribution distances used by the drift detector.

use std::collections::BTreeMap;

/// Two-sample Kolmogorov–Smirnov statistic: the largest absolute difference
/// between the empirical CDFs of the two samples, in `[0, 1]`.
///
/// Non-finite values are ignored. `None` if either sample has no finite
/// values.
pub fn ks_statistic(reference: &[f64], current: &[f64]) -> Option<f64> {
    let a = sorted_finite(reference);
    let b = sorted_finite(current);
    if a.is_empty() || b.is_empty() {
        return None;
    }

    let (n, m) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut statistic: f64 = 0.0;

    // Step both CDFs past each distinct value, ties included
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        statistic = statistic.max((i as f64 / n - j as f64 / m).abs());
    }

    Some(statistic.clamp(0.0, 1.0))
}

/// Jensen–Shannon distance (base 2) between the category frequencies of two
/// samples, in `[0, 1]`.
///
/// Categories are the union of both samples, iterated in sorted order.
/// `None` if either sample is empty.
pub fn jensen_shannon_distance(reference: &[String], current: &[String]) -> Option<f64> {
    if reference.is_empty() || current.is_empty() {
        return None;
    }

    let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for value in reference {
        counts.entry(value).or_default().0 += 1;
    }
    for value in current {
        counts.entry(value).or_default().1 += 1;
    }

    let (n, m) = (reference.len() as f64, current.len() as f64);
    let mut divergence = 0.0;
    for &(p_count, q_count) in counts.values() {
        let p = p_count as f64 / n;
        let q = q_count as f64 / m;
        let mid = (p + q) / 2.0;
        divergence += 0.5 * kl_term(p, mid) + 0.5 * kl_term(q, mid);
    }

    Some(divergence.max(0.0).sqrt().clamp(0.0, 1.0))
}

fn kl_term(p: f64, q: f64) -> f64 {
    if p > 0.0 {
        p * (p / q).log2()
    } else {
        0.0
    }
}

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    finite.sort_by(f64::total_cmp);
    finite
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ks_identical_samples() {
        let sample = vec![3.0, 1.0, 2.0, 2.0, 5.0];
        assert_eq!(ks_statistic(&sample, &sample), Some(0.0));
    }

    #[test]
    fn test_ks_disjoint_samples() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![10.0, 11.0];
        assert_eq!(ks_statistic(&a, &b), Some(1.0));
    }

    #[test]
    fn test_ks_partial_overlap() {
        // CDFs: a = {1,2,3,4}, b = {3,4,5,6}; max gap 0.5 at x = 2
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![3.0, 4.0, 5.0, 6.0];
        let d = ks_statistic(&a, &b).unwrap();
        assert!((d - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_ks_ignores_non_finite() {
        let a = vec![1.0, f64::NAN, 2.0];
        let b = vec![1.0, 2.0, f64::INFINITY];
        assert_eq!(ks_statistic(&a, &b), Some(0.0));
        assert_eq!(ks_statistic(&[f64::NAN], &b), None);
    }

    #[test]
    fn test_js_identical_and_disjoint() {
        let a = strings(&["red", "blue", "red"]);
        assert_eq!(jensen_shannon_distance(&a, &a), Some(0.0));

        let b = strings(&["green"]);
        let d = jensen_shannon_distance(&a, &b).unwrap();
        assert!((d - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_js_symmetric() {
        let a = strings(&["a", "a", "b"]);
        let b = strings(&["a", "b", "b", "c"]);
        let ab = jensen_shannon_distance(&a, &b).unwrap();
        let ba = jensen_shannon_distance(&b, &a).unwrap();
        assert!((ab - ba).abs() < 1e-12);
        assert!(ab > 0.0 && ab < 1.0);
    }

    #[test]
    fn test_js_empty_sample() {
        assert_eq!(jensen_shannon_distance(&[], &strings(&["a"])), None);
    }
}
