//! Multiple testing correction

/// Benjamini-Hochberg adjusted p-values.
///
/// NaN p-values are excluded from the number of tests and stay NaN.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..pvalues.len()).filter(|&i| !pvalues[i].is_nan()).collect();
    let m = order.len();
    let mut padj = vec![f64::NAN; pvalues.len()];
    if m == 0 {
        return padj;
    }
    order.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));

    let mut cummin = f64::INFINITY;
    for (rank, &i) in order.iter().enumerate().rev() {
        let adj = (pvalues[i] * m as f64 / (rank + 1) as f64).min(1.0);
        cummin = cummin.min(adj);
        padj[i] = cummin;
    }
    padj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bh_matches_reference() {
        // p.adjust(c(0.01, 0.04, 0.03, 0.2), "BH")
        let padj = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.2]);
        let expected = [0.04, 0.0533333333, 0.0533333333, 0.2];
        for (a, e) in padj.iter().zip(expected) {
            assert!((a - e).abs() < 1e-8);
        }
    }

    #[test]
    fn test_nan_is_not_counted() {
        let padj = benjamini_hochberg(&[0.01, f64::NAN, 0.02]);
        assert!((padj[0] - 0.02).abs() < 1e-12);
        assert!(padj[1].is_nan());
        assert!((padj[2] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_monotone_and_bounded() {
        let p = [0.5, 0.001, 0.9, 0.04, 0.3];
        let padj = benjamini_hochberg(&p);
        for i in 0..p.len() {
            assert!(padj[i] >= p[i] && padj[i] <= 1.0);
            for j in 0..p.len() {
                if p[i] < p[j] {
                    assert!(padj[i] <= padj[j]);
                }
            }
        }
    }

    #[test]
    fn test_empty() {
        assert!(benjamini_hochberg(&[]).is_empty());
    }
}
