//! Design matrices for single-factor models

use ndarray::Array2;

use crate::data::SampleMetadata;
use crate::error::{PipelineError, Result};

/// Column layout of a design matrix
#[derive(Debug, Clone, PartialEq)]
pub struct DesignInfo {
    /// Factor the design was built from (empty for `~1`)
    pub factor: String,
    /// Level absorbed by the intercept
    pub reference_level: String,
    /// Reference first, then the remaining levels sorted
    pub levels: Vec<String>,
    /// `Intercept`, then `{factor}_{level}_vs_{reference}`
    pub coef_names: Vec<String>,
}

impl DesignInfo {
    pub fn n_coefs(&self) -> usize {
        self.coef_names.len()
    }

    /// Column holding the indicator of `level` (`None` for the reference)
    pub fn level_column(&self, level: &str) -> Option<usize> {
        if level == self.reference_level {
            return None;
        }
        self.levels.iter().position(|l| l == level)
    }
}

/// Model matrix plus its column layout
#[derive(Debug, Clone, PartialEq)]
pub struct Design {
    pub matrix: Array2<f64>,
    pub info: DesignInfo,
}

impl Design {
    pub fn n_coefs(&self) -> usize {
        self.matrix.ncols()
    }

    /// True when every sample's row is one of exactly `p` distinct rows,
    /// i.e. fitted means are the per-cell group means
    pub fn is_cell_means(&self) -> bool {
        let mut rows: Vec<Vec<u64>> = self
            .matrix
            .rows()
            .into_iter()
            .map(|r| r.iter().map(|v| v.to_bits()).collect())
            .collect();
        rows.sort();
        rows.dedup();
        rows.len() == self.matrix.ncols()
    }

    /// Cell index of each sample (samples sharing a design row share a cell)
    pub fn cells(&self) -> Vec<usize> {
        let mut distinct: Vec<Vec<u64>> = Vec::new();
        self.matrix
            .rows()
            .into_iter()
            .map(|r| {
                let key: Vec<u64> = r.iter().map(|v| v.to_bits()).collect();
                match distinct.iter().position(|d| *d == key) {
                    Some(i) => i,
                    None => {
                        distinct.push(key);
                        distinct.len() - 1
                    }
                }
            })
            .collect()
    }
}

/// Intercept plus treatment-coded indicators for `factor`.
///
/// `reference` defaults to the first level in sorted order.
pub fn build_design(metadata: &SampleMetadata, factor: &str, reference: Option<&str>) -> Result<Design> {
    let values = metadata
        .condition(factor)
        .ok_or_else(|| PipelineError::InvalidDesign {
            reason: format!("factor '{}' not found in sample metadata", factor),
        })?;
    let mut levels = metadata.levels(factor)?;
    if levels.len() < 2 {
        return Err(PipelineError::InvalidDesign {
            reason: format!("factor '{}' needs at least two levels, found {:?}", factor, levels),
        });
    }

    let reference = match reference {
        Some(r) => {
            let pos = levels.iter().position(|l| l == r).ok_or_else(|| {
                PipelineError::InvalidDesign {
                    reason: format!("reference level '{}' is not a level of '{}'", r, factor),
                }
            })?;
            levels.remove(pos)
        }
        None => levels.remove(0),
    };
    levels.insert(0, reference.clone());

    let n = values.len();
    let p = levels.len();
    let mut matrix = Array2::zeros((n, p));
    for (i, value) in values.iter().enumerate() {
        matrix[[i, 0]] = 1.0;
        if let Some(j) = levels.iter().skip(1).position(|l| l == value) {
            matrix[[i, j + 1]] = 1.0;
        }
    }

    let mut coef_names = vec!["Intercept".to_string()];
    coef_names.extend(
        levels
            .iter()
            .skip(1)
            .map(|l| format!("{}_{}_vs_{}", factor, l, reference)),
    );

    check_full_rank(&matrix)?;
    Ok(Design {
        matrix,
        info: DesignInfo {
            factor: factor.to_string(),
            reference_level: reference,
            levels,
            coef_names,
        },
    })
}

/// `~1` design over `n` samples (used by blind transforms)
pub fn intercept_only(n: usize) -> Design {
    Design {
        matrix: Array2::ones((n, 1)),
        info: DesignInfo {
            factor: String::new(),
            reference_level: String::new(),
            levels: Vec::new(),
            coef_names: vec!["Intercept".to_string()],
        },
    }
}

/// Error unless the columns of `matrix` are linearly independent
pub fn check_full_rank(matrix: &Array2<f64>) -> Result<()> {
    let (n, p) = matrix.dim();
    if n == 0 || p == 0 {
        return Err(PipelineError::InvalidDesign {
            reason: "design matrix has zero rows or columns".to_string(),
        });
    }
    if (0..p).any(|j| matrix.column(j).iter().all(|&v| v == 0.0)) {
        return Err(PipelineError::InvalidDesign {
            reason: "a level has no samples, leaving a column of zeros".to_string(),
        });
    }

    // modified Gram-Schmidt; a column with no residual norm is dependent
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(p);
    for j in 0..p {
        let mut v = matrix.column(j).to_vec();
        let norm0 = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        for q in &basis {
            let dot: f64 = v.iter().zip(q).map(|(a, b)| a * b).sum();
            v.iter_mut().zip(q).for_each(|(a, b)| *a -= dot * b);
        }
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm <= 1e-10 * norm0.max(1.0) {
            return Err(PipelineError::InvalidDesign {
                reason: "the model matrix is not full rank; a column is a linear combination of others"
                    .to_string(),
            });
        }
        basis.push(v.into_iter().map(|x| x / norm).collect());
    }
    Ok(())
}

/// Contrast vector over coefficients for `numerator` vs `denominator`
pub fn contrast_vector(info: &DesignInfo, numerator: &str, denominator: &str) -> Result<Vec<f64>> {
    if numerator == denominator {
        return Err(PipelineError::InvalidContrast {
            reason: format!("numerator and denominator are both '{}'", numerator),
        });
    }
    for level in [numerator, denominator] {
        if !info.levels.iter().any(|l| l == level) {
            return Err(PipelineError::InvalidContrast {
                reason: format!(
                    "'{}' is not a level of '{}' (levels: {:?})",
                    level, info.factor, info.levels
                ),
            });
        }
    }

    let mut c = vec![0.0; info.n_coefs()];
    if let Some(j) = info.level_column(numerator) {
        c[j] += 1.0;
    }
    if let Some(j) = info.level_column(denominator) {
        c[j] -= 1.0;
    }
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn metadata() -> SampleMetadata {
        let ids: Vec<String> = (1..=6).map(|i| format!("s{}", i)).collect();
        let mut m = SampleMetadata::new(ids);
        m.add_condition(
            "group",
            ["ctrl", "ctrl", "shA", "shA", "shB", "shB"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .unwrap();
        m
    }

    #[test]
    fn test_default_reference_is_first_sorted_level() {
        let d = build_design(&metadata(), "group", None).unwrap();
        assert_eq!(d.info.reference_level, "ctrl");
        assert_eq!(
            d.info.coef_names,
            vec!["Intercept", "group_shA_vs_ctrl", "group_shB_vs_ctrl"]
        );
        assert_eq!(d.matrix.row(2).to_vec(), vec![1.0, 1.0, 0.0]);
        assert!(d.is_cell_means());
        assert_eq!(d.cells(), vec![0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn test_explicit_reference() {
        let d = build_design(&metadata(), "group", Some("shB")).unwrap();
        assert_eq!(d.info.levels, vec!["shB", "ctrl", "shA"]);
        assert_eq!(d.matrix.row(4).to_vec(), vec![1.0, 0.0, 0.0]);
        assert!(build_design(&metadata(), "group", Some("nope")).is_err());
    }

    #[test]
    fn test_contrast_vectors() {
        let d = build_design(&metadata(), "group", None).unwrap();
        assert_eq!(contrast_vector(&d.info, "shA", "ctrl").unwrap(), vec![0.0, 1.0, 0.0]);
        assert_eq!(contrast_vector(&d.info, "ctrl", "shA").unwrap(), vec![0.0, -1.0, 0.0]);
        assert_eq!(contrast_vector(&d.info, "shB", "shA").unwrap(), vec![0.0, -1.0, 1.0]);
        assert!(contrast_vector(&d.info, "shA", "shA").is_err());
        assert!(contrast_vector(&d.info, "shC", "ctrl").is_err());
    }

    #[test]
    fn test_rank_checks() {
        assert!(check_full_rank(&array![[1.0, 0.0], [1.0, 1.0]]).is_ok());
        assert!(check_full_rank(&array![[1.0, 0.0], [1.0, 0.0]]).is_err());
        assert!(check_full_rank(&array![[1.0, 2.0], [1.0, 2.0], [1.0, 2.0]]).is_err());
        let d = intercept_only(4);
        assert!(d.is_cell_means());
        assert!(check_full_rank(&d.matrix).is_ok());
    }
}
