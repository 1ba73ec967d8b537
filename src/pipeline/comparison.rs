//! Named two-level comparisons and their canonical orientation

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comparison {
    pub factor: String,
    pub numerator: String,
    pub denominator: String,
}

impl Comparison {
    pub fn new(factor: &str, numerator: &str, denominator: &str) -> Self {
        Self {
            factor: factor.to_string(),
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        }
    }

    /// `<numerator>_vs_<denominator>`
    pub fn name(&self) -> String {
        format!("{}_vs_{}", self.numerator, self.denominator)
    }

    pub fn reversed(&self) -> Self {
        Self::new(&self.factor, &self.denominator, &self.numerator)
    }

    /// The orientation that is actually fitted: `control` is always the
    /// denominator, otherwise the lexically smaller level is
    pub fn canonical(&self, control: &str) -> Self {
        let swap = if self.numerator == control {
            true
        } else if self.denominator == control {
            false
        } else {
            self.numerator < self.denominator
        };
        if swap {
            self.reversed()
        } else {
            self.clone()
        }
    }

    pub fn is_reversed(&self, control: &str) -> bool {
        self.canonical(control) != *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_orientation() {
        let c = Comparison::new("group", "shA", "control");
        assert_eq!(c.canonical("control"), c);
        assert!(!c.is_reversed("control"));

        let r = Comparison::new("group", "control", "shA");
        assert_eq!(r.canonical("control"), c);
        assert!(r.is_reversed("control"));

        let between = Comparison::new("group", "shB", "shA");
        assert_eq!(between.canonical("control"), between);
        assert_eq!(between.reversed().canonical("control"), between);
        assert_eq!(between.name(), "shB_vs_shA");
    }
}
