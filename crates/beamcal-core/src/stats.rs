use serde::{Deserialize, Serialize};

/// Summary of a list of per-observation residuals.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResidualStats {
    pub count: usize,
    pub mean: f64,
    pub rms: f64,
    pub max: f64,
}

impl ResidualStats {
    /// Non-finite values are skipped.
    pub fn from_values(values: &[f64]) -> Self {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return Self::default();
        }
        let n = finite.len() as f64;
        Self {
            count: finite.len(),
            mean: finite.iter().sum::<f64>() / n,
            rms: (finite.iter().map(|v| v * v).sum::<f64>() / n).sqrt(),
            max: finite.iter().copied().fold(0.0, f64::max),
        }
    }
}

/// Root mean square of a residual vector, zero when empty.
pub fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn stats_skip_non_finite() {
        let s = ResidualStats::from_values(&[3.0, 4.0, f64::NAN]);
        assert_eq!(s.count, 2);
        assert_relative_eq!(s.mean, 3.5);
        assert_relative_eq!(s.rms, 12.5f64.sqrt());
        assert_relative_eq!(s.max, 4.0);
        assert_eq!(rms(&[]), 0.0);
    }
}
