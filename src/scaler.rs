use serde::{Deserialize, Serialize};

use crate::model::FEATURE_COUNT;

/// Per-feature z-score normalization, fitted once and applied to every input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: [f64; FEATURE_COUNT],
    scale: [f64; FEATURE_COUNT],
}

impl StandardScaler {
    /// Fit on the given rows. Returns None for an empty sample.
    ///
    /// Uses the population variance; features with no variance keep a scale
    /// of 1 so they are only centered.
    pub fn fit(rows: &[[f64; FEATURE_COUNT]]) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }
        let n = rows.len() as f64;

        let mut mean = [0.0; FEATURE_COUNT];
        let mut scale = [1.0; FEATURE_COUNT];

        for j in 0..FEATURE_COUNT {
            let m = rows.iter().map(|r| r[j]).sum::<f64>() / n;
            let variance = rows.iter().map(|r| (r[j] - m).powi(2)).sum::<f64>() / n;
            let std = variance.sqrt();

            mean[j] = m;
            if std > 1e-12 {
                scale[j] = std;
            }
        }

        Some(StandardScaler { mean, scale })
    }

    pub fn transform(&self, row: &[f64; FEATURE_COUNT]) -> [f64; FEATURE_COUNT] {
        let mut out = [0.0; FEATURE_COUNT];
        for j in 0..FEATURE_COUNT {
            out[j] = (row[j] - self.mean[j]) / self.scale[j];
        }
        out
    }

    pub fn mean(&self) -> &[f64; FEATURE_COUNT] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64; FEATURE_COUNT] {
        &self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fitted_rows_are_centered_and_unit_variance() {
        let rows = vec![[10.0, 0.1], [20.0, 0.2], [30.0, 0.3], [40.0, 0.4]];
        let scaler = StandardScaler::fit(&rows).unwrap();
        assert_eq!(scaler.mean()[0], 25.0);
        assert!((scaler.mean()[1] - 0.25).abs() < 1e-12);
        let scaled: Vec<_> = rows.iter().map(|r| scaler.transform(r)).collect();

        for j in 0..FEATURE_COUNT {
            let mean = scaled.iter().map(|r| r[j]).sum::<f64>() / 4.0;
            let var = scaled.iter().map(|r| (r[j] - mean).powi(2)).sum::<f64>() / 4.0;
            assert!(mean.abs() < 1e-9);
            assert!((var - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn constant_feature_is_only_centered() {
        let rows = vec![[5.0, 1.0], [5.0, 3.0]];
        let scaler = StandardScaler::fit(&rows).unwrap();
        assert_eq!(scaler.scale()[0], 1.0);
        assert_eq!(scaler.transform(&[7.0, 2.0])[0], 2.0);
    }

    #[test]
    fn empty_sample_does_not_fit() {
        assert!(StandardScaler::fit(&[]).is_none());
    }
}
