//! Drop-probability estimator: a scaler and a random forest fitted together.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::forest::{ForestConfig, RandomForest};
use crate::model::{FeatureVector, Prediction, TrainingRow, FEATURE_COUNT, FEATURE_NAMES};
use crate::scaler::StandardScaler;

const SPLIT_SEED: u64 = 42;
const MODEL_SEED: u64 = 42;
const TEST_FRACTION: f64 = 0.2;

/// Fewer rows than this can never be fitted, whatever the configuration says.
pub const MIN_TRAINING_ROWS: usize = 2;

/// Row count below which a fresh estimator refuses to train.
pub const DEFAULT_MIN_TRAINING_ROWS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FittedPipeline {
    features: Vec<String>,
    scaler: StandardScaler,
    forest: RandomForest,
}

impl FittedPipeline {
    fn raw_predict(&self, features: &FeatureVector) -> f64 {
        let scaled = self.scaler.transform(&features.to_array());
        self.forest.predict(&scaled)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub train_rows: usize,
    pub test_rows: usize,
    /// Held-out R². None when the held-out labels have no variance.
    pub r2: Option<f64>,
    /// Mean absolute gap between the model score and the label formula on held-out rows.
    pub formula_mae: Option<f64>,
    pub feature_importances: [f64; FEATURE_COUNT],
}

pub struct Estimator {
    config: ForestConfig,
    min_rows: usize,
    fitted: RwLock<Option<Arc<FittedPipeline>>>,
}

impl Default for Estimator {
    fn default() -> Self {
        Estimator::new(ForestConfig::default())
    }
}

impl Estimator {
    pub fn new(config: ForestConfig) -> Self {
        Estimator {
            config,
            min_rows: DEFAULT_MIN_TRAINING_ROWS,
            fitted: RwLock::new(None),
        }
    }

    pub fn with_min_rows(mut self, min_rows: usize) -> Self {
        self.min_rows = min_rows.max(MIN_TRAINING_ROWS);
        self
    }

    pub fn is_trained(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Arc<FittedPipeline>> {
        self.fitted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, pipeline: FittedPipeline) {
        let mut slot = self.fitted.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(pipeline));
    }

    /// Fit a fresh scaler and forest, then swap them in together.
    ///
    /// On error the previous state (trained or not) is left untouched.
    pub fn fit(&self, rows: &[TrainingRow]) -> Result<TrainingReport> {
        if rows.len() < self.min_rows {
            return Err(Error::DegenerateTraining {
                rows: rows.len(),
                required: self.min_rows,
            });
        }

        let (train_idx, test_idx) = split_indices(rows.len());

        let train_x: Vec<[f64; FEATURE_COUNT]> =
            train_idx.iter().map(|&i| rows[i].features.to_array()).collect();
        let train_y: Vec<f64> = train_idx.iter().map(|&i| rows[i].price_drop_prob).collect();

        let scaler = StandardScaler::fit(&train_x).ok_or(Error::DegenerateTraining {
            rows: train_x.len(),
            required: 1,
        })?;
        let scaled: Vec<[f64; FEATURE_COUNT]> = train_x.iter().map(|r| scaler.transform(r)).collect();

        let forest = RandomForest::fit(&self.config, &scaled, &train_y, MODEL_SEED).ok_or(
            Error::DegenerateTraining {
                rows: scaled.len(),
                required: 1,
            },
        )?;

        let pipeline = FittedPipeline {
            features: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            scaler,
            forest,
        };

        let held_out: Vec<&TrainingRow> = test_idx.iter().map(|&i| &rows[i]).collect();
        let report = TrainingReport {
            train_rows: train_idx.len(),
            test_rows: held_out.len(),
            r2: r2_score(&pipeline, &held_out),
            formula_mae: formula_mae(&pipeline, &held_out),
            feature_importances: *pipeline.forest.feature_importances(),
        };

        self.install(pipeline);

        match report.r2 {
            Some(r2) => info!(
                train = report.train_rows,
                test = report.test_rows,
                "model trained, held-out R^2 {:.4}",
                r2
            ),
            None => info!(
                train = report.train_rows,
                test = report.test_rows,
                "model trained, held-out R^2 undefined"
            ),
        }

        Ok(report)
    }

    /// Score a feature vector, or `Unavailable` if nothing has been fitted yet.
    pub fn predict(&self, features: &FeatureVector) -> Prediction {
        match self.current() {
            Some(pipeline) => to_score(pipeline.raw_predict(features)),
            None => Prediction::Unavailable,
        }
    }

    /// Write the fitted scaler and forest as one JSON document.
    pub fn save(&self, path: &Path) -> Result<()> {
        let pipeline = self.current().ok_or(Error::Untrained)?;
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, pipeline.as_ref())?;
        Ok(())
    }

    pub fn load(path: &Path, config: ForestConfig) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let pipeline: FittedPipeline = serde_json::from_reader(reader)?;

        if pipeline.features != FEATURE_NAMES {
            warn!(saved = ?pipeline.features, "saved model uses a different feature order");
            return Err(Error::Config(format!(
                "model at {} was trained on features {:?}, expected {:?}",
                path.display(),
                pipeline.features,
                FEATURE_NAMES
            )));
        }

        let estimator = Estimator::new(config);
        estimator.install(pipeline);
        Ok(estimator)
    }
}

/// Seeded shuffle, then hold out a fifth of the rows (at least one row stays in training).
fn split_indices(n: usize) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(SPLIT_SEED);
    indices.shuffle(&mut rng);

    let test_size = ((n as f64 * TEST_FRACTION).ceil() as usize).min(n.saturating_sub(1));
    let (test, train) = indices.split_at(test_size);
    (train.to_vec(), test.to_vec())
}

/// Truncate, then clamp into [0, 100].
fn to_score(raw: f64) -> Prediction {
    if raw.is_nan() {
        return Prediction::Unavailable;
    }
    Prediction::Score(raw.trunc().clamp(0.0, 100.0) as u8)
}

fn r2_score(pipeline: &FittedPipeline, rows: &[&TrainingRow]) -> Option<f64> {
    if rows.is_empty() {
        return None;
    }
    let n = rows.len() as f64;
    let mean = rows.iter().map(|r| r.price_drop_prob).sum::<f64>() / n;

    let ss_tot: f64 = rows.iter().map(|r| (r.price_drop_prob - mean).powi(2)).sum();
    if ss_tot <= f64::EPSILON {
        return None;
    }
    let ss_res: f64 = rows
        .iter()
        .map(|r| (r.price_drop_prob - pipeline.raw_predict(&r.features)).powi(2))
        .sum();

    Some(1.0 - ss_res / ss_tot)
}

fn formula_mae(pipeline: &FittedPipeline, rows: &[&TrainingRow]) -> Option<f64> {
    if rows.is_empty() {
        return None;
    }
    let total: f64 = rows
        .iter()
        .map(|r| {
            let score = to_score(pipeline.raw_predict(&r.features)).score().unwrap_or(0);
            (f64::from(score) - r.features.drop_label()).abs()
        })
        .sum();
    Some(total / rows.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<TrainingRow> {
        (0..n)
            .map(|i| {
                let price_change = (i % 10) as f64 * 0.04;
                let features = FeatureVector {
                    price_std: 5.0 + i as f64 * 3.0,
                    price_change,
                };
                TrainingRow {
                    features,
                    price_drop_prob: features.drop_label(),
                }
            })
            .collect()
    }

    fn small_forest() -> ForestConfig {
        ForestConfig {
            n_trees: 10,
            ..Default::default()
        }
    }

    #[test]
    fn untrained_predicts_unavailable() {
        let estimator = Estimator::default();
        assert!(!estimator.is_trained());
        let features = FeatureVector { price_std: 10.0, price_change: 0.2 };
        assert_eq!(estimator.predict(&features), Prediction::Unavailable);
    }

    #[test]
    fn degenerate_input_is_rejected() {
        let estimator = Estimator::new(small_forest());
        assert!(matches!(
            estimator.fit(&[]),
            Err(Error::DegenerateTraining { rows: 0, .. })
        ));
        assert!(matches!(
            estimator.fit(&rows(1)),
            Err(Error::DegenerateTraining { rows: 1, .. })
        ));
        assert!(!estimator.is_trained());
    }

    #[test]
    fn configured_minimum_applies() {
        let estimator = Estimator::new(small_forest()).with_min_rows(10);
        assert!(estimator.fit(&rows(9)).is_err());
        assert!(estimator.fit(&rows(10)).is_ok());

        let floor = Estimator::new(small_forest()).with_min_rows(0);
        assert!(floor.fit(&rows(1)).is_err());
        assert!(floor.fit(&rows(2)).is_ok());
    }

    #[test]
    fn default_minimum_is_ten_rows() {
        let estimator = Estimator::new(small_forest());
        assert!(matches!(
            estimator.fit(&rows(9)),
            Err(Error::DegenerateTraining { rows: 9, required: DEFAULT_MIN_TRAINING_ROWS })
        ));
        assert!(!estimator.is_trained());
        assert!(estimator.fit(&rows(10)).is_ok());
    }

    #[test]
    fn split_holds_out_a_fifth() {
        let (train, test) = split_indices(10);
        assert_eq!((train.len(), test.len()), (8, 2));

        let (train, test) = split_indices(2);
        assert_eq!((train.len(), test.len()), (1, 1));

        assert_eq!(split_indices(10), split_indices(10));
    }

    #[test]
    fn scores_are_clamped() {
        assert_eq!(to_score(-12.0), Prediction::Score(0));
        assert_eq!(to_score(250.0), Prediction::Score(100));
        assert_eq!(to_score(33.9), Prediction::Score(33));
        assert_eq!(to_score(f64::NAN), Prediction::Unavailable);
    }

    #[test]
    fn trained_scores_stay_in_range() {
        let estimator = Estimator::new(small_forest());
        let report = estimator.fit(&rows(40)).unwrap();
        assert_eq!(report.train_rows + report.test_rows, 40);
        assert_eq!(report.test_rows, 8);

        for (std, change) in [(0.0, 0.0), (1e9, 1.0), (-1e9, -5.0), (f64::MAX, f64::MIN)] {
            let features = FeatureVector { price_std: std, price_change: change };
            let score = estimator.predict(&features).score().unwrap();
            assert!(score <= 100);
        }
    }

    #[test]
    fn model_tracks_label_formula() {
        let estimator = Estimator::new(small_forest());
        let report = estimator.fit(&rows(200)).unwrap();
        let mae = report.formula_mae.unwrap();
        assert!(mae < 10.0, "formula mae {}", mae);
    }

    #[test]
    fn failed_refit_keeps_previous_model() {
        let estimator = Estimator::new(small_forest());
        estimator.fit(&rows(30)).unwrap();
        let features = FeatureVector { price_std: 20.0, price_change: 0.3 };
        let before = estimator.predict(&features);

        assert!(estimator.fit(&[]).is_err());
        assert_eq!(estimator.predict(&features), before);
    }

    #[test]
    fn save_and_load_keep_scores() {
        let estimator = Estimator::new(small_forest());
        estimator.fit(&rows(30)).unwrap();

        let path = std::env::temp_dir().join(format!("trackit-model-{}.json", std::process::id()));
        estimator.save(&path).unwrap();
        let loaded = Estimator::load(&path, small_forest()).unwrap();
        std::fs::remove_file(&path).ok();

        for row in rows(30) {
            assert_eq!(estimator.predict(&row.features), loaded.predict(&row.features));
        }
    }

    #[test]
    fn reloaded_model_saves_identical_json() {
        let estimator = Estimator::new(small_forest());
        estimator.fit(&rows(30)).unwrap();

        let dir = std::env::temp_dir();
        let first = dir.join(format!("trackit-first-{}.json", std::process::id()));
        let second = dir.join(format!("trackit-second-{}.json", std::process::id()));

        estimator.save(&first).unwrap();
        Estimator::load(&first, small_forest()).unwrap().save(&second).unwrap();

        let a = std::fs::read(&first).unwrap();
        let b = std::fs::read(&second).unwrap();
        std::fs::remove_file(&first).ok();
        std::fs::remove_file(&second).ok();
        assert!(a == b, "thresholds or scaler moved after reload");
    }

    #[test]
    fn saving_untrained_fails() {
        let path = std::env::temp_dir().join("trackit-untrained.json");
        assert!(matches!(Estimator::default().save(&path), Err(Error::Untrained)));
    }
}
