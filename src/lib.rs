//! Price history tracking and price-drop scoring.
//!
//! Raw dated prices are cleaned into a small feature vector (`stats`), and a
//! random forest (`forest`) behind a fitted scaler (`estimator`) turns that
//! vector into a 0-100 drop-probability score.

pub mod alerts;
pub mod config;
pub mod error;
pub mod estimator;
pub mod forest;
pub mod loader;
pub mod model;
pub mod scaler;
pub mod stats;

pub use error::{Error, Result};
pub use estimator::{Estimator, TrainingReport};
pub use model::{CleanedRow, FeatureVector, Prediction, ProductPriceSeries, RawPrice, TrainingRow};
pub use stats::{clean_price, features_from_history, preprocess, training_rows};
