use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::estimator::{DEFAULT_MIN_TRAINING_ROWS, MIN_TRAINING_ROWS};
use crate::forest::ForestConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file holding the price tables
    pub database: String,
    /// Price tables, one per retailer
    pub tables: Vec<String>,
    /// Refuse to train on fewer rows than this
    pub min_training_rows: usize,
    pub forest: ForestConfig,
    /// Drops scored below this are not notified
    pub notify_min_score: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: "databases_price_history.db".to_string(),
            tables: vec!["amazon_data".to_string(), "flipkart_data".to_string()],
            min_training_rows: DEFAULT_MIN_TRAINING_ROWS,
            forest: ForestConfig::default(),
            notify_min_score: 0,
        }
    }
}

impl Config {
    /// Read a JSON config; missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tables.is_empty() {
            return Err(Error::Config("at least one price table is required".into()));
        }
        if self.min_training_rows < MIN_TRAINING_ROWS {
            return Err(Error::Config(format!(
                "min_training_rows must be at least {}",
                MIN_TRAINING_ROWS
            )));
        }
        if self.forest.n_trees == 0 || self.forest.max_depth == 0 {
            return Err(Error::Config("forest needs at least one tree of depth >= 1".into()));
        }
        if self.notify_min_score > 100 {
            return Err(Error::Config("notify_min_score is a percentage (0-100)".into()));
        }
        Ok(())
    }

    pub fn primary_table(&self) -> &str {
        self.tables.first().map(String::as_str).unwrap_or("amazon_data")
    }
}
