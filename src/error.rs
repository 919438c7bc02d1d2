/// Error types for the crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid table name: {0:?}")]
    InvalidTable(String),

    #[error("Insufficient price history: {valid} valid price(s), need at least 2")]
    InsufficientHistory { valid: usize },

    #[error("Cannot train on {rows} row(s), need at least {required}")]
    DegenerateTraining { rows: usize, required: usize },

    #[error("Estimator has not been trained")]
    Untrained,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
