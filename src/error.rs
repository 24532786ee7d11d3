// ⚠️ Error Taxonomy - fatal reference-data failures vs. caller mistakes
//
// DataLoad          → snapshot missing or malformed, nothing can be computed
// InvalidParameter  → caller passed bad trials / geography, fix and retry
//
// An industry that cannot be mapped is NOT an error: it is logged and left
// out of the output.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FootprintError {
    #[error("Data load error: {0}")]
    DataLoad(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FootprintError {
    pub fn data_load(message: impl Into<String>) -> Self {
        FootprintError::DataLoad(message.into())
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        FootprintError::InvalidParameter(message.into())
    }

    /// True when the process cannot do useful work until reference data is fixed
    pub fn is_fatal(&self) -> bool {
        matches!(self, FootprintError::DataLoad(_))
    }
}

pub type Result<T> = std::result::Result<T, FootprintError>;
