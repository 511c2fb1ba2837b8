//! Application error types

use chrono::NaiveDate;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Terminal upstream failure, after the retry budget is exhausted.
    #[error("API request {endpoint} failed after {attempts} attempt(s): {reason}")]
    Api {
        endpoint: String,
        attempts: u32,
        reason: String,
    },

    /// A range ingestion aborted on a specific entity and date. Dates before
    /// this one in the range are already durable; later ones were not touched.
    #[error("Ingestion of {symbol} {kind} for {date} failed: {source}")]
    Ingest {
        symbol: String,
        kind: &'static str,
        date: NaiveDate,
        #[source]
        source: Box<AppError>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Generated data failed a quality gate (NaN/inf values, duplicate
    /// column names). Fatal by design: corrupt derived data must never
    /// reach the presence index.
    #[error("Data quality error: {0}")]
    DataQuality(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
