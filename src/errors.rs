//! Centralised error type for the API, the loader and the exporter.

use hyper::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("Invalid parameter: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("CSV error at line {line}: {source}")]
    Csv {
        line: u64,
        #[source]
        source: csv::Error,
    },

    #[error("I/O error on {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("Spreadsheet error: {0}")]
    Export(#[from] rust_xlsxwriter::XlsxError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Response error: {0}")]
    Response(#[from] hyper::http::Error),

    #[error("HTTP server error: {0}")]
    Http(#[from] hyper::Error),
}

impl AppError {
    /// HTTP status the router answers with for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True when the store could not be reached at all, as opposed to a
    /// query or data problem. Only these errors are retried by the startup gate.
    pub fn is_store_unavailable(&self) -> bool {
        match self {
            AppError::Db(e) => is_connect_error(e),
            AppError::Migrate(sqlx::migrate::MigrateError::Execute(e)) => is_connect_error(e),
            _ => false,
        }
    }
}

fn is_connect_error(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut
    )
}
