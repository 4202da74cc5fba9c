use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProdflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] crate::pipeline::OrchestratorError),

    #[error("Task source error: {0}")]
    Source(#[from] crate::source::SourceError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid pattern '{name}': {reason}")]
    InvalidPattern { name: String, reason: String },

    #[error("Missing credential: environment variable '{0}' is not set")]
    MissingCredential(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Timed out waiting for a worker result")]
    ResultTimeout,
}

pub type Result<T> = std::result::Result<T, ProdflowError>;
