//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("graph store error: {0}")]
    Graph(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("ingestion error: {0}")]
    Ingest(String),

    #[error("conversation error: {0}")]
    Conversation(String),

    #[error("rejected input: {0}")]
    Rejected(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
