//! Shared error types for the bridge test harness

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Invalid {kind}: {input}")]
    InvalidIdentity { kind: String, input: String },

    #[error("TLS material missing: {path}")]
    MissingTlsFile { path: String },

    #[error("Serialization failed: {message}")]
    SerializationError { message: String },
}

pub type SharedResult<T> = Result<T, SharedError>;
