//! Harness error types

use shared::{Component, SharedError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Unable to connect to {endpoint}: {message}")]
    Connectivity { endpoint: String, message: String },

    #[error("Topic provisioning failed for '{topic}': {message}")]
    Provisioning { topic: String, message: String },

    #[error("{component} lifecycle failure: {message}")]
    Lifecycle { component: Component, message: String },

    #[error("Operation '{operation}' not allowed in state {state}")]
    InvalidState { operation: String, state: String },

    #[error("Configuration error: {field}")]
    Configuration { field: String },

    #[error("Teardown finished with {} failure(s): {}", failures.len(), failures.join("; "))]
    Teardown { failures: Vec<String> },

    #[error("Shared component error: {0}")]
    Shared(#[from] SharedError),

    #[error("Kafka client error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    pub fn connectivity(endpoint: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Connectivity {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn provisioning(topic: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Provisioning {
            topic: topic.into(),
            message: message.to_string(),
        }
    }

    pub fn lifecycle(component: Component, message: impl std::fmt::Display) -> Self {
        Self::Lifecycle {
            component,
            message: message.to_string(),
        }
    }

    pub fn config(field: impl Into<String>) -> Self {
        Self::Configuration { field: field.into() }
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
