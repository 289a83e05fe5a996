//! Integration-test harness for the streaming/queue-broker bridge
//!
//! Stands up a disposable topology (queue broker topics, a pub/sub broker with a
//! durable streaming server on top, and the bridge under test), gives tests
//! bypass access to every backend, and polls the bridge's request counter so
//! synchronous test code can wait on asynchronous relaying.

pub mod config;
pub mod core;
pub mod environment;
pub mod error;
pub mod services;
pub mod traits;

// Re-export commonly used types
pub use config::{BridgeLogLevel, HarnessConfig, HarnessConfigBuilder};
pub use core::{collect_topics, CompletionWaiter, EnvironmentState, Teardown};
pub use environment::Environment;
pub use error::{HarnessError, HarnessResult};
pub use services::{KafkaClient, KafkaReader, KafkaRecord, StartPosition, StreamingConnection, StreamingMessage};
pub use traits::{Bridge, BridgeStats, RequestCounter};
