//! Service implementations
//!
//! Everything that talks to a real backend: the queue broker client, the
//! streaming cluster and its bypass client, child processes, and the adapter
//! that drives the bridge under test.

pub mod bridge_adapter;
pub mod kafka;
pub mod process;
pub mod stan;
pub mod streaming;

pub use bridge_adapter::{build_config, BridgeAdapter, BridgeEndpoints};
pub use kafka::{KafkaClient, KafkaReader, KafkaRecord};
pub use process::ManagedProcess;
pub use stan::{StartPosition, StreamingConnection, StreamingMessage, StreamingOptions, StreamingSubscription};
pub use streaming::StreamingCluster;
