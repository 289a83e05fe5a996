//! Shared types for the bridge test harness
//!
//! Identities, certificate material, the bridge configuration record and the
//! logging conventions used by every harness component.

pub mod bridge_conf;
pub mod errors;
pub mod logging;
pub mod tls;
pub mod types;

pub use bridge_conf::{BridgeConfig, ConnectorConfig, HttpConfig, LoggingConfig, NatsConfig, StreamingConfig, TlsConf};
pub use errors::*;
pub use tls::TlsMaterial;
pub use types::*;
