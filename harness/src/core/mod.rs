//! Core harness logic with no backend I/O

pub mod state;
pub mod teardown;
pub mod topics;
pub mod waiter;

pub use state::{EnvironmentState, StateEvent};
pub use teardown::Teardown;
pub use topics::{collect_topics, topic_set};
pub use waiter::CompletionWaiter;
