//! Environment lifecycle state machine
//!
//! ```text
//! Uninitialized -> InfrastructureUp -> BridgeUp -> Closed
//!                        ^   |             |
//!                        |   +-- restart --+
//!                        +---- stop bridge-+
//! ```
//! `Closed` is reachable from every state and absorbs repeated closes.

use std::fmt;

use crate::error::{HarnessError, HarnessResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentState {
    Uninitialized,
    InfrastructureUp,
    BridgeUp,
    Closed,
}

/// Lifecycle events applied to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    InfrastructureStarted,
    BridgeStarted,
    BridgeStopped,
    StreamingRestarted,
    Closed,
}

impl StateEvent {
    fn operation(&self) -> &'static str {
        match self {
            StateEvent::InfrastructureStarted => "start_infrastructure",
            StateEvent::BridgeStarted => "start_bridge",
            StateEvent::BridgeStopped => "stop_bridge",
            StateEvent::StreamingRestarted => "restart_streaming",
            StateEvent::Closed => "close",
        }
    }
}

impl EnvironmentState {
    /// Next state, or `InvalidState` when the event is not allowed here
    pub fn apply(self, event: StateEvent) -> HarnessResult<EnvironmentState> {
        use EnvironmentState::*;

        let next = match (self, event) {
            (_, StateEvent::Closed) => Some(Closed),
            (Uninitialized, StateEvent::InfrastructureStarted) => Some(InfrastructureUp),
            (InfrastructureUp, StateEvent::BridgeStarted) => Some(BridgeUp),
            (BridgeUp, StateEvent::BridgeStopped) => Some(InfrastructureUp),
            (InfrastructureUp, StateEvent::BridgeStopped) => Some(InfrastructureUp),
            // Restarting streaming keeps the bridge running
            (InfrastructureUp, StateEvent::StreamingRestarted) => Some(InfrastructureUp),
            (BridgeUp, StateEvent::StreamingRestarted) => Some(BridgeUp),
            _ => None,
        };

        next.ok_or_else(|| HarnessError::InvalidState {
            operation: event.operation().to_string(),
            state: self.to_string(),
        })
    }

    /// Check an event without applying it
    pub fn ensure(self, event: StateEvent) -> HarnessResult<()> {
        self.apply(event).map(|_| ())
    }

    pub fn is_infrastructure_up(&self) -> bool {
        matches!(self, EnvironmentState::InfrastructureUp | EnvironmentState::BridgeUp)
    }
}

impl fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnvironmentState::Uninitialized => "Uninitialized",
            EnvironmentState::InfrastructureUp => "InfrastructureUp",
            EnvironmentState::BridgeUp => "BridgeUp",
            EnvironmentState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EnvironmentState::*;

    #[test]
    fn test_happy_path() {
        let state = Uninitialized
            .apply(StateEvent::InfrastructureStarted)
            .and_then(|s| s.apply(StateEvent::BridgeStarted))
            .and_then(|s| s.apply(StateEvent::Closed))
            .unwrap();
        assert_eq!(state, Closed);
    }

    #[test]
    fn test_restart_keeps_bridge_state() {
        assert_eq!(BridgeUp.apply(StateEvent::StreamingRestarted).unwrap(), BridgeUp);
        assert_eq!(
            InfrastructureUp.apply(StateEvent::StreamingRestarted).unwrap(),
            InfrastructureUp
        );
    }

    #[test]
    fn test_restart_requires_infrastructure() {
        let err = Uninitialized.apply(StateEvent::StreamingRestarted).unwrap_err();
        assert!(err.to_string().contains("restart_streaming"));
        assert!(Closed.apply(StateEvent::StreamingRestarted).is_err());
    }

    #[test]
    fn test_bridge_requires_infrastructure() {
        assert!(Uninitialized.apply(StateEvent::BridgeStarted).is_err());
        assert!(BridgeUp.apply(StateEvent::BridgeStarted).is_err());
    }

    #[test]
    fn test_close_from_any_state() {
        for state in [Uninitialized, InfrastructureUp, BridgeUp, Closed] {
            assert_eq!(state.apply(StateEvent::Closed).unwrap(), Closed);
        }
    }

    #[test]
    fn test_no_restart_after_close() {
        assert!(Closed.apply(StateEvent::InfrastructureStarted).is_err());
        assert!(!Closed.is_infrastructure_up());
        assert!(BridgeUp.is_infrastructure_up());
    }
}
