//! Broker connection state machine.
//!
//! Legal transitions are `Connecting -> Ready`, `Ready -> Ended`,
//! `Ended -> Connecting` and `Connecting -> Errored` (the readiness deadline
//! passed). Transport error events are recorded on the state data but never
//! move the machine on their own.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::time::Instant;

use crate::messaging::error::{MessagingError, MessagingResult};

/// The current state of a broker connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connect attempt is in flight. The deadline is only set for the
    /// initial attempt; reconnects are retried without one.
    Connecting { deadline: Option<Instant> },
    /// The transport reported ready
    Ready,
    /// The transport dropped or was closed
    Ended,
    /// The initial connect never became ready
    Errored { last_error: String },
}

impl ConnectionState {
    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connecting { .. } => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Ended => "ended",
            ConnectionState::Errored { .. } => "error",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    fn allows(&self, next: &ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Connecting { .. }, ConnectionState::Ready)
                | (ConnectionState::Ready, ConnectionState::Ended)
                | (ConnectionState::Ended, ConnectionState::Connecting { .. })
                | (ConnectionState::Connecting { .. }, ConnectionState::Errored { .. })
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Record of one state change
#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    pub from: &'static str,
    pub to: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// What an inbound `ready` event meant for the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// First readiness; the pending connect resolves
    Initial,
    /// Readiness after a reconnect
    Reconnected,
    /// Ready arrived in a state that cannot accept it (e.g. after the
    /// connect deadline already failed the attempt)
    Ignored,
}

/// Mutable data tracked for one connection
#[derive(Debug, Clone)]
pub struct StateData {
    state: ConnectionState,
    ever_ready: bool,
    last_error: Option<String>,
    error_count: u64,
    reconnect_count: u64,
    last_state_change: DateTime<Utc>,
}

impl StateData {
    /// Start in `Connecting` with the readiness deadline of the initial attempt
    pub fn connecting(deadline: Instant) -> Self {
        Self {
            state: ConnectionState::Connecting {
                deadline: Some(deadline),
            },
            ever_ready: false,
            last_error: None,
            error_count: 0,
            reconnect_count: 0,
            last_state_change: Utc::now(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count
    }

    pub fn last_state_change(&self) -> DateTime<Utc> {
        self.last_state_change
    }

    /// Move to `next`, rejecting transitions the machine does not allow
    pub fn transition_to(&mut self, next: ConnectionState) -> MessagingResult<StateTransition> {
        if !self.state.allows(&next) {
            return Err(MessagingError::InvalidTransition(format!(
                "{} -> {}",
                self.state, next
            )));
        }

        let transition = StateTransition {
            from: self.state.label(),
            to: next.label(),
            timestamp: Utc::now(),
        };
        self.state = next;
        self.last_state_change = transition.timestamp;
        Ok(transition)
    }

    /// Apply a `ready` event
    pub fn on_ready(&mut self) -> ReadyOutcome {
        if self.transition_to(ConnectionState::Ready).is_err() {
            return ReadyOutcome::Ignored;
        }

        if self.ever_ready {
            ReadyOutcome::Reconnected
        } else {
            self.ever_ready = true;
            ReadyOutcome::Initial
        }
    }

    /// Apply an `end` event. Returns true when the connection had been ready,
    /// i.e. when the reconnect policy owns what happens next.
    pub fn on_end(&mut self) -> bool {
        self.transition_to(ConnectionState::Ended).is_ok()
    }

    /// Enter `Connecting` for a policy-driven reconnect
    pub fn begin_reconnect(&mut self) -> MessagingResult<StateTransition> {
        let transition = self.transition_to(ConnectionState::Connecting { deadline: None })?;
        self.reconnect_count += 1;
        Ok(transition)
    }

    /// The readiness deadline passed without a `ready` event
    pub fn on_timeout(&mut self, reason: String) -> MessagingResult<StateTransition> {
        self.transition_to(ConnectionState::Errored { last_error: reason })
    }

    /// Record a transport error without changing state
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(error.into());
    }

    /// Force the terminal `Ended` state on explicit shutdown
    pub fn shut_down(&mut self) {
        self.state = ConnectionState::Ended;
        self.last_state_change = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fresh() -> StateData {
        StateData::connecting(Instant::now() + Duration::from_secs(5))
    }

    #[test]
    fn test_initial_ready_then_reconnected() {
        let mut data = fresh();
        assert_eq!(data.on_ready(), ReadyOutcome::Initial);
        assert!(data.is_ready());

        assert!(data.on_end());
        assert_eq!(data.state(), &ConnectionState::Ended);

        data.begin_reconnect().unwrap();
        assert_eq!(data.reconnect_count(), 1);
        assert_eq!(data.on_ready(), ReadyOutcome::Reconnected);
    }

    #[test]
    fn test_end_before_ready_is_not_owned_by_reconnect() {
        let mut data = fresh();
        assert!(!data.on_end());
        assert!(matches!(data.state(), ConnectionState::Connecting { .. }));
    }

    #[test]
    fn test_ready_after_timeout_is_ignored() {
        let mut data = fresh();
        data.on_timeout("deadline".to_string()).unwrap();
        assert_eq!(data.state().label(), "error");
        assert_eq!(data.on_ready(), ReadyOutcome::Ignored);
        assert!(!data.is_ready());
    }

    #[test]
    fn test_errors_do_not_transition() {
        let mut data = fresh();
        data.on_ready();
        data.record_error("socket reset");
        data.record_error("socket reset again");
        assert!(data.is_ready());
        assert_eq!(data.error_count(), 2);
        assert_eq!(data.last_error(), Some("socket reset again"));
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut data = fresh();
        let err = data.transition_to(ConnectionState::Ended).unwrap_err();
        assert!(matches!(err, MessagingError::InvalidTransition(_)));
        assert!(data.begin_reconnect().is_err());
    }
}
