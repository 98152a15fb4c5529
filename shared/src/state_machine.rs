//! Link State Machine
//!
//! Defines the valid lifecycle transitions of a single serial-profile link.

use crate::now_ms;
use std::fmt;

/// Lifecycle state of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No attempt in flight and no live session
    #[default]
    Disconnected,
    /// A connect attempt is running
    Connecting,
    /// A session owns a live socket
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Caller asked for a new connection (preempts whatever came before)
    ConnectRequested,
    /// The connect handshake produced an open socket
    SocketConnected,
    /// Both connect strategies failed
    SocketFailed,
    /// The session's stream failed or hit EOF
    StreamLost,
    /// Caller asked to tear everything down
    DisconnectRequested,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and the machine is now in this state
    Success(LinkState),
    /// Transition was invalid from current state
    Invalid { from: LinkState, event: LinkEvent },
}

impl TransitionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionResult::Success(_))
    }
}

/// The lifecycle state machine for one link
#[derive(Debug)]
pub struct LinkStateMachine {
    current_state: LinkState,
    entered_at_ms: u64,
}

impl Default for LinkStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self {
            current_state: LinkState::Disconnected,
            entered_at_ms: now_ms(),
        }
    }

    /// Get current state
    pub fn state(&self) -> LinkState {
        self.current_state
    }

    /// Wall-clock time the current state was entered
    pub fn entered_at_ms(&self) -> u64 {
        self.entered_at_ms
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent) -> TransitionResult {
        match self.next_state(event) {
            Some(state) => {
                if state != self.current_state {
                    self.entered_at_ms = now_ms();
                }
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    /// Get the next state for a given event, if the transition is valid
    fn next_state(&self, event: LinkEvent) -> Option<LinkState> {
        use LinkEvent::*;
        use LinkState::*;

        match (self.current_state, event) {
            // A new request always preempts the previous attempt or session
            (_, ConnectRequested) => Some(Connecting),

            // Handshake outcomes only count while an attempt is live
            (Connecting, SocketConnected) => Some(Connected),
            (Connecting, SocketFailed) => Some(Disconnected),

            (Connected, StreamLost) => Some(Disconnected),

            // Disconnect is idempotent
            (_, DisconnectRequested) => Some(Disconnected),

            _ => None,
        }
    }
}
