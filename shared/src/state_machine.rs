//! Request State Machine
//!
//! Lifecycle of a blocking request for one command kind. Requests and
//! responses carry no sequence number, so correlation is by kind and each
//! kind has at most one request in flight.

use crate::command::CommandId;

/// Command kinds that the device answers with a response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    DeviceInfo,
    DeviceStats,
}

impl RequestKind {
    /// The kind a response frame resolves, if any
    pub fn from_command_id(id: CommandId) -> Option<Self> {
        match id {
            CommandId::DeviceInfoRead => Some(RequestKind::DeviceInfo),
            CommandId::DeviceStatsRead => Some(RequestKind::DeviceStats),
            _ => None,
        }
    }

    /// Opcode used for both the request and its response
    pub fn command_id(self) -> CommandId {
        match self {
            RequestKind::DeviceInfo => CommandId::DeviceInfoRead,
            RequestKind::DeviceStats => CommandId::DeviceStatsRead,
        }
    }
}

/// Where a request slot currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    #[default]
    Idle,
    AwaitingResponse,
    Resolved,
    TimedOut,
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestEvent {
    /// Caller issued a request
    Issued,
    /// Matching response frame decoded
    ResponseReceived,
    /// Deadline passed with no response
    DeadlineElapsed,
    /// Caller took the result, or gave up after a timeout
    Released,
    /// Waiter vanished or the request was never sent
    Abandoned,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(RequestState),
    /// Transition was invalid from current state
    Invalid { from: RequestState, event: RequestEvent },
}

impl TransitionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionResult::Success(_))
    }
}

/// State of a single request slot
#[derive(Debug, Default)]
pub struct RequestStateMachine {
    current_state: RequestState,
}

impl RequestStateMachine {
    /// Create a new state machine in Idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> RequestState {
        self.current_state
    }

    /// Whether a response frame for this kind would be accepted now
    pub fn is_awaiting(&self) -> bool {
        self.current_state == RequestState::AwaitingResponse
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: RequestEvent) -> TransitionResult {
        match self.get_next_state(event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    fn get_next_state(&self, event: RequestEvent) -> Option<RequestState> {
        use RequestEvent::*;
        use RequestState::*;

        match (self.current_state, event) {
            (Idle, Issued) => Some(AwaitingResponse),

            (AwaitingResponse, ResponseReceived) => Some(Resolved),
            (AwaitingResponse, DeadlineElapsed) => Some(TimedOut),

            (Resolved | TimedOut, Released) => Some(Idle),

            // Abandonment resets from anywhere but Idle
            (AwaitingResponse | Resolved | TimedOut, Abandoned) => Some(Idle),

            _ => None,
        }
    }
}
