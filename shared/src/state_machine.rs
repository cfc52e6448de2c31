//! Realtime Link State Machine
//!
//! Defines the connection lifecycle and the bounded reconnection policy:
//! `disconnected -> connecting -> connected -> disconnected`, with automatic
//! `connected -> connecting -> connected` cycles until attempts run out.

use crate::tracking;

/// Lifecycle state of the realtime link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// `connect` called by the owner
    ConnectRequested,
    /// Handshake completed
    Connected,
    /// Connection attempt or handshake failed
    ConnectFailed,
    /// Established link dropped (transport close, ping timeout)
    ConnectionLost,
    /// Owner disconnected, or the server closed the namespace
    Closed,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(LinkState),
    /// Schedule another connection attempt after `delay_ms`
    Reconnect { attempt: u32, delay_ms: u64 },
    /// All attempts used, link settles in `Disconnected`
    Exhausted { attempts: u32 },
    /// Transition was invalid from current state
    Invalid { from: LinkState, event: LinkEvent },
}

/// Reconnection options for the realtime link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Attempts after the first failure
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: tracking::RECONNECTION_ATTEMPTS,
            delay_ms: tracking::RECONNECTION_DELAY_MS,
            max_delay_ms: tracking::RECONNECTION_DELAY_MAX_MS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given (1-based) attempt, doubling up to the cap
    pub fn delay_for(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(16);
        self.delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms.max(self.delay_ms))
    }
}

/// The link state machine
#[derive(Debug)]
pub struct LinkStateMachine {
    current_state: LinkState,
    attempts: u32,
    policy: ReconnectPolicy,
}

impl Default for LinkStateMachine {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

impl LinkStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            current_state: LinkState::Disconnected,
            attempts: 0,
            policy,
        }
    }

    /// Get current state
    pub fn state(&self) -> LinkState {
        self.current_state
    }

    /// Reconnection attempts made since the last successful connect
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent) -> TransitionResult {
        use LinkState::*;

        match (self.current_state, &event) {
            (_, LinkEvent::Closed) => {
                self.current_state = Disconnected;
                self.attempts = 0;
                TransitionResult::Success(Disconnected)
            }
            (Disconnected, LinkEvent::ConnectRequested) => {
                self.current_state = Connecting;
                self.attempts = 0;
                TransitionResult::Success(Connecting)
            }
            (Connecting, LinkEvent::Connected) => {
                self.current_state = Connected;
                self.attempts = 0;
                TransitionResult::Success(Connected)
            }
            (Connecting, LinkEvent::ConnectFailed) => self.schedule_reconnect(),
            (Connected, LinkEvent::ConnectionLost) => {
                self.current_state = Connecting;
                self.schedule_reconnect()
            }
            _ => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    fn schedule_reconnect(&mut self) -> TransitionResult {
        if !self.policy.enabled || self.attempts >= self.policy.max_attempts {
            let attempts = self.attempts;
            self.current_state = LinkState::Disconnected;
            self.attempts = 0;
            return TransitionResult::Exhausted { attempts };
        }

        self.attempts += 1;
        TransitionResult::Reconnect {
            attempt: self.attempts,
            delay_ms: self.policy.delay_for(self.attempts),
        }
    }
}
