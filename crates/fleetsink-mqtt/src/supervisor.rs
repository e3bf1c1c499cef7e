use crate::state::ConnectionState;
use std::time::Duration;

/// Reconnect behavior after a post-establishment interruption
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

/// What the subscriber must do next after reporting a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    None,
    /// Re-issue the subscriptions that existed before the interruption.
    /// Re-subscribing to an already-active topic/QoS is a broker-side no-op.
    Resubscribe,
    /// Wait this long before polling the connection again
    Backoff(Duration),
    /// The attempt budget is exhausted; stop the pipeline
    GiveUp,
}

/// State machine over [`ConnectionState`].
///
/// The subscriber reports every transport event; the supervisor answers with
/// the action to take. It never fabricates or drops a reading; it only
/// restores subscription state and paces reconnect attempts.
#[derive(Debug)]
pub struct ReconnectSupervisor {
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempts: u32,
    ever_connected: bool,
}

impl ReconnectSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
            ever_connected: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether a broker session was ever established. Errors before the
    /// first session are startup failures, not interruptions.
    pub fn has_connected(&self) -> bool {
        self.ever_connected
    }

    /// The transport started (or restarted) its connection handshake.
    pub fn on_connecting(&mut self) {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
        }
    }

    /// A session is up. Resets the attempt counter; asks for resubscription
    /// when this session replaces an interrupted one.
    pub fn on_connected(&mut self) -> SupervisorAction {
        if self.state == ConnectionState::ShuttingDown {
            return SupervisorAction::None;
        }

        let resumed = self.ever_connected;
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.ever_connected = true;

        if resumed {
            SupervisorAction::Resubscribe
        } else {
            SupervisorAction::None
        }
    }

    /// The transport lost the session. Answers with a capped exponential
    /// backoff until the attempt budget runs out.
    pub fn on_interrupted(&mut self) -> SupervisorAction {
        if self.state == ConnectionState::ShuttingDown {
            return SupervisorAction::None;
        }

        self.state = ConnectionState::Interrupted;
        self.attempts += 1;

        if self.attempts > self.policy.max_attempts {
            self.state = ConnectionState::Disconnected;
            SupervisorAction::GiveUp
        } else {
            SupervisorAction::Backoff(self.backoff_delay())
        }
    }

    /// The backoff elapsed and the transport is about to redial.
    pub fn on_reconnecting(&mut self) {
        if self.state == ConnectionState::Interrupted {
            self.state = ConnectionState::Connecting;
        }
    }

    pub fn on_shutdown(&mut self) {
        self.state = ConnectionState::ShuttingDown;
    }

    fn backoff_delay(&self) -> Duration {
        // attempts is at least 1 here; cap the shift so the multiplier
        // cannot overflow long before max_delay kicks in
        let exponent = self.attempts.saturating_sub(1).min(16);
        let delay = self.policy.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.policy.max_delay)
    }
}
