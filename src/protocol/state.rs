use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle state of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No socket and no reconnect scheduled
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// Socket open, not authenticated
    Connected,
    /// Authenticated, keepalive running
    Ready,
    /// Waiting for the reconnect timer
    ReconnectPending,
}

impl SessionState {
    /// Whether a live socket exists in this state
    pub fn has_socket(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Ready)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Ready => "ready",
            SessionState::ReconnectPending => "reconnect pending",
        };
        f.write_str(name)
    }
}

/// Deadlines of the session timers
///
/// A timer is armed while its deadline is `Some`; canceling a timer clears the
/// deadline so it can never fire against torn-down state.
#[derive(Debug, Default, Clone)]
pub struct Timers {
    reconnect: Option<Instant>,
    ping: Option<Instant>,
    pong_wait: Option<Instant>,
}

impl Timers {
    /// Creates a set of disarmed timers
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a reconnect unless one is already scheduled
    ///
    /// Returns `false` if a reconnect was already pending.
    pub fn schedule_reconnect(&mut self, now: Instant, delay: Duration) -> bool {
        if self.reconnect.is_some() {
            return false;
        }
        self.reconnect = Some(now + delay);
        true
    }

    /// Cancels a scheduled reconnect
    pub fn cancel_reconnect(&mut self) {
        self.reconnect = None;
    }

    /// Arms the ping timer, dropping any pong wait
    pub fn arm_ping(&mut self, now: Instant, interval: Duration) {
        self.pong_wait = None;
        self.ping = Some(now + interval);
    }

    /// Records a sent ping and starts waiting for its pong
    pub fn ping_sent(&mut self, now: Instant, interval: Duration) {
        self.ping = None;
        self.pong_wait = Some(now + interval * 2);
    }

    /// Cancels the ping and pong-wait timers
    pub fn cancel_keepalive(&mut self) {
        self.ping = None;
        self.pong_wait = None;
    }

    /// Cancels every timer
    pub fn cancel_all(&mut self) {
        self.cancel_keepalive();
        self.cancel_reconnect();
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect
    }

    pub fn ping_deadline(&self) -> Option<Instant> {
        self.ping
    }

    pub fn pong_deadline(&self) -> Option<Instant> {
        self.pong_wait
    }

    /// Whether a reconnect is scheduled
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_some()
    }
}
