//! Connection lifecycle as an explicit state machine.
//!
//! ```text
//! Disconnected --begin_connect--> Connecting --on_open--> Connected
//!      ^                              |                      |
//!      +-------on_connect_failed------+                      |
//!      +-----------------on_close----------------------------+
//! any --teardown--> Closed (terminal)
//! ```
//!
//! Each drop into `Disconnected` schedules exactly one reconnect, a fixed
//! delay later. There is no retry ceiling and no backoff growth.

use tokio::time::{Duration, Instant};

use crate::errors::TransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Link {
    state: LinkState,
    reconnect_delay: Duration,
    reconnect_at: Option<Instant>,
    last_error: Option<String>,
    attempts: u64,
    connects: u64,
}

impl Link {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            state: LinkState::Disconnected,
            reconnect_delay,
            reconnect_at: None,
            last_error: None,
            attempts: 0,
            connects: 0,
        }
    }

    fn invalid(&self, event: &'static str) -> TransitionError {
        TransitionError {
            state: self.state.as_str(),
            event,
        }
    }

    pub fn begin_connect(&mut self) -> Result<(), TransitionError> {
        match self.state {
            LinkState::Disconnected => {
                self.state = LinkState::Connecting;
                self.reconnect_at = None;
                self.attempts += 1;
                Ok(())
            }
            _ => Err(self.invalid("begin_connect")),
        }
    }

    pub fn on_open(&mut self) -> Result<(), TransitionError> {
        match self.state {
            LinkState::Connecting => {
                self.state = LinkState::Connected;
                self.last_error = None;
                self.connects += 1;
                Ok(())
            }
            _ => Err(self.invalid("on_open")),
        }
    }

    pub fn on_connect_failed(&mut self, error: String, now: Instant) -> Result<(), TransitionError> {
        match self.state {
            LinkState::Connecting => {
                self.last_error = Some(error);
                self.drop_to_disconnected(now);
                Ok(())
            }
            _ => Err(self.invalid("on_connect_failed")),
        }
    }

    /// Close or error from either end while connected.
    pub fn on_close(&mut self, error: Option<String>, now: Instant) -> Result<(), TransitionError> {
        match self.state {
            LinkState::Connected => {
                if error.is_some() {
                    self.last_error = error;
                }
                self.drop_to_disconnected(now);
                Ok(())
            }
            _ => Err(self.invalid("on_close")),
        }
    }

    fn drop_to_disconnected(&mut self, now: Instant) {
        self.state = LinkState::Disconnected;
        // Single slot: a second drop cannot queue a second attempt.
        if self.reconnect_at.is_none() {
            self.reconnect_at = Some(now + self.reconnect_delay);
        }
    }

    /// Consume the scheduled reconnect if it is due.
    pub fn take_due_reconnect(&mut self, now: Instant) -> bool {
        match (self.state, self.reconnect_at) {
            (LinkState::Disconnected, Some(at)) if now >= at => {
                self.reconnect_at = None;
                true
            }
            _ => false,
        }
    }

    /// Terminal. Cancels any pending reconnect. Idempotent.
    pub fn teardown(&mut self) {
        self.state = LinkState::Closed;
        self.reconnect_at = None;
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn connects(&self) -> u64 {
        self.connects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> Link {
        Link::new(Duration::from_secs(3))
    }

    #[test]
    fn test_happy_path() {
        let mut l = link();
        l.begin_connect().unwrap();
        assert_eq!(l.state(), LinkState::Connecting);
        l.on_open().unwrap();
        assert!(l.is_connected());
        assert_eq!(l.attempts(), 1);
        assert_eq!(l.connects(), 1);
    }

    #[test]
    fn test_close_schedules_exactly_one_reconnect_after_delay() {
        let mut l = link();
        let t0 = Instant::now();
        l.begin_connect().unwrap();
        l.on_open().unwrap();
        l.on_close(None, t0).unwrap();
        assert!(!l.is_connected());
        assert_eq!(l.reconnect_at(), Some(t0 + Duration::from_secs(3)));

        assert!(!l.take_due_reconnect(t0 + Duration::from_millis(2999)));
        assert!(l.take_due_reconnect(t0 + Duration::from_millis(3000)));
        // Consumed: no second attempt from the same drop.
        assert!(!l.take_due_reconnect(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_open_clears_error() {
        let mut l = link();
        let t0 = Instant::now();
        l.begin_connect().unwrap();
        l.on_connect_failed("refused".to_string(), t0).unwrap();
        assert_eq!(l.last_error(), Some("refused"));
        assert!(l.take_due_reconnect(t0 + Duration::from_secs(3)));
        l.begin_connect().unwrap();
        l.on_open().unwrap();
        assert_eq!(l.last_error(), None);
    }

    #[test]
    fn test_failures_repeat_without_limit_at_fixed_delay() {
        let mut l = link();
        let mut now = Instant::now();
        for _ in 0..50 {
            l.begin_connect().unwrap();
            l.on_connect_failed("down".to_string(), now).unwrap();
            assert_eq!(l.reconnect_at(), Some(now + Duration::from_secs(3)));
            now += Duration::from_secs(3);
            assert!(l.take_due_reconnect(now));
        }
        assert_eq!(l.attempts(), 50);
    }

    #[test]
    fn test_clean_close_keeps_previous_error_state() {
        let mut l = link();
        let t0 = Instant::now();
        l.begin_connect().unwrap();
        l.on_open().unwrap();
        l.on_close(Some("reset".to_string()), t0).unwrap();
        assert_eq!(l.last_error(), Some("reset"));
    }

    #[test]
    fn test_teardown_cancels_pending_reconnect() {
        let mut l = link();
        let t0 = Instant::now();
        l.begin_connect().unwrap();
        l.on_open().unwrap();
        l.on_close(None, t0).unwrap();
        l.teardown();
        assert_eq!(l.state(), LinkState::Closed);
        assert_eq!(l.reconnect_at(), None);
        assert!(!l.take_due_reconnect(t0 + Duration::from_secs(60)));
        assert!(l.begin_connect().is_err());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut l = link();
        assert!(l.on_open().is_err());
        assert!(l.on_close(None, Instant::now()).is_err());
        l.begin_connect().unwrap();
        let err = l.begin_connect().unwrap_err();
        assert_eq!(err.state, "connecting");
    }
}
