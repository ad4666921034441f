//! Start and stop policy for the single session a server process hosts.
//!
//! A session is waiting from the moment the host activates it until enough
//! connections have signalled ready. It ends either when it has started and
//! every connection is gone, or when it is still waiting once the grace
//! period has run out. There is no restart: a terminated session stays
//! terminated for the rest of the process.

use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The session started and then lost its last connection
    Emptied,
    /// Not enough players became ready within the grace period
    Abandoned,
    /// The operator stopped the process
    Shutdown,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Emptied => write!(f, "all players left"),
            TerminationReason::Abandoned => write!(f, "not enough players became ready in time"),
            TerminationReason::Shutdown => write!(f, "server shutting down"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    ready_threshold: usize,
    grace_period: Duration,
    started: bool,
    ready_count: usize,
    waiting_since: Option<Instant>,
    first_ready_seen: bool,
    terminated: bool,
}

impl SessionLifecycle {
    pub fn new(ready_threshold: usize, grace_period: Duration) -> Self {
        Self {
            ready_threshold,
            grace_period,
            started: false,
            ready_count: 0,
            waiting_since: None,
            first_ready_seen: false,
            terminated: false,
        }
    }

    /// The host handed us a session; start the grace timer.
    pub fn activate(&mut self, now: Instant) {
        self.waiting_since = Some(now);
    }

    /// Records the current number of ready connections.
    ///
    /// The first ready signal ever seen re-anchors the grace timer. Returns
    /// true when this call is the one that starts the session.
    pub fn player_ready(&mut self, ready_count: usize, now: Instant) -> bool {
        self.ready_count = ready_count;
        if !self.first_ready_seen {
            self.first_ready_seen = true;
            self.waiting_since = Some(now);
        }

        if !self.started && !self.terminated && ready_count >= self.ready_threshold {
            self.started = true;
            self.waiting_since = None;
            return true;
        }
        false
    }

    /// Keeps the ready count in step with departures.
    pub fn set_ready_count(&mut self, ready_count: usize) {
        self.ready_count = ready_count;
    }

    /// Decides whether the session has to end this tick.
    pub fn check(&self, now: Instant, connections: usize) -> Option<TerminationReason> {
        if self.terminated {
            return None;
        }
        if self.started {
            return (connections == 0).then_some(TerminationReason::Emptied);
        }
        match self.waiting_since {
            Some(since) if now.saturating_duration_since(since) >= self.grace_period => {
                Some(TerminationReason::Abandoned)
            }
            _ => None,
        }
    }

    pub fn mark_terminated(&mut self) {
        self.terminated = true;
        self.waiting_since = None;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn ready_count(&self) -> usize {
        self.ready_count
    }

    pub fn ready_threshold(&self) -> usize {
        self.ready_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_secs(5);

    #[test]
    fn test_starts_at_threshold() {
        let now = Instant::now();
        let mut lifecycle = SessionLifecycle::new(2, GRACE);
        lifecycle.activate(now);

        assert!(!lifecycle.player_ready(1, now));
        assert!(!lifecycle.is_started());
        assert!(lifecycle.player_ready(2, now));
        assert!(lifecycle.is_started());
        assert_eq!(lifecycle.ready_count(), 2);

        // Only the crossing call reports the start
        assert!(!lifecycle.player_ready(3, now));
    }

    #[test]
    fn test_started_session_ends_when_empty() {
        let now = Instant::now();
        let mut lifecycle = SessionLifecycle::new(1, GRACE);
        lifecycle.activate(now);
        lifecycle.player_ready(1, now);

        assert_eq!(lifecycle.check(now, 1), None);
        assert_eq!(lifecycle.check(now + GRACE * 10, 1), None);
        assert_eq!(lifecycle.check(now, 0), Some(TerminationReason::Emptied));
    }

    #[test]
    fn test_grace_period_without_ready_players() {
        let now = Instant::now();
        let mut lifecycle = SessionLifecycle::new(2, GRACE);
        lifecycle.activate(now);

        assert_eq!(lifecycle.check(now + Duration::from_secs(4), 0), None);
        assert_eq!(
            lifecycle.check(now + GRACE, 0),
            Some(TerminationReason::Abandoned)
        );
    }

    #[test]
    fn test_first_ready_reanchors_grace_timer() {
        let now = Instant::now();
        let mut lifecycle = SessionLifecycle::new(2, GRACE);
        lifecycle.activate(now);

        let first_ready = now + Duration::from_secs(3);
        lifecycle.player_ready(1, first_ready);

        assert_eq!(lifecycle.check(now + GRACE, 1), None);
        assert_eq!(
            lifecycle.check(first_ready + GRACE, 1),
            Some(TerminationReason::Abandoned)
        );

        // A later ready signal does not push the deadline out again
        let mut again = lifecycle.clone();
        again.set_ready_count(0);
        again.player_ready(1, first_ready + Duration::from_secs(4));
        assert_eq!(
            again.check(first_ready + GRACE, 1),
            Some(TerminationReason::Abandoned)
        );
    }

    #[test]
    fn test_not_activated_never_times_out() {
        let lifecycle = SessionLifecycle::new(2, GRACE);
        assert_eq!(lifecycle.check(Instant::now() + GRACE * 2, 0), None);
    }

    #[test]
    fn test_terminated_is_final() {
        let now = Instant::now();
        let mut lifecycle = SessionLifecycle::new(1, GRACE);
        lifecycle.activate(now);
        lifecycle.mark_terminated();

        assert!(lifecycle.is_terminated());
        assert_eq!(lifecycle.check(now + GRACE, 0), None);
        assert!(!lifecycle.player_ready(1, now));
    }
}
