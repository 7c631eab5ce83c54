//! Liveness bookkeeping for the device connection
//!
//! Everything here is synchronous and takes the current time as an
//! argument, so the transitions can be driven and inspected without a
//! transport or a runtime.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

// ─────────────────────────────────────────────────────────────────
// Connection State
// ─────────────────────────────────────────────────────────────────

/// Whether the transport is usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No usable transport
    #[default]
    Disconnected,
    /// Transport opening
    Connecting,
    /// Transport open, heartbeat running
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Heartbeat Clock
// ─────────────────────────────────────────────────────────────────

/// Time of the last inbound frame and the silence we tolerate.
///
/// A connection whose silence exceeds the threshold is dead even if the
/// transport still reports itself open.
#[derive(Debug, Clone)]
pub struct HeartbeatClock {
    last_response: Instant,
    timeout: Duration,
}

impl HeartbeatClock {
    pub fn new(now: Instant, timeout: Duration) -> Self {
        Self {
            last_response: now,
            timeout,
        }
    }

    /// Record an inbound frame
    pub fn touch(&mut self, now: Instant) {
        self.last_response = now;
    }

    /// Time since the last inbound frame
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_response)
    }

    /// Strictly greater than the threshold
    pub fn is_expired(&self, now: Instant) -> bool {
        self.silence(now) > self.timeout
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

// ─────────────────────────────────────────────────────────────────
// Reconnect Timer
// ─────────────────────────────────────────────────────────────────

/// At most one pending reconnect attempt
#[derive(Debug, Clone, Default)]
pub struct ReconnectTimer {
    deadline: Option<Instant>,
}

impl ReconnectTimer {
    /// Arm the timer. Returns `false` and leaves the existing deadline
    /// untouched when an attempt is already pending.
    pub fn schedule(&mut self, now: Instant, delay: Duration) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + delay);
        true
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Clear the pending marker if the deadline has passed
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Link State
// ─────────────────────────────────────────────────────────────────

/// What a heartbeat tick should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    /// Silence exceeded the threshold
    TimedOut { silence: Duration },
    /// Nothing to send on
    NotOpen,
    /// Send a probe
    Send,
}

/// Connection state machine.
///
/// Each `begin_connect` starts a new generation. Transport signals carry
/// the generation they were produced for; signals from an older
/// generation are ignored.
#[derive(Debug, Clone)]
pub struct LinkState {
    state: ConnectionState,
    clock: HeartbeatClock,
    reconnect: ReconnectTimer,
    generation: u64,
}

impl LinkState {
    pub fn new(now: Instant, heartbeat_timeout: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            clock: HeartbeatClock::new(now, heartbeat_timeout),
            reconnect: ReconnectTimer::default(),
            generation: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn clock(&self) -> &HeartbeatClock {
        &self.clock
    }

    pub fn reconnect(&self) -> &ReconnectTimer {
        &self.reconnect
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    /// Disconnected → Connecting. Any pending reconnect is consumed.
    pub fn begin_connect(&mut self) -> u64 {
        self.reconnect.cancel();
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        self.generation
    }

    /// Connecting → Connected. The clock restarts so a fresh connection
    /// is not judged by the silence of the previous one.
    pub fn opened(&mut self, generation: u64, now: Instant) -> bool {
        if !self.is_current(generation) || self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.clock.touch(now);
        true
    }

    /// Any inbound frame proves liveness, whatever its type
    pub fn message_received(&mut self, generation: u64, now: Instant) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.clock.touch(now);
        true
    }

    pub fn heartbeat_verdict(&self, now: Instant, transport_open: bool) -> HeartbeatVerdict {
        if self.clock.is_expired(now) {
            return HeartbeatVerdict::TimedOut {
                silence: self.clock.silence(now),
            };
        }
        if !transport_open || self.state != ConnectionState::Connected {
            return HeartbeatVerdict::NotOpen;
        }
        HeartbeatVerdict::Send
    }

    /// Every failure lands here. Returns `false` for a stale generation.
    pub fn transport_lost(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.state = ConnectionState::Disconnected;
        true
    }

    /// Arm the single reconnect timer; `None` when one is already pending
    pub fn schedule_reconnect(&mut self, now: Instant, delay: Duration) -> Option<Instant> {
        if self.reconnect.schedule(now, delay) {
            self.reconnect.deadline()
        } else {
            None
        }
    }

    pub fn reconnect_due(&mut self, now: Instant) -> bool {
        self.reconnect.fire(now)
    }

    /// Leave the machine idle: no transport, no pending reconnect, and
    /// every in-flight signal made stale.
    pub fn stop(&mut self) {
        self.reconnect.cancel();
        self.generation += 1;
        self.state = ConnectionState::Disconnected;
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(20);
    const RECONNECT: Duration = Duration::from_secs(5);

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn connected(t0: Instant) -> (LinkState, u64) {
        let mut link = LinkState::new(t0, TIMEOUT);
        let gen = link.begin_connect();
        assert!(link.opened(gen, t0));
        (link, gen)
    }

    #[test]
    fn test_initial_state() {
        let link = LinkState::new(Instant::now(), TIMEOUT);
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(!link.reconnect().is_pending());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_then_open() {
        let t0 = Instant::now();
        let mut link = LinkState::new(t0, TIMEOUT);
        let gen = link.begin_connect();
        assert_eq!(link.state(), ConnectionState::Connecting);
        assert!(link.opened(gen, t0 + secs(1)));
        assert_eq!(link.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_stale_open_is_ignored() {
        let t0 = Instant::now();
        let mut link = LinkState::new(t0, TIMEOUT);
        let old = link.begin_connect();
        let new = link.begin_connect();
        assert!(!link.opened(old, t0));
        assert_eq!(link.state(), ConnectionState::Connecting);
        assert!(link.opened(new, t0));
    }

    #[test]
    fn test_clock_threshold_is_strict() {
        let t0 = Instant::now();
        let clock = HeartbeatClock::new(t0, TIMEOUT);
        assert!(!clock.is_expired(t0 + secs(20)));
        assert!(clock.is_expired(t0 + secs(20) + Duration::from_millis(1)));
    }

    #[test]
    fn test_heartbeat_verdicts() {
        let t0 = Instant::now();
        let (link, _) = connected(t0);

        assert_eq!(link.heartbeat_verdict(t0 + secs(10), true), HeartbeatVerdict::Send);
        assert_eq!(link.heartbeat_verdict(t0 + secs(10), false), HeartbeatVerdict::NotOpen);
        assert_eq!(
            link.heartbeat_verdict(t0 + secs(21), true),
            HeartbeatVerdict::TimedOut { silence: secs(21) }
        );
        // Timeout wins even when the transport looks open or is gone
        assert!(matches!(
            link.heartbeat_verdict(t0 + secs(30), false),
            HeartbeatVerdict::TimedOut { .. }
        ));
    }

    #[test]
    fn test_silent_link_detected_within_one_tick() {
        let t0 = Instant::now();
        let (link, _) = connected(t0);
        let interval = secs(10);

        let detected_at = (1..)
            .map(|n| t0 + interval * n)
            .find(|&tick| matches!(link.heartbeat_verdict(tick, true), HeartbeatVerdict::TimedOut { .. }))
            .unwrap();

        let crossed_at = t0 + TIMEOUT;
        assert!(detected_at > crossed_at);
        assert!(detected_at - crossed_at <= interval);
    }

    #[test]
    fn test_any_message_resets_clock() {
        let t0 = Instant::now();
        let (mut link, gen) = connected(t0);

        assert!(link.message_received(gen, t0 + secs(15)));
        assert_eq!(link.heartbeat_verdict(t0 + secs(30), true), HeartbeatVerdict::Send);
        assert_eq!(link.clock().silence(t0 + secs(30)), secs(15));
    }

    #[test]
    fn test_stale_message_does_not_reset_clock() {
        let t0 = Instant::now();
        let (mut link, gen) = connected(t0);
        link.transport_lost(gen);
        let next = link.begin_connect();
        link.opened(next, t0);

        assert!(!link.message_received(gen, t0 + secs(15)));
        assert_eq!(link.clock().silence(t0 + secs(15)), secs(15));
    }

    #[test]
    fn test_open_restarts_clock() {
        let t0 = Instant::now();
        let mut link = LinkState::new(t0, TIMEOUT);
        let gen = link.begin_connect();
        link.opened(gen, t0 + secs(60));
        assert_eq!(link.heartbeat_verdict(t0 + secs(70), true), HeartbeatVerdict::Send);
    }

    #[test]
    fn test_at_most_one_pending_reconnect() {
        let t0 = Instant::now();
        let (mut link, gen) = connected(t0);

        assert!(link.transport_lost(gen));
        let first = link.schedule_reconnect(t0, RECONNECT);
        assert_eq!(first, Some(t0 + RECONNECT));

        // A second close/error right after must not arm another timer
        assert!(link.transport_lost(gen));
        assert_eq!(link.schedule_reconnect(t0 + secs(1), RECONNECT), None);
        assert_eq!(link.reconnect().deadline(), Some(t0 + RECONNECT));
    }

    #[test]
    fn test_reconnect_fires_once() {
        let t0 = Instant::now();
        let (mut link, gen) = connected(t0);
        link.transport_lost(gen);
        link.schedule_reconnect(t0, RECONNECT);

        assert!(!link.reconnect_due(t0 + secs(4)));
        assert!(link.reconnect_due(t0 + secs(5)));
        assert!(!link.reconnect_due(t0 + secs(6)));
        assert!(!link.reconnect().is_pending());
    }

    #[test]
    fn test_failed_attempt_rearms() {
        let t0 = Instant::now();
        let mut link = LinkState::new(t0, TIMEOUT);

        for attempt in 0..5u64 {
            let now = t0 + RECONNECT * attempt as u32;
            let gen = link.begin_connect();
            assert!(link.transport_lost(gen));
            assert_eq!(link.schedule_reconnect(now, RECONNECT), Some(now + RECONNECT));
            assert!(link.reconnect_due(now + RECONNECT));
        }
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_cancels_pending_reconnect() {
        let t0 = Instant::now();
        let (mut link, gen) = connected(t0);
        link.transport_lost(gen);
        link.schedule_reconnect(t0, RECONNECT);

        link.begin_connect();
        assert!(!link.reconnect().is_pending());
    }

    #[test]
    fn test_stale_loss_is_ignored() {
        let t0 = Instant::now();
        let mut link = LinkState::new(t0, TIMEOUT);
        let old = link.begin_connect();
        let new = link.begin_connect();
        link.opened(new, t0);

        assert!(!link.transport_lost(old));
        assert_eq!(link.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_stop() {
        let t0 = Instant::now();
        let (mut link, gen) = connected(t0);
        link.transport_lost(gen);
        link.schedule_reconnect(t0, RECONNECT);

        link.stop();
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(!link.reconnect().is_pending());
        assert!(!link.is_current(gen));
    }
}
