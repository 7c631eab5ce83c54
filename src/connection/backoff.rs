//! Reconnect delay policy

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;

/// How long to wait between a lost transport and the next attempt.
///
/// Both policies retry forever.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    /// Same delay every time
    Fixed(Duration),
    /// Doubling delay starting at `initial`, capped at `max`, reset once a
    /// connection opens
    Exponential { initial: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(Duration::from_secs(5))
    }
}

/// Stateful delay source for one connection manager
pub struct ReconnectDelays {
    policy: ReconnectPolicy,
    backoff: Option<ExponentialBackoff>,
}

impl ReconnectDelays {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let backoff = match &policy {
            ReconnectPolicy::Fixed(_) => None,
            ReconnectPolicy::Exponential { initial, max } => Some(ExponentialBackoff {
                initial_interval: *initial,
                current_interval: *initial,
                max_interval: *max,
                multiplier: 2.0,
                randomization_factor: 0.0,
                max_elapsed_time: None,
                ..Default::default()
            }),
        };
        Self { policy, backoff }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn next_delay(&mut self) -> Duration {
        match (&self.policy, self.backoff.as_mut()) {
            (ReconnectPolicy::Exponential { max, .. }, Some(backoff)) => {
                backoff.next_backoff().unwrap_or(*max)
            }
            (ReconnectPolicy::Fixed(delay), _) => *delay,
            (ReconnectPolicy::Exponential { initial, .. }, None) => *initial,
        }
    }

    /// Called when a connection opens
    pub fn reset(&mut self) {
        if let Some(backoff) = self.backoff.as_mut() {
            backoff.reset();
        }
    }
}
