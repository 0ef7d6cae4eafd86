use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Idle and absolute expiration rules for sessions.
///
/// A session sitting exactly on a threshold is still valid; it expires once
/// it is strictly older than the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    idle: Duration,
    absolute: Duration,
}

impl ExpirationPolicy {
    /// Creates a new `ExpirationPolicy`.
    pub fn new(idle: Duration, absolute: Duration) -> Self {
        Self { idle, absolute }
    }

    /// Sessions whose last activity is before this instant are expired.
    pub fn idle_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        cutoff(now, self.idle)
    }

    /// Sessions created before this instant are expired.
    pub fn absolute_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        cutoff(now, self.absolute)
    }

    /// Whether a session with these timestamps is expired at `now`.
    pub fn is_expired_at(
        &self,
        created_at: DateTime<Utc>,
        last_activity_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        created_at < self.absolute_cutoff(now) || last_activity_at < self.idle_cutoff(now)
    }

    /// Whether a session with these timestamps is expired right now.
    pub fn is_expired(&self, created_at: DateTime<Utc>, last_activity_at: DateTime<Utc>) -> bool {
        self.is_expired_at(created_at, last_activity_at, Utc::now())
    }
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    let age = TimeDelta::from_std(age).unwrap_or(TimeDelta::MAX);
    now.checked_sub_signed(age)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
