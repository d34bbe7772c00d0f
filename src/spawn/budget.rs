use std::time::Duration;
use tokio::time::Instant;

use crate::args::SpawnRate;

/// One user expressed in milli-users times milliseconds.
const USER_UNIT: u128 = 1_000_000;

/// Rate limiter for ramping: grants whole users as time passes.
///
/// The first user is granted immediately; fractional users carry over to the
/// next call so slow rates such as `0.5` still make progress.
#[derive(Debug, Clone)]
pub struct SpawnBudget {
    rate: SpawnRate,
    carry: u128,
    last: Instant,
}

impl SpawnBudget {
    #[must_use]
    pub const fn new(rate: SpawnRate, now: Instant) -> Self {
        Self {
            rate,
            carry: USER_UNIT,
            last: now,
        }
    }

    #[must_use]
    pub const fn rate(&self) -> SpawnRate {
        self.rate
    }

    /// Users that may be started or stopped now.
    pub fn take(&mut self, now: Instant) -> u64 {
        let elapsed_ms = now.saturating_duration_since(self.last).as_millis();
        self.last = now;
        self.carry = self
            .carry
            .saturating_add(u128::from(self.rate.milli()).saturating_mul(elapsed_ms));
        let granted = self.carry.checked_div(USER_UNIT).unwrap_or(0);
        self.carry = self.carry.checked_rem(USER_UNIT).unwrap_or(0);
        u64::try_from(granted).unwrap_or(u64::MAX)
    }

    /// Returns unused users so an idle ramp does not bank a burst.
    pub fn clamp_to(&mut self, needed: u64) {
        let cap = u128::from(needed).saturating_mul(USER_UNIT);
        if self.carry > cap {
            self.carry = cap;
        }
    }
}

/// Time needed to start or stop `users` at `rate`.
#[must_use]
pub fn ramp_duration(users: u64, rate: SpawnRate) -> Duration {
    let millis = u128::from(users)
        .saturating_mul(USER_UNIT)
        .checked_div(u128::from(rate.milli()))
        .unwrap_or(0);
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}
