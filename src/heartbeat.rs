//! Peer liveness tracking shared by the master and workers.
use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

const MIN_CHECK_INTERVAL_MS: u128 = 200;

/// Heartbeat timing for a distributed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// How often each side sends a heartbeat.
    pub interval: Duration,
    /// Missed worker heartbeats tolerated before the worker is marked missing.
    pub liveness: u64,
    /// How long a worker tolerates silence from the master.
    pub master_timeout: Duration,
    /// How long a missing worker is kept before it is dropped.
    pub missing_grace: Duration,
}

impl HeartbeatSettings {
    /// Silence after which the master marks a worker missing.
    #[must_use]
    pub fn worker_timeout(&self) -> Duration {
        let liveness = u32::try_from(self.liveness).unwrap_or(u32::MAX);
        self.interval.saturating_mul(liveness)
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            liveness: 3,
            master_timeout: Duration::from_secs(60),
            missing_grace: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PeerLiveness {
    last_seen: Instant,
    missing_since: Option<Instant>,
}

/// Tracks when each peer was last heard from.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    peers: BTreeMap<String, PeerLiveness>,
}

impl HeartbeatMonitor {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            peers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Notes a heartbeat. Returns true when the peer was marked missing.
    pub fn record(&mut self, peer: &str, now: Instant) -> bool {
        match self.peers.get_mut(peer) {
            Some(entry) => {
                entry.last_seen = now;
                entry.missing_since.take().is_some()
            }
            None => {
                self.peers.insert(
                    peer.to_owned(),
                    PeerLiveness {
                        last_seen: now,
                        missing_since: None,
                    },
                );
                false
            }
        }
    }

    pub fn forget(&mut self, peer: &str) {
        self.peers.remove(peer);
    }

    #[must_use]
    pub fn is_missing(&self, peer: &str) -> bool {
        self.peers
            .get(peer)
            .is_some_and(|entry| entry.missing_since.is_some())
    }

    /// Marks peers silent for longer than the timeout as missing.
    ///
    /// Returns only the peers that became missing during this sweep.
    pub fn sweep(&mut self, now: Instant) -> Vec<String> {
        let mut newly_missing = Vec::new();
        for (peer, entry) in &mut self.peers {
            if entry.missing_since.is_none()
                && now.saturating_duration_since(entry.last_seen) > self.timeout
            {
                entry.missing_since = Some(now);
                newly_missing.push(peer.clone());
            }
        }
        newly_missing
    }

    /// Peers that have been missing for longer than `grace`.
    #[must_use]
    pub fn expired(&self, now: Instant, grace: Duration) -> Vec<String> {
        self.peers
            .iter()
            .filter(|(_, entry)| {
                entry
                    .missing_since
                    .is_some_and(|since| now.saturating_duration_since(since) > grace)
            })
            .map(|(peer, _)| peer.clone())
            .collect()
    }

    pub fn peers(&self) -> impl Iterator<Item = &str> {
        self.peers.keys().map(String::as_str)
    }
}

/// How often to look for timed-out peers.
#[must_use]
pub fn resolve_heartbeat_check_interval(timeout: Duration) -> Duration {
    let timeout_ms = timeout.as_millis();
    let mut interval_ms = timeout_ms.saturating_div(2);
    if interval_ms < MIN_CHECK_INTERVAL_MS {
        interval_ms = timeout_ms.clamp(1, MIN_CHECK_INTERVAL_MS);
    }
    Duration::from_millis(u64::try_from(interval_ms).unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};

    #[test]
    fn silent_peer_goes_missing_once() -> AppResult<()> {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(3));
        monitor.record("w1", start);
        monitor.record("w2", start);

        if !monitor.sweep(start + Duration::from_secs(2)).is_empty() {
            return Err(AppError::distributed("No peer should be missing yet"));
        }
        monitor.record("w2", start + Duration::from_secs(2));
        let missing = monitor.sweep(start + Duration::from_secs(4));
        if missing != vec!["w1".to_owned()] {
            return Err(AppError::distributed(format!(
                "Expected only w1 missing, got {:?}",
                missing
            )));
        }
        if !monitor.sweep(start + Duration::from_secs(5)).is_empty() {
            return Err(AppError::distributed("Missing peer reported twice"));
        }
        if !monitor.is_missing("w1") || monitor.is_missing("w2") {
            return Err(AppError::distributed("Missing flags are wrong"));
        }
        Ok(())
    }

    #[test]
    fn heartbeat_revives_missing_peer() -> AppResult<()> {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(1));
        monitor.record("w1", start);
        monitor.sweep(start + Duration::from_secs(2));
        if !monitor.record("w1", start + Duration::from_secs(3)) {
            return Err(AppError::distributed("Expected revival to be reported"));
        }
        if monitor.is_missing("w1") {
            return Err(AppError::distributed("Peer still missing after heartbeat"));
        }
        if monitor.record("w1", start + Duration::from_secs(3)) {
            return Err(AppError::distributed("Healthy heartbeat reported as revival"));
        }
        Ok(())
    }

    #[test]
    fn expired_after_grace() -> AppResult<()> {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(1));
        monitor.record("w1", start);
        monitor.sweep(start + Duration::from_secs(2));
        if !monitor.expired(start + Duration::from_secs(10), Duration::from_secs(30)).is_empty() {
            return Err(AppError::distributed("Expired before the grace period"));
        }
        let expired = monitor.expired(start + Duration::from_secs(40), Duration::from_secs(30));
        if expired != vec!["w1".to_owned()] {
            return Err(AppError::distributed("Expected w1 to expire"));
        }
        monitor.forget("w1");
        if monitor.peers().count() != 0 {
            return Err(AppError::distributed("Forgotten peer still tracked"));
        }
        Ok(())
    }

    #[test]
    fn worker_timeout_is_interval_times_liveness() -> AppResult<()> {
        let settings = HeartbeatSettings {
            interval: Duration::from_millis(500),
            liveness: 4,
            ..HeartbeatSettings::default()
        };
        if settings.worker_timeout() != Duration::from_secs(2) {
            return Err(AppError::distributed("Unexpected worker timeout"));
        }
        Ok(())
    }

    #[test]
    fn check_interval_is_half_timeout_with_floor() -> AppResult<()> {
        if resolve_heartbeat_check_interval(Duration::from_secs(3)) != Duration::from_millis(1500) {
            return Err(AppError::distributed("Expected half the timeout"));
        }
        if resolve_heartbeat_check_interval(Duration::from_millis(300))
            != Duration::from_millis(200)
        {
            return Err(AppError::distributed("Expected the 200ms floor"));
        }
        if resolve_heartbeat_check_interval(Duration::from_millis(50)) != Duration::from_millis(50)
        {
            return Err(AppError::distributed("Short timeouts are checked at their own pace"));
        }
        Ok(())
    }
}
