use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::service::{SessionConfig, Shutdown};

use super::{ConnectionActivity, ConnectionRegistry};

/// Why a connection was reaped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Expiry {
    /// authenticated, no heartbeat within the authenticated timeout
    HeartbeatSilence,
    /// never authenticated within the unauthenticated timeout
    Unauthenticated,
    /// no message of any kind within the idle timeout
    Idle,
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Expiry::HeartbeatSilence => "heartbeat timeout",
            Expiry::Unauthenticated => "authentication timeout",
            Expiry::Idle => "idle timeout",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timeouts {
    pub authenticated: Duration,
    pub unauthenticated: Duration,
    pub idle: Duration,
}

impl From<&SessionConfig> for Timeouts {
    fn from(config: &SessionConfig) -> Self {
        Timeouts {
            authenticated: config.authenticated_timeout(),
            unauthenticated: config.unauthenticated_timeout(),
            idle: config.idle_timeout(),
        }
    }
}

/// Decides whether a connection with `activity` has to be closed at `now`.
pub fn check_expiry(
    activity: &ConnectionActivity,
    now: Instant,
    timeouts: &Timeouts,
) -> Option<Expiry> {
    if now.saturating_duration_since(activity.last_message_time) > timeouts.idle {
        return Some(Expiry::Idle);
    }
    let silence = now.saturating_duration_since(activity.last_heartbeat);
    if activity.state.is_authenticated() {
        (silence > timeouts.authenticated).then_some(Expiry::HeartbeatSilence)
    } else {
        (silence > timeouts.unauthenticated).then_some(Expiry::Unauthenticated)
    }
}

/// Periodically closes connections that stopped talking.
pub struct Reaper {
    registry: Arc<ConnectionRegistry>,
    timeouts: Timeouts,
    interval: Duration,
}

impl Reaper {
    pub fn new(registry: Arc<ConnectionRegistry>, config: &SessionConfig) -> Self {
        Reaper {
            registry,
            timeouts: Timeouts::from(config),
            interval: config.reaper_interval(),
        }
    }

    /// One pass over the registry. Returns the number of connections closed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut reaped = 0;
        for handle in self.registry.snapshot() {
            if handle.is_closed() {
                continue;
            }
            if let Some(expiry) = check_expiry(&handle.activity(), now, &self.timeouts) {
                info!(
                    peer = %handle.peer(),
                    terminal = ?handle.terminal_id(),
                    "reaping connection: {}",
                    expiry
                );
                handle.close(&expiry.to_string());
                reaped += 1;
            }
        }
        if reaped > 0 {
            debug!("reaper closed {} of {} connections", reaped, self.registry.len());
        }
        reaped
    }

    pub async fn run(self, mut shutdown: Shutdown) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("reaper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep(Instant::now());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::registry::ConnectionHandle;
    use crate::session::ConnectionState;

    fn activity(state: ConnectionState, heartbeat_ago: u64, message_ago: u64, now: Instant) -> ConnectionActivity {
        ConnectionActivity {
            terminal_id: Some("T1".into()),
            state,
            connected_at: now - Duration::from_secs(3600),
            last_heartbeat: now - Duration::from_secs(heartbeat_ago),
            last_message_time: now - Duration::from_secs(message_ago),
            message_count: 1,
        }
    }

    #[rstest]
    #[case(ConnectionState::Authenticated, 299, 10, None)]
    #[case(ConnectionState::Authenticated, 301, 10, Some(Expiry::HeartbeatSilence))]
    #[case(ConnectionState::Registered, 59, 10, None)]
    #[case(ConnectionState::Registered, 61, 10, Some(Expiry::Unauthenticated))]
    #[case(ConnectionState::New, 61, 61, Some(Expiry::Unauthenticated))]
    #[case(ConnectionState::Authenticated, 100, 601, Some(Expiry::Idle))]
    fn test_check_expiry(
        #[case] state: ConnectionState,
        #[case] heartbeat_ago: u64,
        #[case] message_ago: u64,
        #[case] expected: Option<Expiry>,
    ) {
        let now = Instant::now() + Duration::from_secs(7200);
        let timeouts = Timeouts::from(&SessionConfig::default());
        assert_eq!(
            check_expiry(&activity(state, heartbeat_ago, message_ago, now), now, &timeouts),
            expected
        );
    }

    #[tokio::test]
    async fn test_sweep_closes_only_expired() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let now = Instant::now() + Duration::from_secs(7200);
        let make = |port: u16, heartbeat_ago: u64| {
            let (tx, _rx) = mpsc::channel(1);
            let handle = Arc::new(ConnectionHandle::new(
                ([127, 0, 0, 1], port).into(),
                tx,
                CancellationToken::new(),
            ));
            handle.update_activity(activity(
                ConnectionState::Authenticated,
                heartbeat_ago,
                1,
                now,
            ));
            registry.insert(handle.clone());
            handle
        };
        let fresh = make(1, 10);
        let stale = make(2, 400);
        let reaper = Reaper::new(registry.clone(), &SessionConfig::default());
        assert_eq!(reaper.sweep(now), 1);
        assert!(!fresh.is_closed());
        assert!(stale.is_closed());
        assert_eq!(reaper.sweep(now), 0);
    }
}
