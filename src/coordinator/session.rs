//! Connectivity flags of the current coordination session
//!
//! Written by the reactor as session events arrive, polled by the supervisor.
//! Each supervisor iteration starts a new epoch; events stamped with an older
//! epoch belong to a session that has already been torn down.

use crate::coordination::SessionId;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Clock {
    opened_at: Option<Instant>,
    /// Start of the current outage; `None` while connected
    outage_since: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct SessionStatus {
    epoch: AtomicU64,
    session_id: AtomicU64,
    connected: AtomicBool,
    ever_connected: AtomicBool,
    expired: AtomicBool,
    demoted: AtomicBool,
    clock: Mutex<Clock>,
}

/// Point-in-time view for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub epoch: u64,
    pub session_id: Option<String>,
    pub connected: bool,
    pub expired: bool,
    pub demoted: bool,
    pub outage_secs: Option<u64>,
}

impl SessionStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn clock(&self) -> MutexGuard<'_, Clock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new epoch for a session about to be opened
    pub fn begin(&self) -> u64 {
        self.connected.store(false, Ordering::Release);
        self.ever_connected.store(false, Ordering::Release);
        self.expired.store(false, Ordering::Release);
        self.demoted.store(false, Ordering::Release);
        self.session_id.store(0, Ordering::Release);
        {
            let mut clock = self.clock();
            let now = Instant::now();
            clock.opened_at = Some(now);
            clock.outage_since.get_or_insert(now);
        }
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn set_session(&self, id: SessionId) {
        self.session_id.store(id.0, Ordering::Release);
    }

    pub fn session(&self) -> Option<SessionId> {
        match self.session_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(SessionId(id)),
        }
    }

    pub fn on_connected(&self) {
        self.clock().outage_since = None;
        self.ever_connected.store(true, Ordering::Release);
        self.connected.store(true, Ordering::Release);
    }

    pub fn on_disconnected(&self) {
        self.clock().outage_since.get_or_insert_with(Instant::now);
        self.connected.store(false, Ordering::Release);
    }

    pub fn on_expired(&self) {
        self.clock().outage_since.get_or_insert_with(Instant::now);
        self.connected.store(false, Ordering::Release);
        self.expired.store(true, Ordering::Release);
    }

    /// The claim this node held was removed under it
    pub fn mark_demoted(&self) {
        self.demoted.store(true, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn has_connected(&self) -> bool {
        self.ever_connected.load(Ordering::Acquire)
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    pub fn is_demoted(&self) -> bool {
        self.demoted.load(Ordering::Acquire)
    }

    /// Expired or demoted: the supervisor must tear this session down
    pub fn should_restart(&self) -> bool {
        self.is_expired() || self.is_demoted()
    }

    /// How long this node has been without a connection, if it is
    pub fn outage(&self) -> Option<Duration> {
        self.clock().outage_since.map(|since| since.elapsed())
    }

    pub fn since_open(&self) -> Option<Duration> {
        self.clock().opened_at.map(|at| at.elapsed())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            epoch: self.epoch(),
            session_id: self.session().map(|id| id.to_string()),
            connected: self.is_connected(),
            expired: self.is_expired(),
            demoted: self.is_demoted(),
            outage_secs: self.outage().map(|d| d.as_secs()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_outage_spans_iterations_until_connected() {
        let status = SessionStatus::new();
        assert!(status.outage().is_none());

        assert_eq!(status.begin(), 1);
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(status.begin(), 2);
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(status.outage(), Some(Duration::from_secs(40)));
        assert_eq!(status.since_open(), Some(Duration::from_secs(20)));

        status.on_connected();
        assert!(status.outage().is_none());
        assert!(status.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_resets_flags() {
        let status = SessionStatus::new();
        status.begin();
        status.set_session(SessionId(9));
        status.on_connected();
        status.on_expired();
        assert!(status.should_restart());
        assert!(!status.is_connected());

        status.begin();
        assert!(!status.should_restart());
        assert!(!status.has_connected());
        assert!(status.session().is_none());
    }

    #[test]
    fn test_demotion_requests_restart() {
        let status = SessionStatus::new();
        status.begin();
        status.on_connected();
        status.mark_demoted();
        assert!(status.should_restart());
        assert!(!status.is_expired());
    }
}
