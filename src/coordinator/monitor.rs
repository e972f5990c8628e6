//! Consistency monitor for a promoted backup
//!
//! While a non-primary node is elected it periodically re-reads the election
//! node. Each read also arms a deletion watch, so a forced takeover by the
//! primary is noticed. The replies are judged by the elector; the monitor only
//! issues reads.

use crate::coordination::{ReadPurpose, Session};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Running monitor task; stops when dropped
pub struct ConsistencyMonitor {
    handle: JoinHandle<()>,
}

impl ConsistencyMonitor {
    /// Start reading `path` every `interval`, the first read immediately
    pub fn start(session: Arc<dyn Session>, path: String, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tracing::trace!(session = %session.id(), path = %path, "consistency check");
                session.get_data(&path, true, ReadPurpose::Consistency);
            }
        });
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for ConsistencyMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
