//! Election protocol and leadership state machine
//!
//! ```text
//! Running    --create ok-----------------> Elected
//! Running    --create NodeExists---------> NotElected (+ watch, primary deletes)
//! NotElected --election node deleted-----> Running (re-enroll)
//! Elected    --session expired-----------> Running (gate closed, session restarts)
//! Elected    --claim deleted under us----> Running (demoted, session restarts)
//! ```
//!
//! The [`Elector`] is owned by the reactor task and is only ever driven from
//! there, so transitions never interleave. Requests it issues are
//! fire-and-forget; their replies come back as [`Completion`]s.

use crate::common::{ElectionConfig, ElectionMetrics};
use crate::coordination::{Completion, ReadPurpose, ResultCode, Session};
use crate::coordinator::gate::LeadershipSwitch;
use crate::coordinator::monitor::ConsistencyMonitor;
use crate::coordinator::session::SessionStatus;
use crate::coordinator::state::LeadershipState;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ElectionSettings {
    pub path: String,
    pub identity: String,
    pub primary: bool,
    pub consistency_check_interval: Duration,
}

impl From<&ElectionConfig> for ElectionSettings {
    fn from(config: &ElectionConfig) -> Self {
        Self {
            path: config.path.clone(),
            identity: config.identity.clone(),
            primary: config.primary,
            consistency_check_interval: config.consistency_check_interval,
        }
    }
}

pub struct Elector {
    settings: ElectionSettings,
    switch: LeadershipSwitch,
    status: Arc<SessionStatus>,
    metrics: Arc<ElectionMetrics>,
    session: Option<Arc<dyn Session>>,
    monitor: Option<ConsistencyMonitor>,
    // Requests whose reply was lost while disconnected; reissued on reconnect
    pending_claim_check: bool,
    pending_watch: bool,
    // Last claim attempt got an unexpected reply; only a watch fire retries it
    claim_failed: bool,
}

impl Elector {
    pub fn new(
        settings: ElectionSettings,
        switch: LeadershipSwitch,
        status: Arc<SessionStatus>,
        metrics: Arc<ElectionMetrics>,
    ) -> Self {
        Self {
            settings,
            switch,
            status,
            metrics,
            session: None,
            monitor: None,
            pending_claim_check: false,
            pending_watch: false,
            claim_failed: false,
        }
    }

    pub fn state(&self) -> LeadershipState {
        self.switch.state()
    }

    pub fn settings(&self) -> &ElectionSettings {
        &self.settings
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_some()
    }

    /// Bind to a freshly opened session; every iteration starts at `Running`
    pub fn attach(&mut self, session: Arc<dyn Session>) {
        self.detach();
        tracing::debug!(node = %self.settings.identity, session = %session.id(), "session attached");
        self.session = Some(session);
    }

    /// Forget the current session and everything scoped to it
    pub fn detach(&mut self) {
        self.monitor = None;
        self.pending_claim_check = false;
        self.pending_watch = false;
        self.claim_failed = false;
        self.transition(LeadershipState::Running);
        self.session = None;
    }

    /// Claim leadership: create the ephemeral election node
    pub fn enroll(&mut self) {
        let Some(session) = self.session.clone() else {
            tracing::debug!(node = %self.settings.identity, "enroll without a session, ignored");
            return;
        };
        if self.state().is_leader() {
            return;
        }
        self.claim_failed = false;
        self.transition(LeadershipState::Running);
        tracing::debug!(node = %self.settings.identity, path = %self.settings.path, "running for leader");
        session.create_ephemeral(&self.settings.path, self.settings.identity.as_bytes().to_vec());
    }

    pub fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Create { code } => self.on_create(code),
            Completion::GetData {
                purpose: ReadPurpose::ClaimCheck,
                code,
                data,
            } => self.on_claim_check(code, data),
            Completion::GetData {
                purpose: ReadPurpose::Consistency,
                code,
                data,
            } => self.on_consistency_read(code, data),
            Completion::Exists { code } => self.on_exists(code),
            Completion::Delete { code } => self.on_delete(code),
        }
    }

    fn on_create(&mut self, code: ResultCode) {
        match code {
            ResultCode::Ok => self.transition(LeadershipState::Elected),
            ResultCode::NodeExists => {
                self.transition(LeadershipState::NotElected);
                self.arm_watch();
                if self.settings.primary {
                    self.take_over();
                }
            }
            ResultCode::ConnectionLoss => {
                // The create may have been applied; find out before deciding
                self.check_claim();
            }
            ResultCode::SessionExpired => {
                tracing::debug!(node = %self.settings.identity, "create reply after expiry, ignored");
            }
            // NoNode here means a missing parent
            ResultCode::NoNode | ResultCode::Other(_) => {
                self.fail_claim(&code, "something went wrong when running for leader")
            }
        }
    }

    fn on_claim_check(&mut self, code: ResultCode, data: Option<Vec<u8>>) {
        match code {
            ResultCode::Ok => {
                if self.owns(data.as_deref()) {
                    self.transition(LeadershipState::Elected);
                } else {
                    self.transition(LeadershipState::NotElected);
                    self.arm_watch();
                }
            }
            ResultCode::NoNode => self.enroll(),
            ResultCode::ConnectionLoss => {
                if self.status.is_connected() {
                    self.check_claim();
                } else {
                    self.pending_claim_check = true;
                }
            }
            ResultCode::SessionExpired => {}
            ResultCode::NodeExists | ResultCode::Other(_) => {
                self.fail_claim(&code, "error when reading election node")
            }
        }
    }

    fn on_consistency_read(&mut self, code: ResultCode, data: Option<Vec<u8>>) {
        if !self.state().is_leader() {
            return;
        }
        match code {
            ResultCode::Ok => {
                if !self.owns(data.as_deref()) {
                    self.metrics.consistency_violations.inc();
                    tracing::error!(
                        node = %self.settings.identity,
                        path = %self.settings.path,
                        stored = %String::from_utf8_lossy(data.as_deref().unwrap_or_default()),
                        "election node data has changed while elected"
                    );
                }
            }
            ResultCode::NoNode => {
                self.metrics.consistency_violations.inc();
                tracing::error!(
                    node = %self.settings.identity,
                    path = %self.settings.path,
                    "election node missing while elected"
                );
                // Let the watch path decide; an exists check on a missing node demotes
                self.arm_watch();
            }
            ResultCode::ConnectionLoss | ResultCode::SessionExpired => {}
            other => {
                self.metrics.coordination_errors.inc();
                tracing::warn!(node = %self.settings.identity, code = %other, "consistency check failed");
            }
        }
    }

    fn on_exists(&mut self, code: ResultCode) {
        match code {
            ResultCode::Ok => {
                tracing::debug!(node = %self.settings.identity, "watching election node");
            }
            ResultCode::NoNode => {
                if self.state().is_leader() {
                    self.lose_claim();
                } else if self.claim_failed {
                    tracing::warn!(
                        node = %self.settings.identity,
                        path = %self.settings.path,
                        "no election node after a failed claim, not retrying"
                    );
                } else {
                    tracing::info!(
                        node = %self.settings.identity,
                        "previous leader is gone, running for leader again"
                    );
                    self.enroll();
                }
            }
            ResultCode::ConnectionLoss => {
                if self.status.is_connected() {
                    self.arm_watch();
                } else {
                    self.pending_watch = true;
                }
            }
            ResultCode::SessionExpired => {}
            ResultCode::NodeExists | ResultCode::Other(_) => {
                if self.claim_failed {
                    self.metrics.coordination_errors.inc();
                    tracing::error!(node = %self.settings.identity, code = %code, "cannot watch election node");
                } else {
                    self.check_claim();
                }
            }
        }
    }

    fn on_delete(&mut self, code: ResultCode) {
        match code {
            ResultCode::Ok => {
                tracing::warn!(node = %self.settings.identity, path = %self.settings.path, "removed foreign claim");
            }
            ResultCode::NoNode => {
                tracing::debug!(node = %self.settings.identity, "claim already gone before takeover delete");
            }
            other => {
                tracing::error!(node = %self.settings.identity, code = %other, "takeover delete failed");
            }
        }
    }

    /// Deletion watch fired for `path`
    pub fn on_node_deleted(&mut self, path: &str) {
        if path != self.settings.path {
            return;
        }
        self.metrics.watch_fires.inc();
        match self.state() {
            LeadershipState::NotElected => self.enroll(),
            LeadershipState::Elected => self.lose_claim(),
            LeadershipState::Running => {
                tracing::debug!(node = %self.settings.identity, "election node deleted while a claim is pending");
            }
        }
    }

    /// The session expired: the service has already dropped our claim
    pub fn on_expired(&mut self) {
        self.metrics.sessions_expired.inc();
        self.monitor = None;
        self.pending_claim_check = false;
        self.pending_watch = false;
        self.claim_failed = false;
        self.transition(LeadershipState::Running);
        tracing::warn!(node = %self.settings.identity, "coordination session expired");
    }

    /// Reissue requests that were lost while disconnected
    pub fn on_reconnected(&mut self) {
        if std::mem::take(&mut self.pending_claim_check) {
            self.check_claim();
        }
        if std::mem::take(&mut self.pending_watch) {
            self.arm_watch();
        }
    }

    fn check_claim(&self) {
        if let Some(session) = &self.session {
            session.get_data(&self.settings.path, false, ReadPurpose::ClaimCheck);
        }
    }

    fn arm_watch(&self) {
        if let Some(session) = &self.session {
            session.exists_watch(&self.settings.path);
        }
    }

    /// Unexpected reply while claiming: fail safe to `NotElected` and watch once
    fn fail_claim(&mut self, code: &ResultCode, message: &str) {
        self.metrics.coordination_errors.inc();
        tracing::error!(
            node = %self.settings.identity,
            path = %self.settings.path,
            code = %code,
            "{}",
            message
        );
        self.transition(LeadershipState::NotElected);
        if !std::mem::replace(&mut self.claim_failed, true) {
            self.arm_watch();
        }
    }

    /// Primary only: remove whatever claim is in the way
    fn take_over(&self) {
        if let Some(session) = &self.session {
            self.metrics.forced_takeovers.inc();
            tracing::warn!(node = %self.settings.identity, path = %self.settings.path, "primary deleting existing claim");
            session.delete(&self.settings.path);
        }
    }

    /// Our claim vanished while we held it: close the gate and restart the session
    fn lose_claim(&mut self) {
        self.metrics.forced_demotions.inc();
        self.monitor = None;
        self.transition(LeadershipState::Running);
        self.status.mark_demoted();
        tracing::warn!(node = %self.settings.identity, path = %self.settings.path, "election node removed while elected, stepping down");
    }

    fn owns(&self, data: Option<&[u8]>) -> bool {
        data == Some(self.settings.identity.as_bytes())
    }

    fn transition(&mut self, to: LeadershipState) {
        let from = self.switch.set(to);
        self.metrics.is_leader.set(u64::from(to.is_leader()));
        if from == to {
            return;
        }
        match to {
            LeadershipState::Elected => {
                self.metrics.elections_won.inc();
                tracing::info!(node = %self.settings.identity, "I'm the leader");
                if !self.settings.primary {
                    if let Some(session) = &self.session {
                        self.monitor = Some(ConsistencyMonitor::start(
                            session.clone(),
                            self.settings.path.clone(),
                            self.settings.consistency_check_interval,
                        ));
                    }
                }
            }
            LeadershipState::NotElected => {
                self.metrics.elections_lost.inc();
                self.monitor = None;
                tracing::info!(node = %self.settings.identity, "I'm not the leader");
            }
            LeadershipState::Running => {
                self.monitor = None;
            }
        }
    }
}
