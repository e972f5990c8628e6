//! Shared fixtures: simulated nodes on one in-process ensemble
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warden::alert::{EmailMessage, Mailer};
use warden::common::Config;
use warden::coordination::local::OpKind;
use warden::coordination::{
    Connector, EventSink, LocalEnsemble, ReadPurpose, Session, SessionId,
};
use warden::{Coordinator, CoordinatorHandle, LeadershipGate, Result};

pub const PATH: &str = "/scheduler/leader";

/// Counts outage notifications instead of sending them
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingMailer {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn messages(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Config with timings small enough for tests
pub fn fast_config(identity: &str, primary: bool) -> Config {
    let mut config = Config::new("local", PATH, identity, primary);
    config.alert.max_connect_wait = Duration::from_millis(150);
    config.alert.recipients = "ops@example.com".into();
    config.election.consistency_check_interval = Duration::from_millis(50);
    config.supervisor.connect_poll_interval = Duration::from_millis(10);
    config.supervisor.expiry_poll_interval = Duration::from_millis(10);
    config.supervisor.restart_backoff = Duration::from_millis(50);
    config
}

/// Records whether the gate was open each time a session was closed
#[derive(Default)]
pub struct CloseRecorder {
    gate: Mutex<Option<LeadershipGate>>,
    leader_at_close: Mutex<Vec<bool>>,
}

impl CloseRecorder {
    pub fn watch(&self, gate: LeadershipGate) {
        *self.gate.lock().unwrap() = Some(gate);
    }

    /// Gate state observed at each close, oldest first
    pub fn closes(&self) -> Vec<bool> {
        self.leader_at_close.lock().unwrap().clone()
    }

    pub fn connector(self: &Arc<Self>, ensemble: &LocalEnsemble) -> Arc<dyn Connector> {
        Arc::new(RecordingConnector {
            inner: ensemble.clone(),
            recorder: self.clone(),
        })
    }

    fn record(&self) {
        let leader = self
            .gate
            .lock()
            .unwrap()
            .as_ref()
            .map(|gate| gate.is_leader())
            .unwrap_or(false);
        self.leader_at_close.lock().unwrap().push(leader);
    }
}

struct RecordingConnector {
    inner: LocalEnsemble,
    recorder: Arc<CloseRecorder>,
}

impl Connector for RecordingConnector {
    fn open(&self, address: &str, timeout: Duration, sink: EventSink) -> Result<Arc<dyn Session>> {
        let inner = self.inner.open(address, timeout, sink)?;
        Ok(Arc::new(RecordingSession {
            inner,
            recorder: self.recorder.clone(),
        }))
    }
}

struct RecordingSession {
    inner: Arc<dyn Session>,
    recorder: Arc<CloseRecorder>,
}

impl Session for RecordingSession {
    fn id(&self) -> SessionId {
        self.inner.id()
    }
    fn create_ephemeral(&self, path: &str, data: Vec<u8>) {
        self.inner.create_ephemeral(path, data)
    }
    fn get_data(&self, path: &str, watch: bool, purpose: ReadPurpose) {
        self.inner.get_data(path, watch, purpose)
    }
    fn exists_watch(&self, path: &str) {
        self.inner.exists_watch(path)
    }
    fn delete(&self, path: &str) {
        self.inner.delete(path)
    }
    fn close(&self) {
        self.recorder.record();
        self.inner.close()
    }
}

pub struct Node {
    pub identity: String,
    pub handle: CoordinatorHandle,
    pub mailer: Arc<RecordingMailer>,
}

impl Node {
    pub fn start(ensemble: &LocalEnsemble, config: Config) -> Node {
        Self::start_with(ensemble.connector(), config)
    }

    pub fn start_with(connector: Arc<dyn Connector>, config: Config) -> Node {
        let mailer = Arc::new(RecordingMailer::default());
        let identity = config.election.identity.clone();
        let handle = Coordinator::new(config, connector, mailer.clone()).start();
        Node {
            identity,
            handle,
            mailer,
        }
    }

    pub fn spawn(ensemble: &LocalEnsemble, identity: &str, primary: bool) -> Node {
        Self::start(ensemble, fast_config(identity, primary))
    }

    pub fn is_leader(&self) -> bool {
        self.handle.gate().is_leader()
    }

    pub fn session(&self) -> Option<SessionId> {
        self.handle.status().session()
    }

    pub async fn stop(self) {
        self.handle.stop().await;
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn leaders(nodes: &[Node]) -> Vec<&str> {
    nodes
        .iter()
        .filter(|n| n.is_leader())
        .map(|n| n.identity.as_str())
        .collect()
}

/// Payload of the election node, if any
pub fn holder(ensemble: &LocalEnsemble) -> Option<String> {
    ensemble
        .data(PATH)
        .map(|data| String::from_utf8_lossy(&data).into_owned())
}

/// Requests of `kind` a node issued across all of its sessions
pub fn ops_by(ensemble: &LocalEnsemble, sessions: &[SessionId], kind: OpKind) -> usize {
    sessions
        .iter()
        .map(|id| ensemble.count_ops(*id, kind))
        .sum()
}
