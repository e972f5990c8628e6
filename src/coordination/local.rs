//! In-process coordination service
//!
//! Implements the semantics the election relies on: atomic create-if-absent,
//! ephemeral nodes released when their session ends, and one-shot deletion
//! watches. Also exposes fault injection (unreachable ensemble, session expiry,
//! lost or failed create replies, external deletes) for tests and the `demo`
//! command.
//!
//! Closed sessions are dropped from the ensemble. The operation log keeps every
//! request for the life of the ensemble, so it is only meant for short runs.

use super::{
    Completion, Connector, Event, EventSink, ReadPurpose, ResultCode, Session, SessionEvent,
    SessionId,
};
use crate::common::Result;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Connected,
    Disconnected,
    Expired,
}

struct SessionEntry {
    sink: EventSink,
    link: LinkState,
    watches: HashSet<String>,
}

#[derive(Debug, Clone)]
struct Znode {
    data: Vec<u8>,
    owner: Option<SessionId>,
}

/// Kind of request recorded in the operation log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Create,
    GetData,
    Exists,
    Delete,
}

/// One request as seen by the ensemble
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpRecord {
    /// `None` for operator actions injected from outside any session
    pub session: Option<SessionId>,
    pub kind: OpKind,
    pub path: String,
}

#[derive(Default)]
struct EnsembleState {
    next_session: u64,
    unreachable: bool,
    nodes: BTreeMap<String, Znode>,
    sessions: HashMap<SessionId, SessionEntry>,
    lost_create_replies: usize,
    failing_creates: Option<ResultCode>,
    ops: Vec<OpRecord>,
}

type Outbox = Vec<(EventSink, SessionId, Event)>;

impl EnsembleState {
    /// Remove a node and collect the deletion watches it fires
    fn remove_node(&mut self, path: &str, outbox: &mut Outbox) -> bool {
        if self.nodes.remove(path).is_none() {
            return false;
        }
        for (id, entry) in self.sessions.iter_mut() {
            if entry.watches.remove(path) {
                outbox.push((
                    entry.sink.clone(),
                    *id,
                    Event::Session(SessionEvent::NodeDeleted(path.to_string())),
                ));
            }
        }
        true
    }

    /// Drop every ephemeral node owned by `id`
    fn release_ephemerals(&mut self, id: SessionId, outbox: &mut Outbox) {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            self.remove_node(&path, outbox);
        }
    }

    /// Result code for a request issued on `id` in its current link state
    fn link_code(&self, id: SessionId) -> Option<ResultCode> {
        match self.sessions.get(&id).map(|entry| entry.link) {
            Some(LinkState::Connected) => None,
            Some(LinkState::Expired) | None => Some(ResultCode::SessionExpired),
            Some(LinkState::Connecting) | Some(LinkState::Disconnected) => {
                Some(ResultCode::ConnectionLoss)
            }
        }
    }

    fn sink(&self, id: SessionId) -> Option<EventSink> {
        self.sessions.get(&id).map(|entry| entry.sink.clone())
    }
}

fn flush(outbox: Outbox) {
    for (sink, id, event) in outbox {
        sink.emit(id, event);
    }
}

/// Shared in-process coordination service
#[derive(Clone, Default)]
pub struct LocalEnsemble {
    state: Arc<Mutex<EnsembleState>>,
}

impl LocalEnsemble {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EnsembleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the ensemble (un)reachable for every client.
    ///
    /// Going unreachable disconnects live sessions without expiring them;
    /// coming back connects every pending or disconnected session.
    pub fn set_reachable(&self, reachable: bool) {
        let mut outbox = Outbox::new();
        {
            let mut state = self.lock();
            state.unreachable = !reachable;
            for (id, entry) in state.sessions.iter_mut() {
                let next = match (reachable, entry.link) {
                    (false, LinkState::Connected) => Some(SessionEvent::Disconnected),
                    (true, LinkState::Connecting | LinkState::Disconnected) => {
                        Some(SessionEvent::Connected)
                    }
                    _ => None,
                };
                if let Some(event) = next {
                    entry.link = if reachable {
                        LinkState::Connected
                    } else {
                        LinkState::Disconnected
                    };
                    outbox.push((entry.sink.clone(), *id, Event::Session(event)));
                }
            }
        }
        flush(outbox);
    }

    /// Expire a session: its ephemeral nodes go away (firing watches held by
    /// others) and the owner receives `Expired`.
    pub fn expire_session(&self, id: SessionId) {
        let mut outbox = Outbox::new();
        {
            let mut state = self.lock();
            let Some(entry) = state.sessions.get_mut(&id) else {
                return;
            };
            if entry.link == LinkState::Expired {
                return;
            }
            entry.link = LinkState::Expired;
            entry.watches.clear();
            let sink = entry.sink.clone();
            state.release_ephemerals(id, &mut outbox);
            outbox.push((sink, id, Event::Session(SessionEvent::Expired)));
        }
        flush(outbox);
    }

    /// The next `n` creates are applied but reply `ConnectionLoss`
    pub fn fail_next_create_replies(&self, n: usize) {
        self.lock().lost_create_replies = n;
    }

    /// Every create replies `code` without being applied, until called with `None`
    pub fn fail_creates(&self, code: Option<ResultCode>) {
        self.lock().failing_creates = code;
    }

    /// Operator-side delete of any node, firing watches
    pub fn force_delete(&self, path: &str) -> bool {
        let mut outbox = Outbox::new();
        let removed = {
            let mut state = self.lock();
            state.ops.push(OpRecord {
                session: None,
                kind: OpKind::Delete,
                path: path.to_string(),
            });
            state.remove_node(path, &mut outbox)
        };
        flush(outbox);
        removed
    }

    /// Operator-side overwrite of a node's payload, keeping its owner
    pub fn overwrite(&self, path: &str, data: &[u8]) -> bool {
        let mut state = self.lock();
        match state.nodes.get_mut(path) {
            Some(node) => {
                node.data = data.to_vec();
                true
            }
            None => false,
        }
    }

    /// Create a persistent node owned by no session (a leftover claim)
    pub fn plant(&self, path: &str, data: &[u8]) {
        self.lock().nodes.insert(
            path.to_string(),
            Znode {
                data: data.to_vec(),
                owner: None,
            },
        );
    }

    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().nodes.get(path).map(|node| node.data.clone())
    }

    pub fn owner(&self, path: &str) -> Option<SessionId> {
        self.lock().nodes.get(path).and_then(|node| node.owner)
    }

    /// Sessions currently watching `path`
    pub fn watchers(&self, path: &str) -> Vec<SessionId> {
        let state = self.lock();
        let mut ids: Vec<SessionId> = state
            .sessions
            .iter()
            .filter(|(_, entry)| entry.watches.contains(path))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Sessions the ensemble still tracks, expired ones included until closed
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_open(&self, id: SessionId) -> bool {
        matches!(
            self.lock().sessions.get(&id).map(|entry| entry.link),
            Some(LinkState::Connecting | LinkState::Connected | LinkState::Disconnected)
        )
    }

    pub fn ops(&self) -> Vec<OpRecord> {
        self.lock().ops.clone()
    }

    /// Requests of `kind` issued by `session`
    pub fn count_ops(&self, session: SessionId, kind: OpKind) -> usize {
        self.lock()
            .ops
            .iter()
            .filter(|op| op.session == Some(session) && op.kind == kind)
            .count()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }
}

impl Connector for LocalEnsemble {
    fn open(&self, address: &str, timeout: Duration, sink: EventSink) -> Result<Arc<dyn Session>> {
        let (id, connected) = {
            let mut state = self.lock();
            state.next_session += 1;
            let id = SessionId(state.next_session);
            let connected = !state.unreachable;
            state.sessions.insert(
                id,
                SessionEntry {
                    sink: sink.clone(),
                    link: if connected {
                        LinkState::Connected
                    } else {
                        LinkState::Connecting
                    },
                    watches: HashSet::new(),
                },
            );
            (id, connected)
        };
        tracing::debug!(session = %id, address, ?timeout, "local session opened");
        if connected {
            sink.session_event(id, SessionEvent::Connected);
        }
        Ok(Arc::new(LocalSession {
            id,
            ensemble: self.clone(),
        }))
    }
}

struct LocalSession {
    id: SessionId,
    ensemble: LocalEnsemble,
}

impl LocalSession {
    fn record(state: &mut EnsembleState, id: SessionId, kind: OpKind, path: &str) {
        state.ops.push(OpRecord {
            session: Some(id),
            kind,
            path: path.to_string(),
        });
    }
}

impl Session for LocalSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn create_ephemeral(&self, path: &str, data: Vec<u8>) {
        let (sink, code) = {
            let mut state = self.ensemble.lock();
            let Some(sink) = state.sink(self.id) else {
                return;
            };
            Self::record(&mut state, self.id, OpKind::Create, path);
            let code = match (state.link_code(self.id), state.failing_creates.clone()) {
                (Some(code), _) | (None, Some(code)) => code,
                (None, None) => {
                    let applied = !state.nodes.contains_key(path);
                    if applied {
                        state.nodes.insert(
                            path.to_string(),
                            Znode {
                                data,
                                owner: Some(self.id),
                            },
                        );
                    }
                    if state.lost_create_replies > 0 {
                        state.lost_create_replies -= 1;
                        ResultCode::ConnectionLoss
                    } else if applied {
                        ResultCode::Ok
                    } else {
                        ResultCode::NodeExists
                    }
                }
            };
            (sink, code)
        };
        sink.completion(self.id, Completion::Create { code });
    }

    fn get_data(&self, path: &str, watch: bool, purpose: ReadPurpose) {
        let (sink, code, data) = {
            let mut state = self.ensemble.lock();
            let Some(sink) = state.sink(self.id) else {
                return;
            };
            Self::record(&mut state, self.id, OpKind::GetData, path);
            match state.link_code(self.id) {
                Some(code) => (sink, code, None),
                None => match state.nodes.get(path).map(|node| node.data.clone()) {
                    Some(data) => {
                        if watch {
                            if let Some(entry) = state.sessions.get_mut(&self.id) {
                                entry.watches.insert(path.to_string());
                            }
                        }
                        (sink, ResultCode::Ok, Some(data))
                    }
                    None => (sink, ResultCode::NoNode, None),
                },
            }
        };
        sink.completion(
            self.id,
            Completion::GetData {
                purpose,
                code,
                data,
            },
        );
    }

    fn exists_watch(&self, path: &str) {
        let (sink, code) = {
            let mut state = self.ensemble.lock();
            let Some(sink) = state.sink(self.id) else {
                return;
            };
            Self::record(&mut state, self.id, OpKind::Exists, path);
            let code = match state.link_code(self.id) {
                Some(code) => code,
                None if state.nodes.contains_key(path) => {
                    if let Some(entry) = state.sessions.get_mut(&self.id) {
                        entry.watches.insert(path.to_string());
                    }
                    ResultCode::Ok
                }
                None => ResultCode::NoNode,
            };
            (sink, code)
        };
        sink.completion(self.id, Completion::Exists { code });
    }

    fn delete(&self, path: &str) {
        let mut outbox = Outbox::new();
        {
            let mut state = self.ensemble.lock();
            let Some(sink) = state.sink(self.id) else {
                return;
            };
            Self::record(&mut state, self.id, OpKind::Delete, path);
            let code = match state.link_code(self.id) {
                Some(code) => code,
                None if state.remove_node(path, &mut outbox) => ResultCode::Ok,
                None => ResultCode::NoNode,
            };
            outbox.push((sink, self.id, Event::Completion(Completion::Delete { code })));
        }
        flush(outbox);
    }

    fn close(&self) {
        let mut outbox = Outbox::new();
        {
            let mut state = self.ensemble.lock();
            let Some(entry) = state.sessions.remove(&self.id) else {
                return;
            };
            // Expiry already released everything the session owned
            if entry.link != LinkState::Expired {
                state.release_ephemerals(self.id, &mut outbox);
            }
        }
        tracing::debug!(session = %self.id, "local session closed");
        flush(outbox);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::Envelope;
    use tokio::sync::mpsc;

    fn open(ensemble: &LocalEnsemble) -> (Arc<dyn Session>, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = ensemble
            .open("local", Duration::from_secs(5), EventSink::channel(tx))
            .unwrap();
        (session, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            events.push(envelope.event);
        }
        events
    }

    fn create_code(events: &[Event]) -> Option<ResultCode> {
        events.iter().find_map(|event| match event {
            Event::Completion(Completion::Create { code }) => Some(code.clone()),
            _ => None,
        })
    }

    #[test]
    fn test_create_is_exclusive() {
        let ensemble = LocalEnsemble::new();
        let (a, mut a_rx) = open(&ensemble);
        let (b, mut b_rx) = open(&ensemble);

        a.create_ephemeral("/leader", b"a".to_vec());
        b.create_ephemeral("/leader", b"b".to_vec());

        assert_eq!(create_code(&drain(&mut a_rx)), Some(ResultCode::Ok));
        assert_eq!(create_code(&drain(&mut b_rx)), Some(ResultCode::NodeExists));
        assert_eq!(ensemble.data("/leader"), Some(b"a".to_vec()));
        assert_eq!(ensemble.owner("/leader"), Some(a.id()));
    }

    #[test]
    fn test_expiry_releases_ephemeral_and_fires_watch_once() {
        let ensemble = LocalEnsemble::new();
        let (a, mut a_rx) = open(&ensemble);
        let (b, mut b_rx) = open(&ensemble);

        a.create_ephemeral("/leader", b"a".to_vec());
        b.exists_watch("/leader");
        b.exists_watch("/leader");
        drain(&mut b_rx);

        ensemble.expire_session(a.id());

        assert!(ensemble.data("/leader").is_none());
        assert!(drain(&mut a_rx).contains(&Event::Session(SessionEvent::Expired)));
        let fired: Vec<Event> = drain(&mut b_rx)
            .into_iter()
            .filter(|event| matches!(event, Event::Session(SessionEvent::NodeDeleted(_))))
            .collect();
        assert_eq!(fired.len(), 1);
        assert!(ensemble.watchers("/leader").is_empty());
    }

    #[test]
    fn test_unreachable_delays_connect() {
        let ensemble = LocalEnsemble::new();
        ensemble.set_reachable(false);
        let (session, mut rx) = open(&ensemble);
        assert!(drain(&mut rx).is_empty());

        session.create_ephemeral("/leader", b"a".to_vec());
        assert_eq!(
            create_code(&drain(&mut rx)),
            Some(ResultCode::ConnectionLoss)
        );
        assert!(ensemble.data("/leader").is_none());

        ensemble.set_reachable(true);
        assert_eq!(drain(&mut rx), vec![Event::Session(SessionEvent::Connected)]);
    }

    #[test]
    fn test_lost_reply_still_applies_create() {
        let ensemble = LocalEnsemble::new();
        let (session, mut rx) = open(&ensemble);
        ensemble.fail_next_create_replies(1);

        session.create_ephemeral("/leader", b"a".to_vec());
        assert_eq!(
            create_code(&drain(&mut rx)),
            Some(ResultCode::ConnectionLoss)
        );
        assert_eq!(ensemble.owner("/leader"), Some(session.id()));
    }

    #[test]
    fn test_close_is_idempotent() {
        let ensemble = LocalEnsemble::new();
        let (session, _rx) = open(&ensemble);
        session.create_ephemeral("/leader", b"a".to_vec());

        session.close();
        session.close();

        assert!(!ensemble.is_open(session.id()));
        assert!(ensemble.data("/leader").is_none());
    }

    #[test]
    fn test_failed_creates_leave_no_node() {
        let ensemble = LocalEnsemble::new();
        let (session, mut rx) = open(&ensemble);
        ensemble.fail_creates(Some(ResultCode::NoNode));

        session.create_ephemeral("/scheduler/leader", b"a".to_vec());
        assert_eq!(create_code(&drain(&mut rx)), Some(ResultCode::NoNode));
        assert!(ensemble.data("/scheduler/leader").is_none());

        ensemble.fail_creates(None);
        session.create_ephemeral("/scheduler/leader", b"a".to_vec());
        assert_eq!(create_code(&drain(&mut rx)), Some(ResultCode::Ok));
        assert_eq!(ensemble.count_ops(session.id(), OpKind::Create), 2);
    }

    #[test]
    fn test_closed_sessions_are_dropped() {
        let ensemble = LocalEnsemble::new();
        let (a, _a_rx) = open(&ensemble);
        let (b, _b_rx) = open(&ensemble);
        assert_eq!(ensemble.session_count(), 2);

        a.close();
        assert_eq!(ensemble.session_count(), 1);

        // Expired sessions stay until their owner closes them
        ensemble.expire_session(b.id());
        assert_eq!(ensemble.session_count(), 1);
        b.close();
        assert_eq!(ensemble.session_count(), 0);
        assert!(!ensemble.is_open(b.id()));
    }

    #[test]
    fn test_requests_after_expiry_report_expired() {
        let ensemble = LocalEnsemble::new();
        let (session, mut rx) = open(&ensemble);
        ensemble.expire_session(session.id());
        drain(&mut rx);

        session.create_ephemeral("/leader", b"a".to_vec());
        assert_eq!(
            create_code(&drain(&mut rx)),
            Some(ResultCode::SessionExpired)
        );
    }
}
