//! ZooKeeper backend
//!
//! The `zookeeper` client is blocking, so each session owns one worker thread
//! that connects and then executes requests in issue order. Replies, connection
//! state changes and watch fires are pushed into the session's [`EventSink`].

use super::{
    Completion, Connector, EventSink, ReadPurpose, ResultCode, Session, SessionEvent, SessionId,
};
use crate::common::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use zookeeper::{
    Acl, CreateMode, KeeperState, WatchedEvent, WatchedEventType, Watcher, ZkError, ZooKeeper,
};

fn code_of(err: ZkError) -> ResultCode {
    match err {
        ZkError::NodeExists => ResultCode::NodeExists,
        ZkError::NoNode => ResultCode::NoNode,
        ZkError::ConnectionLoss | ZkError::OperationTimeout => ResultCode::ConnectionLoss,
        ZkError::SessionExpired => ResultCode::SessionExpired,
        other => ResultCode::Other(format!("{:?}", other)),
    }
}

fn deletion_of(event: &WatchedEvent) -> Option<SessionEvent> {
    match (&event.event_type, &event.path) {
        (WatchedEventType::NodeDeleted, Some(path)) => {
            Some(SessionEvent::NodeDeleted(path.clone()))
        }
        _ => None,
    }
}

/// Default watcher: connection state plus any watch armed with `watch = true`
struct SessionWatcher {
    id: SessionId,
    sink: EventSink,
}

impl Watcher for SessionWatcher {
    fn handle(&self, event: WatchedEvent) {
        tracing::debug!(session = %self.id, ?event, "zookeeper event");
        let mapped = match event.event_type {
            WatchedEventType::None => match event.keeper_state {
                KeeperState::SyncConnected => Some(SessionEvent::Connected),
                KeeperState::Disconnected => Some(SessionEvent::Disconnected),
                KeeperState::Expired => Some(SessionEvent::Expired),
                _ => None,
            },
            _ => deletion_of(&event),
        };
        if let Some(mapped) = mapped {
            self.sink.session_event(self.id, mapped);
        }
    }
}

enum Request {
    Create { path: String, data: Vec<u8> },
    GetData { path: String, watch: bool, purpose: ReadPurpose },
    Exists { path: String },
    Delete { path: String },
    Close,
}

/// Opens ZooKeeper sessions
#[derive(Default)]
pub struct ZkConnector {
    next_id: AtomicU64,
}

impl ZkConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for ZkConnector {
    fn open(&self, address: &str, timeout: Duration, sink: EventSink) -> Result<Arc<dyn Session>> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::channel();
        let address = address.to_string();
        std::thread::Builder::new()
            .name(format!("zk-session-{}", id.0))
            .spawn(move || run_session(id, address, timeout, sink, rx))
            .map_err(|e| Error::ConnectionFailed(format!("spawn session worker: {}", e)))?;
        Ok(Arc::new(ZkSession {
            id,
            tx,
            closed: AtomicBool::new(false),
        }))
    }
}

fn run_session(
    id: SessionId,
    address: String,
    timeout: Duration,
    sink: EventSink,
    rx: mpsc::Receiver<Request>,
) {
    let watcher = SessionWatcher {
        id,
        sink: sink.clone(),
    };
    let zk = match ZooKeeper::connect(&address, timeout, watcher) {
        Ok(zk) => zk,
        Err(e) => {
            tracing::error!(session = %id, address = %address, error = ?e, "zookeeper connect failed");
            // Nothing will ever connect on this handle; let the supervisor restart it.
            sink.session_event(id, SessionEvent::Expired);
            return;
        }
    };

    while let Ok(request) = rx.recv() {
        match request {
            Request::Create { path, data } => {
                let code = match zk.create(
                    &path,
                    data,
                    Acl::open_unsafe().clone(),
                    CreateMode::Ephemeral,
                ) {
                    Ok(_) => ResultCode::Ok,
                    Err(e) => code_of(e),
                };
                sink.completion(id, Completion::Create { code });
            }
            Request::GetData {
                path,
                watch,
                purpose,
            } => {
                let (code, data) = match zk.get_data(&path, watch) {
                    Ok((data, _stat)) => (ResultCode::Ok, Some(data)),
                    Err(e) => (code_of(e), None),
                };
                sink.completion(
                    id,
                    Completion::GetData {
                        purpose,
                        code,
                        data,
                    },
                );
            }
            Request::Exists { path } => {
                let watch_sink = sink.clone();
                let code = match zk.exists_w(&path, move |event: WatchedEvent| {
                    if let Some(deleted) = deletion_of(&event) {
                        watch_sink.session_event(id, deleted);
                    }
                }) {
                    Ok(Some(_)) => ResultCode::Ok,
                    Ok(None) => ResultCode::NoNode,
                    Err(e) => code_of(e),
                };
                sink.completion(id, Completion::Exists { code });
            }
            Request::Delete { path } => {
                let code = match zk.delete(&path, None) {
                    Ok(()) => ResultCode::Ok,
                    Err(e) => code_of(e),
                };
                sink.completion(id, Completion::Delete { code });
            }
            Request::Close => break,
        }
    }

    if let Err(e) = zk.close() {
        tracing::warn!(session = %id, error = ?e, "zookeeper close failed");
    }
}

struct ZkSession {
    id: SessionId,
    tx: mpsc::Sender<Request>,
    closed: AtomicBool,
}

impl ZkSession {
    fn submit(&self, request: Request) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if self.tx.send(request).is_err() {
            tracing::debug!(session = %self.id, "request dropped, session worker gone");
        }
    }
}

impl Session for ZkSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn create_ephemeral(&self, path: &str, data: Vec<u8>) {
        self.submit(Request::Create {
            path: path.to_string(),
            data,
        });
    }

    fn get_data(&self, path: &str, watch: bool, purpose: ReadPurpose) {
        self.submit(Request::GetData {
            path: path.to_string(),
            watch,
            purpose,
        });
    }

    fn exists_watch(&self, path: &str) {
        self.submit(Request::Exists {
            path: path.to_string(),
        });
    }

    fn delete(&self, path: &str) {
        self.submit(Request::Delete {
            path: path.to_string(),
        });
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Request::Close);
        }
    }
}
