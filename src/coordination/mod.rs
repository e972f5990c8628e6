//! Client-side view of the coordination service
//!
//! The service itself (ZooKeeper or the in-process [`LocalEnsemble`]) is an
//! external primitive offering ephemeral nodes, atomic create, one-shot watches
//! and sessions. Every request on a [`Session`] is fire-and-forget: its result
//! comes back later through the [`EventSink`] handed to [`Connector::open`],
//! stamped with the issuing session's id. Connection state changes and watch
//! notifications travel the same way, so a single consumer sees everything for
//! a session in the order the client observed it.

pub mod local;
#[cfg(feature = "zookeeper")]
pub mod zk;

pub use local::LocalEnsemble;
#[cfg(feature = "zookeeper")]
pub use zk::ZkConnector;

use crate::common::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Client-local handle id; a fresh one is issued for every `open`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Result code of a coordination request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    NodeExists,
    NoNode,
    /// The reply was lost; the request may or may not have been applied
    ConnectionLoss,
    SessionExpired,
    Other(String),
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Ok => write!(f, "ok"),
            ResultCode::NodeExists => write!(f, "node exists"),
            ResultCode::NoNode => write!(f, "no node"),
            ResultCode::ConnectionLoss => write!(f, "connection loss"),
            ResultCode::SessionExpired => write!(f, "session expired"),
            ResultCode::Other(code) => write!(f, "{}", code),
        }
    }
}

/// Why a node's data was read, so the reply can be routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPurpose {
    /// Resolving a create whose reply was lost
    ClaimCheck,
    /// Periodic re-read by a promoted backup
    Consistency,
}

/// Connection-level notifications and watch fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Expired,
    NodeDeleted(String),
}

/// Asynchronous reply to a request issued on a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Create {
        code: ResultCode,
    },
    GetData {
        purpose: ReadPurpose,
        code: ResultCode,
        data: Option<Vec<u8>>,
    },
    /// `Ok` when the node exists, `NoNode` when it does not
    Exists {
        code: ResultCode,
    },
    Delete {
        code: ResultCode,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Session(SessionEvent),
    Completion(Completion),
}

/// An event tagged with the session that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub session: SessionId,
    pub event: Event,
}

/// Where client callbacks deliver their events
///
/// Callbacks may run on the client library's own threads; the sink only
/// enqueues, it never blocks or calls back into the client.
#[derive(Clone)]
pub struct EventSink {
    deliver: Arc<dyn Fn(Envelope) + Send + Sync>,
}

impl EventSink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Sink that forwards into an unbounded channel
    pub fn channel(tx: tokio::sync::mpsc::UnboundedSender<Envelope>) -> Self {
        Self::new(move |envelope| {
            let _ = tx.send(envelope);
        })
    }

    pub fn emit(&self, session: SessionId, event: Event) {
        (self.deliver)(Envelope { session, event });
    }

    pub fn session_event(&self, session: SessionId, event: SessionEvent) {
        self.emit(session, Event::Session(event));
    }

    pub fn completion(&self, session: SessionId, completion: Completion) {
        self.emit(session, Event::Completion(completion));
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// One live connection to the coordination service
pub trait Session: Send + Sync {
    fn id(&self) -> SessionId;

    /// Create an ephemeral node; fails with `NodeExists` if present.
    /// Replies with [`Completion::Create`].
    fn create_ephemeral(&self, path: &str, data: Vec<u8>);

    /// Read a node, optionally arming a deletion watch when it exists.
    /// Replies with [`Completion::GetData`].
    fn get_data(&self, path: &str, watch: bool, purpose: ReadPurpose);

    /// Check existence and arm a deletion watch if the node is present.
    /// Replies with [`Completion::Exists`].
    fn exists_watch(&self, path: &str);

    /// Delete a node regardless of version. Replies with [`Completion::Delete`].
    fn delete(&self, path: &str);

    /// Release the connection. Idempotent.
    fn close(&self);
}

/// Opens sessions against a coordination service
pub trait Connector: Send + Sync {
    /// Begin connecting; returns before the session is established.
    /// `Connected` arrives through `sink` once it is.
    fn open(&self, address: &str, timeout: Duration, sink: EventSink) -> Result<Arc<dyn Session>>;
}
