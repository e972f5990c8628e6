//! Event reactor
//!
//! Client callbacks and supervisor commands all land in one queue, and this
//! task applies them to the [`Elector`] one at a time. Events are stamped with
//! the supervisor epoch they were produced under; anything from an earlier
//! epoch, or a reply arriving after the current session expired, is dropped.

use crate::alert::Alerter;
use crate::common::ElectionMetrics;
use crate::coordination::{Envelope, Event, EventSink, Session, SessionEvent};
use crate::coordinator::election::Elector;
use crate::coordinator::session::SessionStatus;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub enum Message {
    /// Delivered by the coordination client
    Event { epoch: u64, envelope: Envelope },
    /// A session was opened for `epoch`
    Attach {
        epoch: u64,
        session: Arc<dyn Session>,
    },
    /// The session for `epoch` is connected; run for leader
    Enroll { epoch: u64 },
    /// The session for `epoch` is being closed
    Detach { epoch: u64 },
}

/// Sink that feeds client callbacks for `epoch` into the reactor queue
pub fn sink_for(tx: mpsc::UnboundedSender<Message>, epoch: u64) -> EventSink {
    EventSink::new(move |envelope| {
        let _ = tx.send(Message::Event { epoch, envelope });
    })
}

pub struct Reactor {
    elector: Elector,
    status: Arc<SessionStatus>,
    alerter: Arc<Alerter>,
    metrics: Arc<ElectionMetrics>,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Reactor {
    pub fn new(
        elector: Elector,
        status: Arc<SessionStatus>,
        alerter: Arc<Alerter>,
        metrics: Arc<ElectionMetrics>,
        rx: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            elector,
            status,
            alerter,
            metrics,
            rx,
        }
    }

    pub fn elector(&self) -> &Elector {
        &self.elector
    }

    /// Process messages until cancelled or every sender is gone.
    /// Always leaves the gate closed.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = self.rx.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
            }
        }
        self.elector.detach();
        tracing::debug!(node = %self.elector.settings().identity, "reactor stopped");
    }

    pub fn handle(&mut self, message: Message) {
        let current = self.status.epoch();
        match message {
            Message::Event { epoch, envelope } => {
                if epoch != current {
                    self.metrics.stale_events_dropped.inc();
                    tracing::debug!(
                        epoch,
                        current,
                        session = %envelope.session,
                        event = ?envelope.event,
                        "dropping event from a previous session"
                    );
                    return;
                }
                self.on_event(envelope);
            }
            Message::Attach { epoch, session } => {
                if epoch != current {
                    session.close();
                    return;
                }
                self.status.set_session(session.id());
                self.elector.attach(session);
            }
            Message::Enroll { epoch } => {
                if epoch == current && !self.status.should_restart() {
                    self.elector.enroll();
                }
            }
            Message::Detach { epoch } => {
                if epoch == current {
                    self.elector.detach();
                }
            }
        }
    }

    fn on_event(&mut self, envelope: Envelope) {
        let identity = &self.elector.settings().identity;
        match envelope.event {
            Event::Session(SessionEvent::Connected) => {
                tracing::info!(node = %identity, session = %envelope.session, "connected to coordination service");
                self.status.on_connected();
                self.alerter.resolve();
                self.elector.on_reconnected();
            }
            Event::Session(SessionEvent::Disconnected) => {
                tracing::error!(node = %identity, session = %envelope.session, "disconnected from coordination service");
                self.status.on_disconnected();
                if !self.status.has_connected() {
                    if let Some(waited) = self.status.since_open() {
                        if waited >= self.alerter.threshold() {
                            let alerter = self.alerter.clone();
                            tokio::spawn(async move {
                                alerter.raise(waited).await;
                            });
                        }
                    }
                }
            }
            Event::Session(SessionEvent::Expired) => {
                // Gate first: the supervisor closes the session once it sees the flag
                self.elector.on_expired();
                self.status.on_expired();
            }
            Event::Session(SessionEvent::NodeDeleted(path)) => {
                if self.status.should_restart() {
                    self.metrics.stale_events_dropped.inc();
                    return;
                }
                self.elector.on_node_deleted(&path);
            }
            Event::Completion(completion) => {
                if self.status.should_restart() {
                    self.metrics.stale_events_dropped.inc();
                    tracing::debug!(node = %identity, ?completion, "dropping reply for a dead session");
                    return;
                }
                self.elector.on_completion(completion);
            }
        }
    }
}
