//! Connection supervisor
//!
//! One iteration: open a session, wait until it connects (alerting once the
//! outage passes the configured limit), enroll, wait for expiry or demotion,
//! close, back off. [`Supervisor::run`] repeats that until cancelled.

use crate::alert::Alerter;
use crate::common::{ElectionMetrics, Error, Result, SupervisorConfig};
use crate::coordination::{Connector, Session, SessionId};
use crate::coordinator::reactor::{sink_for, Message};
use crate::coordinator::session::SessionStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How an iteration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// The service expired the session
    Expired,
    /// Our claim was deleted while we held it
    Demoted,
    /// The client could not even start connecting
    OpenFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iteration {
    pub epoch: u64,
    pub session: Option<SessionId>,
    pub teardown: Teardown,
}

pub struct Supervisor {
    connector: Arc<dyn Connector>,
    address: String,
    session_timeout: Duration,
    timings: SupervisorConfig,
    status: Arc<SessionStatus>,
    alerter: Arc<Alerter>,
    metrics: Arc<ElectionMetrics>,
    tx: mpsc::UnboundedSender<Message>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connector: Arc<dyn Connector>,
        address: String,
        session_timeout: Duration,
        timings: SupervisorConfig,
        status: Arc<SessionStatus>,
        alerter: Arc<Alerter>,
        metrics: Arc<ElectionMetrics>,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            connector,
            address,
            session_timeout,
            timings,
            status,
            alerter,
            metrics,
            tx,
        }
    }

    /// Run iterations until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        while let Ok(iteration) = self.run_once(&cancel).await {
            tracing::debug!(?iteration, "supervisor iteration finished");
        }
        tracing::debug!(address = %self.address, "supervisor stopped");
    }

    /// Run at most `n` iterations; returns how many completed
    pub async fn run_iterations(&self, n: usize, cancel: &CancellationToken) -> Vec<Iteration> {
        let mut done = Vec::with_capacity(n);
        for _ in 0..n {
            match self.run_once(cancel).await {
                Ok(iteration) => done.push(iteration),
                Err(_) => break,
            }
        }
        done
    }

    /// One full session lifecycle. `Err(Error::Shutdown)` when cancelled.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<Iteration> {
        if cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }
        let epoch = self.status.begin();
        let sink = sink_for(self.tx.clone(), epoch);

        let session = match self.connector.open(&self.address, self.session_timeout, sink) {
            Ok(session) => session,
            Err(e) => {
                self.metrics.session_open_failures.inc();
                if e.is_retryable() {
                    tracing::warn!(address = %self.address, error = %e, "failed to open coordination session");
                } else {
                    tracing::error!(address = %self.address, error = %e, "cannot open coordination session, retrying anyway");
                }
                self.check_outage();
                self.pause(self.timings.restart_backoff, cancel).await?;
                return Ok(Iteration {
                    epoch,
                    session: None,
                    teardown: Teardown::OpenFailed,
                });
            }
        };
        self.metrics.sessions_opened.inc();
        let session_id = session.id();
        tracing::info!(address = %self.address, session = %session_id, epoch, "coordination session opened");
        let _ = self.tx.send(Message::Attach {
            epoch,
            session: session.clone(),
        });

        // Wait for the connection; the only candidate is us, so never give up
        while !self.status.is_connected() && !self.status.should_restart() {
            self.check_outage();
            if self.pause(self.timings.connect_poll_interval, cancel).await.is_err() {
                self.teardown(epoch, &session);
                return Err(Error::Shutdown);
            }
        }

        if !self.status.should_restart() {
            let _ = self.tx.send(Message::Enroll { epoch });
        }

        while !self.status.should_restart() {
            self.check_outage();
            if self.pause(self.timings.expiry_poll_interval, cancel).await.is_err() {
                self.teardown(epoch, &session);
                return Err(Error::Shutdown);
            }
        }

        let teardown = if self.status.is_expired() {
            Teardown::Expired
        } else {
            Teardown::Demoted
        };
        tracing::warn!(session = %session_id, ?teardown, "restarting coordination session");
        self.teardown(epoch, &session);
        self.pause(self.timings.restart_backoff, cancel).await?;

        Ok(Iteration {
            epoch,
            session: Some(session_id),
            teardown,
        })
    }

    fn teardown(&self, epoch: u64, session: &Arc<dyn Session>) {
        let _ = self.tx.send(Message::Detach { epoch });
        session.close();
    }

    /// Alert off the poll loop; a slow mail relay must not hold up teardown
    fn check_outage(&self) {
        let Some(outage) = self.status.outage() else {
            return;
        };
        if outage < self.alerter.threshold() || !self.alerter.is_armed() {
            return;
        }
        let alerter = self.alerter.clone();
        tokio::spawn(async move {
            alerter.raise(outage).await;
        });
    }

    async fn pause(&self, duration: Duration, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Shutdown),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
