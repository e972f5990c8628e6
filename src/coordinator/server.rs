//! Coordinator wiring and lifecycle

use crate::alert::{Alerter, Mailer};
use crate::common::{Config, ElectionMetrics, Result};
use crate::coordination::Connector;
use crate::coordinator::election::{ElectionSettings, Elector};
use crate::coordinator::gate::LeadershipGate;
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::reactor::Reactor;
use crate::coordinator::session::SessionStatus;
use crate::coordinator::supervisor::Supervisor;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Coordinator {
    config: Config,
    connector: Arc<dyn Connector>,
    mailer: Arc<dyn Mailer>,
}

/// The pieces of a coordinator before anything is spawned
pub struct CoordinatorParts {
    pub reactor: Reactor,
    pub supervisor: Supervisor,
    pub gate: LeadershipGate,
    pub status: Arc<SessionStatus>,
    pub metrics: Arc<ElectionMetrics>,
}

impl Coordinator {
    pub fn new(config: Config, connector: Arc<dyn Connector>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            config,
            connector,
            mailer,
        }
    }

    pub fn build(self) -> CoordinatorParts {
        let metrics = Arc::new(ElectionMetrics::new());
        let status = Arc::new(SessionStatus::new());
        let (gate, switch) = LeadershipGate::new();
        let alerter = Arc::new(Alerter::new(
            &self.config.alert,
            self.config.election.identity.clone(),
            self.mailer,
            metrics.clone(),
        ));
        let (tx, rx) = mpsc::unbounded_channel();

        let elector = Elector::new(
            ElectionSettings::from(&self.config.election),
            switch,
            status.clone(),
            metrics.clone(),
        );
        let reactor = Reactor::new(elector, status.clone(), alerter.clone(), metrics.clone(), rx);
        let supervisor = Supervisor::new(
            self.connector,
            self.config.coordination.address.clone(),
            self.config.coordination.session_timeout,
            self.config.supervisor.clone(),
            status.clone(),
            alerter,
            metrics.clone(),
            tx,
        );

        CoordinatorParts {
            reactor,
            supervisor,
            gate,
            status,
            metrics,
        }
    }

    /// Spawn the reactor and supervisor; must be called inside a Tokio runtime
    pub fn start(self) -> CoordinatorHandle {
        let identity = self.config.election.identity.clone();
        let primary = self.config.election.primary;
        let parts = self.build();
        // Separate tokens: shutdown stops the reactor before the supervisor
        let reactor_cancel = CancellationToken::new();
        let supervisor_cancel = CancellationToken::new();

        let reactor = tokio::spawn(parts.reactor.run(reactor_cancel.clone()));
        let supervisor = {
            let cancel = supervisor_cancel.clone();
            let supervisor = parts.supervisor;
            tokio::spawn(async move { supervisor.run(cancel).await })
        };
        tracing::info!(node = %identity, primary, "coordinator started");

        CoordinatorHandle {
            identity,
            primary,
            gate: parts.gate,
            status: parts.status,
            metrics: parts.metrics,
            reactor_cancel,
            supervisor_cancel,
            reactor,
            supervisor,
        }
    }

    /// Run until `shutdown` fires, with the status endpoint if configured
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!("Starting coordinator: {}", self.config.election.identity);
        tracing::info!("  Coordination service: {}", self.config.coordination.address);
        tracing::info!("  Election node: {}", self.config.election.path);
        tracing::info!("  Designated primary: {}", self.config.election.primary);
        tracing::info!("  Session timeout: {:?}", self.config.coordination.session_timeout);
        tracing::info!("  Max connect wait: {:?}", self.config.alert.max_connect_wait);

        let bind_addr = self.config.http.bind_addr;
        let handle = self.start();

        let http = match bind_addr {
            Some(addr) => {
                let listener = tokio::net::TcpListener::bind(addr).await?;
                tracing::info!("  Status API: {}", addr);
                let router = create_router(handle.state());
                let shutdown = shutdown.clone();
                Some(tokio::spawn(async move {
                    axum::serve(listener, router)
                        .with_graceful_shutdown(async move { shutdown.cancelled().await })
                        .await
                }))
            }
            None => None,
        };

        shutdown.cancelled().await;
        tracing::info!("shutting down coordinator");
        handle.stop().await;

        if let Some(http) = http {
            match http.await {
                Ok(Err(e)) => tracing::error!("HTTP server error: {}", e),
                Err(e) => tracing::error!("HTTP server task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
        Ok(())
    }
}

/// A running coordinator
pub struct CoordinatorHandle {
    identity: String,
    primary: bool,
    gate: LeadershipGate,
    status: Arc<SessionStatus>,
    metrics: Arc<ElectionMetrics>,
    reactor_cancel: CancellationToken,
    supervisor_cancel: CancellationToken,
    reactor: JoinHandle<()>,
    supervisor: JoinHandle<()>,
}

impl CoordinatorHandle {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Gate for the scheduling loop
    pub fn gate(&self) -> LeadershipGate {
        self.gate.clone()
    }

    pub fn status(&self) -> Arc<SessionStatus> {
        self.status.clone()
    }

    pub fn metrics(&self) -> Arc<ElectionMetrics> {
        self.metrics.clone()
    }

    pub fn state(&self) -> CoordState {
        CoordState {
            identity: self.identity.clone(),
            primary: self.primary,
            gate: self.gate.clone(),
            status: self.status.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Stop both tasks, close the live session and leave the gate closed.
    ///
    /// The reactor is stopped and joined first; it closes the gate on exit.
    /// Only then is the supervisor cancelled, which closes the session and
    /// releases the claim.
    pub async fn stop(self) {
        self.reactor_cancel.cancel();
        if let Err(e) = self.reactor.await {
            tracing::error!(node = %self.identity, error = %e, "reactor task failed");
        }
        self.supervisor_cancel.cancel();
        if let Err(e) = self.supervisor.await {
            tracing::error!(node = %self.identity, error = %e, "supervisor task failed");
        }
        tracing::info!(node = %self.identity, "coordinator stopped");
    }
}
