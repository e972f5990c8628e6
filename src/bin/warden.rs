//! Warden binary

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden::alert::{Alerter, LogMailer};
use warden::common::{Config, Overrides};
use warden::coordination::{Connector, LocalEnsemble};
use warden::{Coordinator, CoordinatorHandle, LeadershipGate};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Leader election and failover for the job scheduler", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run for leader and hold the gate until stopped
    Serve {
        /// Config file (TOML)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Identity written into the election node
        #[arg(long)]
        identity: Option<String>,

        /// Act as the designated primary
        #[arg(long)]
        primary: bool,

        /// Coordination service address
        #[arg(long)]
        address: Option<String>,

        /// Election node path
        #[arg(long)]
        path: Option<String>,
    },

    /// Walk through a failover between a primary and a backup in-process
    Demo {
        /// Pause between steps
        #[arg(long, default_value = "1s", value_parser = parse_step)]
        step: Duration,
    },

    /// Load and validate a config file, then print the effective settings
    CheckConfig {
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

fn parse_step(s: &str) -> Result<Duration, String> {
    warden::common::parse_duration(s).map_err(|e| e.to_string())
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            identity,
            primary,
            address,
            path,
        } => {
            let overrides = Overrides {
                address,
                path,
                identity,
                // Flag only ever promotes; absence leaves the file value alone
                primary: primary.then_some(true),
            };
            let config = Config::load_with(config.as_deref(), &overrides)
                .context("failed to load configuration")?;
            init_tracing(&config.log_level);

            let connector = connector()?;
            let mailer = Alerter::mailer_for(&config.alert)?;
            let shutdown = install_shutdown_handler()?;
            Coordinator::new(config, connector, mailer)
                .serve(shutdown)
                .await?;
        }
        Commands::Demo { step } => {
            init_tracing("info");
            demo(step).await?;
        }
        Commands::CheckConfig { config } => {
            let config = Config::load(config.as_deref()).context("invalid configuration")?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

#[cfg(feature = "zookeeper")]
fn connector() -> anyhow::Result<Arc<dyn Connector>> {
    Ok(Arc::new(warden::coordination::ZkConnector::new()))
}

#[cfg(not(feature = "zookeeper"))]
fn connector() -> anyhow::Result<Arc<dyn Connector>> {
    anyhow::bail!("built without ZooKeeper support; rebuild with `--features zookeeper`")
}

/// Cancel the returned token on SIGTERM or SIGINT
fn install_shutdown_handler() -> anyhow::Result<CancellationToken> {
    use tokio::signal::unix::{signal, SignalKind};

    let token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
            _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown"),
        }
        cancel.cancel();
    });
    Ok(token)
}

fn demo_node(ensemble: &LocalEnsemble, identity: &str, primary: bool) -> CoordinatorHandle {
    let mut config = Config::new("local", "/scheduler/leader", identity, primary);
    config.supervisor.connect_poll_interval = Duration::from_millis(20);
    config.supervisor.expiry_poll_interval = Duration::from_millis(50);
    config.supervisor.restart_backoff = Duration::from_millis(200);
    Coordinator::new(config, ensemble.connector(), Arc::new(LogMailer)).start()
}

fn report(ensemble: &LocalEnsemble, nodes: &[(&str, &LeadershipGate)]) {
    let holder = ensemble
        .data("/scheduler/leader")
        .map(|d| String::from_utf8_lossy(&d).into_owned())
        .unwrap_or_else(|| "<none>".into());
    for (name, gate) in nodes {
        println!("  {:<8} {}", name, gate.state());
    }
    println!("  election node held by {}", holder);
}

async fn demo(step: Duration) -> anyhow::Result<()> {
    let ensemble = LocalEnsemble::new();

    println!("1. backup starts alone");
    let backup = demo_node(&ensemble, "backup", false);
    backup.gate().wait_for_leadership().await;
    tokio::time::sleep(step).await;
    report(&ensemble, &[("backup", &backup.gate())]);

    println!("2. primary starts and takes over");
    let primary = demo_node(&ensemble, "primary", true);
    primary.gate().wait_for_leadership().await;
    tokio::time::sleep(step).await;
    report(&ensemble, &[("primary", &primary.gate()), ("backup", &backup.gate())]);

    println!("3. primary's session expires");
    if let Some(id) = primary.status().session() {
        ensemble.expire_session(id);
    }
    backup.gate().wait_for_leadership().await;
    report(&ensemble, &[("primary", &primary.gate()), ("backup", &backup.gate())]);

    println!("4. primary reconnects and reclaims");
    primary.gate().wait_for_leadership().await;
    tokio::time::sleep(step).await;
    report(&ensemble, &[("primary", &primary.gate()), ("backup", &backup.gate())]);

    primary.stop().await;
    backup.stop().await;
    Ok(())
}
