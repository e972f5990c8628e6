//! Configuration for warden nodes
//!
//! Loaded from an optional TOML file, then overridden by `WARDEN_`-prefixed
//! environment variables (nested keys separated by `__`, e.g.
//! `WARDEN_ELECTION__IDENTITY=10.0.0.7`).

use crate::common::utils::{duration_str, split_recipients};
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Coordination service connection
    pub coordination: CoordinationConfig,

    /// Election node and this node's claim
    pub election: ElectionConfig,

    /// Outage notification
    #[serde(default)]
    pub alert: AlertConfig,

    /// Connection supervisor timings
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Optional status endpoint
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Coordination service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Endpoint(s), e.g. `zk1:2181,zk2:2181`
    pub address: String,

    /// Session timeout passed to the client at connect time
    #[serde(with = "duration_str", default = "default_session_timeout")]
    pub session_timeout: Duration,
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Well-known path of the election node
    pub path: String,

    /// Payload written when claiming leadership (IP or hostname)
    pub identity: String,

    /// Designated primary: may force a takeover of a stale claim
    #[serde(default)]
    pub primary: bool,

    /// How often a promoted backup re-reads the election node
    #[serde(with = "duration_str", default = "default_consistency_interval")]
    pub consistency_check_interval: Duration,
}

fn default_consistency_interval() -> Duration {
    Duration::from_secs(10)
}

/// Alerting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Outage length after which a notification goes out
    #[serde(with = "duration_str", default = "default_max_connect_wait")]
    pub max_connect_wait: Duration,

    /// Comma-separated recipient addresses
    #[serde(default)]
    pub recipients: String,

    /// Mail relay endpoint; notifications are only logged when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    #[serde(default = "default_subject")]
    pub subject: String,
}

fn default_max_connect_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_subject() -> String {
    "Coordination service connection failure".to_string()
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            max_connect_wait: default_max_connect_wait(),
            recipients: String::new(),
            webhook_url: None,
            subject: default_subject(),
        }
    }
}

impl AlertConfig {
    pub fn recipient_list(&self) -> Vec<String> {
        split_recipients(&self.recipients)
    }
}

/// Supervisor loop timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Poll interval while waiting for the session to connect
    #[serde(with = "duration_str", default = "default_connect_poll")]
    pub connect_poll_interval: Duration,

    /// Poll interval while waiting for expiry or demotion
    #[serde(with = "duration_str", default = "default_expiry_poll")]
    pub expiry_poll_interval: Duration,

    /// Pause between closing a session and opening the next one
    #[serde(with = "duration_str", default = "default_restart_backoff")]
    pub restart_backoff: Duration,
}

fn default_connect_poll() -> Duration {
    Duration::from_millis(100)
}
fn default_expiry_poll() -> Duration {
    Duration::from_secs(1)
}
fn default_restart_backoff() -> Duration {
    Duration::from_secs(1)
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_poll_interval: default_connect_poll(),
            expiry_poll_interval: default_expiry_poll(),
            restart_backoff: default_restart_backoff(),
        }
    }
}

/// Status endpoint configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_addr: Option<SocketAddr>,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub address: Option<String>,
    pub path: Option<String>,
    pub identity: Option<String>,
    pub primary: Option<bool>,
}

impl Config {
    /// Minimal configuration with defaults for everything optional
    pub fn new(
        address: impl Into<String>,
        path: impl Into<String>,
        identity: impl Into<String>,
        primary: bool,
    ) -> Self {
        Self {
            coordination: CoordinationConfig {
                address: address.into(),
                session_timeout: default_session_timeout(),
            },
            election: ElectionConfig {
                path: path.into(),
                identity: identity.into(),
                primary,
                consistency_check_interval: default_consistency_interval(),
            },
            alert: AlertConfig::default(),
            supervisor: SupervisorConfig::default(),
            http: HttpConfig::default(),
            log_level: default_log_level(),
        }
    }

    /// Load from an optional file plus environment overrides, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, &Overrides::default())
    }

    /// Like [`Config::load`], with command-line values taking priority
    pub fn load_with(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("WARDEN")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("coordination.address", overrides.address.clone())?
            .set_override_option("election.path", overrides.path.clone())?
            .set_override_option("election.identity", overrides.identity.clone())?
            .set_override_option("election.primary", overrides.primary)?
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.coordination.address.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "coordination.address is required".into(),
            ));
        }
        if self.coordination.session_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "coordination.session_timeout must be positive".into(),
            ));
        }
        let path = &self.election.path;
        if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') {
            return Err(Error::InvalidConfig(format!(
                "election.path must be an absolute node path, got {:?}",
                path
            )));
        }
        if self.election.identity.trim().is_empty() {
            return Err(Error::InvalidConfig("election.identity is required".into()));
        }
        if self.election.consistency_check_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "election.consistency_check_interval must be positive".into(),
            ));
        }
        if self.alert.max_connect_wait.is_zero() {
            return Err(Error::InvalidConfig(
                "alert.max_connect_wait must be positive".into(),
            ));
        }
        if self.supervisor.connect_poll_interval.is_zero()
            || self.supervisor.expiry_poll_interval.is_zero()
        {
            return Err(Error::InvalidConfig(
                "supervisor poll intervals must be positive".into(),
            ));
        }
        if self.alert.recipient_list().is_empty() {
            tracing::warn!("alert.recipients is empty; outage alerts will only be logged");
        }
        Ok(())
    }
}
