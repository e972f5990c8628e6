//! # warden
//!
//! Leader election and failover for a multi-node job scheduling cluster:
//! - Exactly one node holds an ephemeral election node in a ZooKeeper-style
//!   coordination service and is allowed to dispatch jobs
//! - The designated primary reclaims leadership from a backup
//! - Session expiry closes the gate and restarts the session
//! - One alert per outage when the coordination service is unreachable
//!
//! ## Architecture
//!
//! ```text
//!   coordination client callbacks        supervisor commands
//!               │                                │
//!               └──────────┐          ┌──────────┘
//!                          ▼          ▼
//!                      ┌──────────────────┐
//!                      │  reactor queue   │  (epoch-stamped)
//!                      └────────┬─────────┘
//!                               ▼
//!                      ┌──────────────────┐       ┌──────────────────┐
//!                      │     Elector      │──────▶│ LeadershipGate   │
//!                      │  state machine   │       │ (scheduler reads)│
//!                      └──────────────────┘       └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! warden serve --config warden.toml --identity 10.0.0.5 --primary
//! warden demo
//! warden check-config --config warden.toml
//! ```

pub mod alert;
pub mod common;
pub mod coordination;
pub mod coordinator;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::{Coordinator, CoordinatorHandle, LeadershipGate, LeadershipState};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
