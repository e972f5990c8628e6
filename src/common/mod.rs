//! Common utilities and types shared across warden

pub mod config;
pub mod error;
pub mod metrics;
pub mod utils;

pub use config::{
    AlertConfig, Config, CoordinationConfig, ElectionConfig, HttpConfig, Overrides, SupervisorConfig,
};
pub use error::{Error, Result};
pub use metrics::{Counter, ElectionMetrics, Gauge};
pub use utils::{format_duration, parse_duration, split_recipients};
