//! Leader election for the scheduling cluster
//!
//! The coordinator is responsible for:
//! - Claiming the election node and tracking who holds it
//! - Keeping the leadership gate in step with the claim
//! - Restarting the coordination session when it expires
//! - Alerting when the coordination service stays unreachable
//! - Consistency checks on a backup that became leader

pub mod dispatch;
pub mod election;
pub mod gate;
pub mod http;
pub mod monitor;
pub mod reactor;
pub mod server;
pub mod session;
pub mod state;
pub mod supervisor;

pub use dispatch::run_gated;
pub use election::{ElectionSettings, Elector};
pub use gate::{LeadershipGate, LeadershipSwitch};
pub use server::{Coordinator, CoordinatorHandle, CoordinatorParts};
pub use session::{SessionStatus, StatusSnapshot};
pub use state::LeadershipState;
pub use supervisor::{Iteration, Supervisor, Teardown};
