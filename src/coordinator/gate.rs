//! Leadership gate shared with the scheduling loop
//!
//! The gate and the leadership state live in one atomic cell, so "the gate is
//! open" and "the state is `Elected`" can never be observed apart. The
//! [`LeadershipSwitch`] is the only writer and is owned by the election
//! reactor; any number of [`LeadershipGate`] clones read it.

use crate::coordinator::state::LeadershipState;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Read side: cheap to clone, cheap to check
#[derive(Clone, Debug)]
pub struct LeadershipGate {
    cell: Arc<AtomicU8>,
    state_rx: watch::Receiver<LeadershipState>,
}

impl LeadershipGate {
    /// A closed gate in state `Running`, plus its single writer
    pub fn new() -> (LeadershipGate, LeadershipSwitch) {
        let cell = Arc::new(AtomicU8::new(LeadershipState::Running.to_u8()));
        let (state_tx, state_rx) = watch::channel(LeadershipState::Running);
        (
            LeadershipGate {
                cell: Arc::clone(&cell),
                state_rx,
            },
            LeadershipSwitch { cell, state_tx },
        )
    }

    /// True while this node may dispatch scheduled work
    pub fn is_leader(&self) -> bool {
        self.state().is_leader()
    }

    pub fn state(&self) -> LeadershipState {
        LeadershipState::from_u8(self.cell.load(Ordering::Acquire))
    }

    /// Transition notifications, for reacting to elections (e.g. reloading triggers)
    pub fn subscribe(&self) -> watch::Receiver<LeadershipState> {
        self.state_rx.clone()
    }

    /// Resolve once this node is elected
    pub async fn wait_for_leadership(&self) {
        self.wait_for(LeadershipState::is_leader).await;
    }

    /// Resolve once the state satisfies `predicate`; returns that state
    pub async fn wait_for<F>(&self, mut predicate: F) -> LeadershipState
    where
        F: FnMut(&LeadershipState) -> bool,
    {
        let mut rx = self.state_rx.clone();
        let reached = match rx.wait_for(|state| predicate(state)).await {
            Ok(state) => *state,
            // Switch dropped: the coordinator is gone, report what is left
            Err(_) => self.state(),
        };
        reached
    }
}

/// Write side of the gate
#[derive(Debug)]
pub struct LeadershipSwitch {
    cell: Arc<AtomicU8>,
    state_tx: watch::Sender<LeadershipState>,
}

impl LeadershipSwitch {
    /// Move to `state`; returns the previous state
    pub fn set(&self, state: LeadershipState) -> LeadershipState {
        let previous = LeadershipState::from_u8(self.cell.swap(state.to_u8(), Ordering::AcqRel));
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        previous
    }

    pub fn state(&self) -> LeadershipState {
        LeadershipState::from_u8(self.cell.load(Ordering::Acquire))
    }
}
