//! Gated scheduling loop
//!
//! The job scheduler itself lives elsewhere; this is the loop shape it runs
//! in. Each tick consults the gate and only runs a dispatch cycle while this
//! node is the elected leader.

use crate::coordinator::gate::LeadershipGate;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Run `cycle` once per `interval` while the gate is open.
/// Returns the number of cycles run when `cancel` fires.
pub async fn run_gated<F, Fut>(
    gate: LeadershipGate,
    interval: Duration,
    cancel: CancellationToken,
    mut cycle: F,
) -> u64
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycles = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !gate.is_leader() {
            continue;
        }
        cycle().await;
        cycles += 1;
    }
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::state::LeadershipState;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_cycles_only_while_leader() {
        let (gate, switch) = LeadershipGate::new();
        let cancel = CancellationToken::new();
        let ran = Arc::new(AtomicU64::new(0));

        let task = {
            let ran = ran.clone();
            let cancel = cancel.clone();
            tokio::spawn(run_gated(gate, Duration::from_secs(1), cancel, move || {
                let ran = ran.clone();
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                }
            }))
        };

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        switch.set(LeadershipState::Elected);
        tokio::time::sleep(Duration::from_secs(3)).await;
        let while_leader = ran.load(Ordering::SeqCst);
        assert_eq!(while_leader, 3);

        switch.set(LeadershipState::Running);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(ran.load(Ordering::SeqCst), while_leader);

        cancel.cancel();
        assert_eq!(task.await.unwrap(), 3);
    }
}
