//! Failover between the designated primary and backups

mod test_harness;

use std::time::Duration;
use test_harness::*;
use warden::coordination::local::OpKind;
use warden::coordination::LocalEnsemble;
use warden::LeadershipState;

const SETTLE: Duration = Duration::from_secs(5);

fn deletes(ensemble: &LocalEnsemble) -> Vec<Option<warden::coordination::SessionId>> {
    ensemble
        .ops()
        .into_iter()
        .filter(|op| op.kind == OpKind::Delete && op.path == PATH)
        .map(|op| op.session)
        .collect()
}

#[tokio::test]
async fn test_primary_backup_failover_scenario() {
    let ensemble = LocalEnsemble::new();

    let a = Node::spawn(&ensemble, "node-a", true);
    assert!(wait_until(SETTLE, || a.is_leader()).await);
    let b = Node::spawn(&ensemble, "node-b", false);
    assert!(wait_until(SETTLE, || b.handle.gate().state() == LeadershipState::NotElected).await);
    assert!(ensemble.watchers(PATH).contains(&b.session().unwrap()));

    // A's session expires: the service drops its claim and B's watch fires
    let first = a.session().unwrap();
    ensemble.expire_session(first);
    assert!(wait_until(SETTLE, || !a.is_leader()).await);
    assert!(wait_until(SETTLE, || b.is_leader() || a.is_leader()).await);

    // A comes back on a new session, deletes B's claim and takes over
    assert!(
        wait_until(SETTLE, || a.is_leader()
            && b.handle.gate().state() == LeadershipState::NotElected)
        .await
    );
    assert_ne!(a.session(), Some(first));
    assert_eq!(holder(&ensemble).as_deref(), Some("node-a"));
    assert_eq!(b.handle.metrics().elections_won.get(), 1);
    assert_eq!(a.handle.metrics().forced_takeovers.get(), 1);
    assert_eq!(b.handle.metrics().forced_demotions.get(), 1);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_only_primary_deletes() {
    let ensemble = LocalEnsemble::new();

    let b1 = Node::spawn(&ensemble, "backup-1", false);
    assert!(wait_until(SETTLE, || b1.is_leader()).await);
    let b2 = Node::spawn(&ensemble, "backup-2", false);
    assert!(wait_until(SETTLE, || b2.handle.gate().state() == LeadershipState::NotElected).await);
    assert!(deletes(&ensemble).is_empty());

    let primary = Node::spawn(&ensemble, "primary", true);
    assert!(wait_until(SETTLE, || primary.is_leader()).await);
    let primary_session = primary.session().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // One delete per conflicting claim the primary ran into, none from backups
    let issued = deletes(&ensemble);
    assert!(!issued.is_empty());
    assert!(issued.iter().all(|session| *session == Some(primary_session)));
    assert_eq!(
        issued.len() as u64,
        primary.handle.metrics().forced_takeovers.get()
    );
    assert!(primary.is_leader());
    let backups = vec![b1, b2];
    assert!(leaders(&backups).is_empty());

    primary.stop().await;
    for node in backups {
        node.stop().await;
    }
}

#[tokio::test]
async fn test_primary_clears_leftover_claim() {
    let ensemble = LocalEnsemble::new();
    // A claim that no live session owns, left behind by a crash
    ensemble.plant(PATH, b"10.0.0.99");

    let primary = Node::spawn(&ensemble, "10.0.0.5", true);
    assert!(wait_until(SETTLE, || primary.is_leader()).await);
    assert_eq!(holder(&ensemble).as_deref(), Some("10.0.0.5"));
    assert_eq!(deletes(&ensemble).len(), 1);

    primary.stop().await;
}

#[tokio::test]
async fn test_backup_waits_behind_leftover_claim() {
    let ensemble = LocalEnsemble::new();
    ensemble.plant(PATH, b"10.0.0.99");

    let backup = Node::spawn(&ensemble, "10.0.0.6", false);
    assert!(
        wait_until(SETTLE, || backup.handle.gate().state() == LeadershipState::NotElected).await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(deletes(&ensemble).is_empty());

    // An operator removes it; the watch brings the backup in
    ensemble.force_delete(PATH);
    assert!(wait_until(SETTLE, || backup.is_leader()).await);

    backup.stop().await;
}

#[tokio::test]
async fn test_expiry_restarts_session_and_reelects() {
    let ensemble = LocalEnsemble::new();
    let node = Node::spawn(&ensemble, "node-a", true);
    assert!(wait_until(SETTLE, || node.is_leader()).await);
    let first = node.session().unwrap();
    let status = node.handle.status();
    let epoch = status.epoch();

    ensemble.expire_session(first);
    assert!(wait_until(SETTLE, || !node.is_leader()).await);
    assert!(wait_until(SETTLE, || node.is_leader() && node.session() != Some(first)).await);
    assert!(status.epoch() > epoch);
    assert_eq!(node.handle.metrics().sessions_expired.get(), 1);
    assert_eq!(node.handle.metrics().sessions_opened.get(), 2);

    node.stop().await;
}

#[tokio::test]
async fn test_promoted_backup_reports_tampered_claim() {
    let ensemble = LocalEnsemble::new();
    let backup = Node::spawn(&ensemble, "node-b", false);
    assert!(wait_until(SETTLE, || backup.is_leader()).await);

    ensemble.overwrite(PATH, b"node-x");
    let metrics = backup.handle.metrics();
    assert!(wait_until(SETTLE, || metrics.consistency_violations.get() > 0).await);
    // Logged, not acted on
    assert!(backup.is_leader());

    backup.stop().await;
}
