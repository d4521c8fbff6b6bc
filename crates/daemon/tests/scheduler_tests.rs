use std::sync::Arc;
use std::time::Duration;

use discovery_core::address::AddressResolver;
use discovery_core::model::{Node, Snapshot};
use discovery_daemon::backend::Backend;
use discovery_daemon::catalog::CatalogEngine;
use discovery_daemon::config::CatalogConfig;
use discovery_daemon::leader;
use discovery_daemon::memory::InMemoryCatalog;
use discovery_daemon::scheduler::{Scheduler, SchedulerError};
use discovery_daemon::snapshot::StaticSnapshotProvider;
use tokio::time::timeout;

const REFRESH: Duration = Duration::from_secs(100);
const LEADER_TIMEOUT: Duration = Duration::from_secs(30);

fn snapshot() -> Snapshot {
    Snapshot {
        leader: "master@10.0.0.1:5050".to_string(),
        nodes: vec![Node {
            id: "S0".to_string(),
            host: "10.0.0.1".to_string(),
            port: "5051".to_string(),
            hostname: "a.example".to_string(),
            master: true,
        }],
        frameworks: Vec::new(),
    }
}

fn masters() -> Vec<String> {
    vec!["10.0.0.1:5050".to_string()]
}

fn scheduler(provider: StaticSnapshotProvider, backends: Vec<Backend>) -> Scheduler<StaticSnapshotProvider> {
    Scheduler::new(provider, backends, REFRESH, LEADER_TIMEOUT)
}

#[tokio::test(start_paused = true)]
async fn test_leader_change_and_ticks_trigger_cycles() {
    let mut sched = scheduler(StaticSnapshotProvider::new(snapshot()), Vec::new());
    let res = timeout(Duration::from_secs(250), sched.run(leader::static_leaders(masters()))).await;
    assert!(res.is_err(), "loop should still be running");
    // Leader announcement, then ticks at 100s and 200s.
    assert_eq!(sched.cycles(), 3);
    assert_eq!(sched.provider().fetches(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_missing_leader_times_out() {
    let (_tx, events) = leader::channel(1);
    let mut sched = scheduler(StaticSnapshotProvider::new(snapshot()), Vec::new());
    let res = timeout(Duration::from_secs(60), sched.run(events)).await;
    assert!(matches!(res, Ok(Err(SchedulerError::LeaderTimeout(d))) if d == LEADER_TIMEOUT));
}

#[tokio::test(start_paused = true)]
async fn test_losing_the_leader_rearms_the_timer() {
    let (tx, events) = leader::channel(4);
    tx.changes.send(masters()).await.unwrap();
    tx.changes.send(Vec::new()).await.unwrap();
    let mut sched = scheduler(StaticSnapshotProvider::new(snapshot()), Vec::new());
    let res = timeout(Duration::from_secs(60), sched.run(events)).await;
    assert!(matches!(res, Ok(Err(SchedulerError::LeaderTimeout(_)))));
    assert_eq!(sched.cycles(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_waits_forever() {
    let (_tx, events) = leader::channel(1);
    let mut sched = Scheduler::new(
        StaticSnapshotProvider::new(snapshot()),
        Vec::new(),
        REFRESH,
        Duration::ZERO,
    );
    assert!(timeout(Duration::from_secs(450), sched.run(events)).await.is_err());
    // Ticks still run; without a leader every fetch fails.
    assert_eq!(sched.cycles(), 4);
    assert_eq!(sched.provider().fetches(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_detector_error_stops_the_loop() {
    let (tx, events) = leader::channel(1);
    tx.fatal.send("zookeeper session expired".to_string()).await.unwrap();
    let mut sched = scheduler(StaticSnapshotProvider::new(snapshot()), Vec::new());
    let res = sched.run(events).await;
    assert!(matches!(res, Err(SchedulerError::Fatal(reason)) if reason.contains("zookeeper")));
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_failure_keeps_previous_records() {
    let catalog = InMemoryCatalog::new();
    catalog.add_member("a", "10.0.0.1");
    let engine = CatalogEngine::new(
        Arc::new(catalog.clone()),
        CatalogConfig::default(),
        AddressResolver::default(),
    );
    let provider = StaticSnapshotProvider::default();
    let mut sched = scheduler(provider, vec![Backend::Catalog(engine)]);
    let window = Duration::from_secs(10);

    let _ = timeout(window, sched.run(leader::static_leaders(masters()))).await;
    assert!(catalog.services("10.0.0.1").is_empty());

    sched.provider().set(Some(snapshot()));
    let _ = timeout(window, sched.run(leader::static_leaders(masters()))).await;
    assert_eq!(catalog.service_ids("10.0.0.1"), vec!["mesos-dns:S0"]);

    sched.provider().set(None);
    let _ = timeout(window, sched.run(leader::static_leaders(masters()))).await;
    assert_eq!(catalog.service_ids("10.0.0.1"), vec!["mesos-dns:S0"]);
    assert_eq!(sched.provider().fetches(), 3);
}
