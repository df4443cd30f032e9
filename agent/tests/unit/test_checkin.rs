//! Checkin adapter tests

use std::sync::Arc;

use serde_json::json;
use trainer_api::models::{AppStatus, Metric};

use hostd::checkin::adapter::CheckinAdapter;
use hostd::errors::AgentError;

use crate::support::{add_change, remove_change, FakeChannel, Harness};

const HOST_METRIC: Metric = Metric {
    cpu_usage_percent: 7,
    memory_usage_bytes: 2048,
    network_rx_bytes: 99,
};

fn adapter(harness: &Harness, channel: Arc<FakeChannel>, max_rounds: u32) -> CheckinAdapter {
    CheckinAdapter::new(
        "edge-1".to_string(),
        channel,
        harness.reconciler.clone(),
        max_rounds,
    )
    .with_host_metrics(|| HOST_METRIC)
}

#[tokio::test]
async fn test_snapshot_contents() {
    let harness = Harness::healthy();
    harness
        .reconciler
        .apply_changes(&crate::support::changes(vec![add_change("c1", "web", "1.0")]))
        .await;
    let adapter = adapter(&harness, Arc::new(FakeChannel::new()), 10);

    let snapshot = adapter.build_snapshot().await;

    assert_eq!(snapshot.state.len(), 1);
    assert_eq!(snapshot.state[0].application.state, AppStatus::Running);
    assert_eq!(snapshot.changes_applied.get("c1"), Some(&true));
    assert_eq!(snapshot.host_metrics, HOST_METRIC);

    let wire = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(wire["ChangesApplied"], json!({"c1": true}));
    assert_eq!(wire["State"][0]["Application"]["State"], "running");
    assert_eq!(wire["HostMetrics"]["CpuUsage"], 7);
}

#[tokio::test]
async fn test_cycle_repolls_after_progress() {
    let harness = Harness::healthy();
    let channel = Arc::new(FakeChannel::with_batches(vec![
        vec![add_change("c1", "web", "1.0")],
        vec![add_change("c2", "db", "5.0")],
    ]));
    let adapter = adapter(&harness, channel.clone(), 10);

    let outcome = adapter.run_cycle().await.unwrap();

    assert_eq!(outcome.rounds, 3);
    assert_eq!(outcome.applied, 2);
    assert!(!outcome.capped);
    assert!(adapter.last_checkin().is_some());

    let snapshots = channel.snapshots();
    assert!(snapshots[0].changes_applied.is_empty());
    assert_eq!(snapshots[1].changes_applied.len(), 1);
    assert_eq!(snapshots[2].changes_applied.len(), 2);
    assert_eq!(snapshots[2].state.len(), 2);
}

#[tokio::test]
async fn test_cycle_stops_without_progress() {
    let harness = Harness::healthy();
    let channel = Arc::new(FakeChannel::repeating(vec![add_change("c1", "web", "1.0")]));
    let adapter = adapter(&harness, channel.clone(), 10);

    let outcome = adapter.run_cycle().await.unwrap();

    // Second round only repeats an applied change
    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.applied, 1);
    assert!(!outcome.capped);
}

#[tokio::test]
async fn test_cycle_is_capped() {
    let harness = Harness::healthy();
    let channel = Arc::new(FakeChannel::endless());
    let adapter = adapter(&harness, channel.clone(), 3);

    let outcome = adapter.run_cycle().await.unwrap();

    assert_eq!(outcome.rounds, 3);
    assert_eq!(outcome.applied, 3);
    assert!(outcome.capped);
    assert_eq!(channel.snapshots().len(), 3);
}

#[tokio::test]
async fn test_undecodable_changes_are_skipped() {
    let harness = Harness::healthy();
    let channel = Arc::new(FakeChannel::with_batches(vec![vec![
        json!({"Id": "bad", "Type": "format_disk"}),
        remove_change("c9", "ghost"),
    ]]));
    let adapter = adapter(&harness, channel, 10);

    let outcome = adapter.run_cycle().await.unwrap();

    assert_eq!(outcome.applied, 1);
    assert!(harness.changes().is_applied("c9"));
    assert!(!harness.changes().is_applied("bad"));
}

#[tokio::test]
async fn test_channel_failure_surfaces() {
    let harness = Harness::healthy();
    let adapter = adapter(&harness, Arc::new(FakeChannel::failing()), 10);

    assert!(matches!(
        adapter.run_cycle().await,
        Err(AgentError::ChannelFailure(_))
    ));
    assert!(adapter.last_checkin().is_none());
}
