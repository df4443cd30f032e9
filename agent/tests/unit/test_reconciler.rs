//! Reconciler tests

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use trainer_api::models::{AppLogs, AppStatus, Metric};

use crate::support::{
    add_change, changes, remove_change, version_config, EngineCall, FakeChecker, FakeEngine,
    Harness,
};

#[tokio::test]
async fn test_add_application_runs_and_records_change() {
    let harness = Harness::healthy();

    let report = harness
        .reconciler
        .apply_changes(&changes(vec![add_change("c1", "web", "1.0")]))
        .await;

    assert_eq!(report.applied, vec!["c1"]);
    assert!(report.made_progress());

    let state = harness.store().get("web").unwrap();
    assert_eq!(state.application.state, AppStatus::Running);
    assert_eq!(state.application.version, "1.0");
    assert_eq!(state.application.change_id, "c1");
    assert!(state.instance_id.starts_with("web_"));
    assert!(harness.changes().is_applied("c1"));
    assert_eq!(harness.changes().snapshot(), HashMap::from([("c1".to_string(), true)]));

    assert_eq!(
        harness.engine.lifecycle_calls(),
        vec![
            EngineCall::Install("web".to_string()),
            EngineCall::Run(state.instance_id.clone(), "web".to_string()),
        ]
    );
    assert_eq!(harness.checker.total_calls(), 1);
}

#[tokio::test]
async fn test_applied_changes_are_skipped() {
    let harness = Harness::healthy();
    let batch = changes(vec![add_change("c1", "web", "1.0")]);

    harness.reconciler.apply_changes(&batch).await;
    let calls_before = harness.engine.calls().len();

    let report = harness.reconciler.apply_changes(&batch).await;
    assert_eq!(report.skipped, vec!["c1"]);
    assert!(report.applied.is_empty());
    assert!(!report.made_progress());
    assert_eq!(harness.engine.calls().len(), calls_before);
}

#[tokio::test]
async fn test_duplicate_id_in_one_batch_applies_once() {
    let harness = Harness::healthy();

    let report = harness
        .reconciler
        .apply_changes(&changes(vec![
            add_change("c1", "web", "1.0"),
            add_change("c1", "web", "1.0"),
        ]))
        .await;

    assert_eq!(report.applied, vec!["c1"]);
    assert_eq!(report.skipped, vec!["c1"]);
    let runs = harness
        .engine
        .calls()
        .into_iter()
        .filter(|call| matches!(call, EngineCall::Run(_, _)))
        .count();
    assert_eq!(runs, 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_id_across_apps_applies_once() {
    let harness = Harness::new(FakeEngine::new(), FakeChecker::flaky(1));

    let report = harness
        .reconciler
        .apply_changes(&changes(vec![
            add_change("c1", "web", "1.0"),
            add_change("c1", "db", "1.0"),
        ]))
        .await;

    assert_eq!(report.applied, vec!["c1"]);
    assert_eq!(report.skipped, vec!["c1"]);
    let runs = harness
        .engine
        .calls()
        .into_iter()
        .filter(|call| matches!(call, EngineCall::Run(_, _)))
        .count();
    assert_eq!(runs, 1);
    assert!(harness.store().contains("web"));
    assert!(!harness.store().contains("db"));
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_app_is_checked_ten_times() {
    let harness = Harness::new(FakeEngine::new(), FakeChecker::unhealthy());
    let start = Instant::now();

    let report = harness
        .reconciler
        .apply_changes(&changes(vec![add_change("c1", "web", "1.0")]))
        .await;

    assert_eq!(harness.checker.total_calls(), 10);
    assert_eq!(start.elapsed(), Duration::from_secs(54));
    assert_eq!(
        harness.store().get("web").unwrap().application.state,
        AppStatus::ChecksFailed
    );
    assert_eq!(report.pending, vec!["c1"]);
    assert!(!harness.changes().is_applied("c1"));
}

#[tokio::test(start_paused = true)]
async fn test_app_healthy_on_later_attempt() {
    let harness = Harness::new(FakeEngine::new(), FakeChecker::flaky(3));
    let start = Instant::now();

    let healthy = harness
        .reconciler
        .deploy_app("web", &version_config("1.0"))
        .await;

    assert!(healthy);
    assert_eq!(harness.checker.total_calls(), 4);
    assert_eq!(start.elapsed(), Duration::from_secs(18));
    assert_eq!(
        harness.store().get("web").unwrap().application.state,
        AppStatus::Running
    );
}

#[tokio::test]
async fn test_run_failure_is_installation_failed() {
    let engine = FakeEngine {
        fail_run: true,
        ..Default::default()
    };
    let harness = Harness::new(engine, FakeChecker::healthy());

    let report = harness
        .reconciler
        .apply_changes(&changes(vec![add_change("c1", "web", "1.0")]))
        .await;

    assert_eq!(
        harness.store().get("web").unwrap().application.state,
        AppStatus::InstallationFailed
    );
    assert_eq!(harness.checker.total_calls(), 0);
    assert_eq!(report.pending, vec!["c1"]);
    assert!(!harness.changes().is_applied("c1"));
}

#[tokio::test]
async fn test_install_failure_still_runs() {
    let engine = FakeEngine {
        fail_install: true,
        ..Default::default()
    };
    let harness = Harness::new(engine, FakeChecker::healthy());

    assert!(harness.reconciler.deploy_app("web", &version_config("1.0")).await);

    let calls = harness.engine.lifecycle_calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(calls[1], EngineCall::Run(_, _)));
    assert_eq!(
        harness.store().get("web").unwrap().application.state,
        AppStatus::Running
    );
}

#[tokio::test]
async fn test_delete_unknown_app_is_noop() {
    let harness = Harness::healthy();

    assert!(harness.reconciler.delete_app("ghost").await);
    assert!(harness.engine.calls().is_empty());
    assert!(harness.store().is_empty());
}

#[tokio::test]
async fn test_remove_unknown_app_is_applied() {
    let harness = Harness::healthy();

    let report = harness
        .reconciler
        .apply_changes(&changes(vec![remove_change("c2", "ghost")]))
        .await;

    assert_eq!(report.applied, vec!["c2"]);
    assert!(harness.changes().is_applied("c2"));
    assert!(harness.engine.calls().is_empty());
}

#[tokio::test]
async fn test_remove_stops_and_forgets() {
    let harness = Harness::healthy();
    harness
        .reconciler
        .apply_changes(&changes(vec![add_change("c1", "web", "1.0")]))
        .await;
    let instance_id = harness.store().get("web").unwrap().instance_id;

    harness
        .reconciler
        .apply_changes(&changes(vec![remove_change("c2", "web")]))
        .await;

    assert!(harness.store().is_empty());
    assert!(harness.store().config("web").is_none());
    assert!(!harness.engine.is_live(&instance_id));
    assert_eq!(
        harness.engine.lifecycle_calls().last(),
        Some(&EngineCall::Stop(instance_id))
    );
}

#[tokio::test]
async fn test_stop_failure_still_forgets() {
    let engine = FakeEngine {
        fail_stop: true,
        ..Default::default()
    };
    let harness = Harness::new(engine, FakeChecker::healthy());
    harness.reconciler.deploy_app("web", &version_config("1.0")).await;

    assert!(harness.reconciler.delete_app("web").await);
    assert!(harness.store().is_empty());
}

#[tokio::test]
async fn test_redeploy_stops_previous_instance_first() {
    let harness = Harness::healthy();
    harness
        .reconciler
        .apply_changes(&changes(vec![add_change("c1", "web", "1.0")]))
        .await;
    let first = harness.store().get("web").unwrap().instance_id;

    harness
        .reconciler
        .apply_changes(&changes(vec![add_change("c2", "web", "2.0")]))
        .await;
    let second = harness.store().get("web").unwrap();

    assert_ne!(first, second.instance_id);
    assert_eq!(harness.store().len(), 1);
    assert_eq!(second.application.version, "2.0");
    assert_eq!(second.application.state, AppStatus::Running);

    let calls = harness.engine.lifecycle_calls();
    let stops: Vec<_> = calls
        .iter()
        .enumerate()
        .filter(|(_, call)| matches!(call, EngineCall::Stop(_)))
        .collect();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].1, &EngineCall::Stop(first));

    let second_run = calls
        .iter()
        .position(|call| *call == EngineCall::Run(second.instance_id.clone(), "web".to_string()))
        .unwrap();
    assert!(stops[0].0 < second_run);
}

#[tokio::test]
async fn test_deploy_app_replaces_tracked_instance() {
    let harness = Harness::healthy();
    harness.reconciler.deploy_app("web", &version_config("1.0")).await;
    let first = harness.store().get("web").unwrap().instance_id;

    assert!(harness.reconciler.deploy_app("web", &version_config("2.0")).await);

    assert_eq!(harness.store().len(), 1);
    assert!(!harness.engine.is_live(&first));
    let stops: Vec<_> = harness
        .engine
        .lifecycle_calls()
        .into_iter()
        .filter(|call| matches!(call, EngineCall::Stop(_)))
        .collect();
    assert_eq!(stops, vec![EngineCall::Stop(first)]);
}

#[tokio::test]
async fn test_same_app_changes_apply_in_order() {
    let harness = Harness::healthy();

    let report = harness
        .reconciler
        .apply_changes(&changes(vec![
            add_change("c1", "web", "1.0"),
            remove_change("c2", "web"),
            add_change("c3", "web", "3.0"),
        ]))
        .await;

    assert_eq!(report.applied, vec!["c1", "c2", "c3"]);
    assert_eq!(harness.store().get("web").unwrap().application.version, "3.0");

    let stops = harness
        .engine
        .lifecycle_calls()
        .into_iter()
        .filter(|call| matches!(call, EngineCall::Stop(_)))
        .count();
    assert_eq!(stops, 1);
}

#[tokio::test(start_paused = true)]
async fn test_different_apps_deploy_concurrently() {
    let harness = Harness::new(FakeEngine::new(), FakeChecker::flaky(2));
    let start = Instant::now();

    let report = harness
        .reconciler
        .apply_changes(&changes(vec![
            add_change("c1", "web", "1.0"),
            add_change("c2", "db", "5.0"),
        ]))
        .await;

    assert_eq!(report.applied, vec!["c1", "c2"]);
    // Two waits each, overlapping
    assert_eq!(start.elapsed(), Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_health_checks() {
    let harness = Harness::new(FakeEngine::new(), FakeChecker::unhealthy());
    let shutdown_tx = harness.shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown_tx.send_replace(true);
    });

    let report = harness
        .reconciler
        .apply_changes(&changes(vec![add_change("c1", "web", "1.0")]))
        .await;

    assert!(harness.checker.total_calls() < 10);
    assert_eq!(report.pending, vec!["c1"]);
    assert_eq!(
        harness.store().get("web").unwrap().application.state,
        AppStatus::ChecksFailed
    );
}

#[tokio::test]
async fn test_refresh_reports_dead_instance() {
    let harness = Harness::healthy();
    harness.reconciler.deploy_app("web", &version_config("1.0")).await;
    harness.reconciler.deploy_app("db", &version_config("5.0")).await;
    let web = harness.store().get("web").unwrap().instance_id;
    harness.engine.kill(&web);

    let states = harness.reconciler.refresh().await;

    let status: HashMap<_, _> = states
        .into_iter()
        .map(|s| (s.name, s.application.state))
        .collect();
    assert_eq!(status["web"], AppStatus::Failed);
    assert_eq!(status["db"], AppStatus::Running);
}

#[tokio::test]
async fn test_metrics_keep_last_known_on_failure() {
    let metric = Metric {
        cpu_usage_percent: 42,
        memory_usage_bytes: 1 << 20,
        network_rx_bytes: 512,
    };
    let engine = FakeEngine {
        metric: Some(metric),
        ..Default::default()
    };
    let harness = Harness::new(engine, FakeChecker::healthy());
    harness.reconciler.deploy_app("web", &version_config("1.0")).await;

    harness.reconciler.collect_metrics().await;
    assert_eq!(harness.store().get("web").unwrap().application.metrics, metric);

    // Without samples nothing is overwritten
    let quiet = Harness::healthy();
    quiet.reconciler.deploy_app("web", &version_config("1.0")).await;
    quiet.reconciler.collect_metrics().await;
    assert_eq!(
        quiet.store().get("web").unwrap().application.metrics,
        Metric::default()
    );
}

#[tokio::test]
async fn test_collect_logs_by_app_name() {
    let engine = FakeEngine {
        logs: HashMap::from([(
            "web".to_string(),
            AppLogs {
                stdout: "listening on 8080\n".to_string(),
                stderr: String::new(),
            },
        )]),
        ..Default::default()
    };
    let harness = Harness::new(engine, FakeChecker::healthy());
    harness.reconciler.deploy_app("web", &version_config("1.0")).await;
    harness.reconciler.deploy_app("db", &version_config("5.0")).await;

    let until = Utc::now();
    let since = until - chrono::Duration::seconds(10);
    let logs = harness.reconciler.collect_logs(since, until).await;

    assert_eq!(logs.len(), 1);
    assert_eq!(logs["web"].stdout, "listening on 8080\n");
    assert_eq!(harness.engine.log_windows(), vec![(since, until); 2]);
}
