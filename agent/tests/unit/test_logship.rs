//! Log fanout tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};
use trainer_api::models::AppLogs;

use hostd::logship::trainer::TrainerLogSink;
use hostd::logship::{LogFanout, LogSink};

use crate::support::{FakeChannel, FakeSink, SinkMode};

fn payload() -> HashMap<String, AppLogs> {
    HashMap::from([(
        "web".to_string(),
        AppLogs {
            stdout: "GET / 200\n".to_string(),
            stderr: "warning: slow start\n".to_string(),
        },
    )])
}

#[tokio::test]
async fn test_every_sink_gets_the_payload() {
    let first = Arc::new(FakeSink::new("first", SinkMode::Accept));
    let second = Arc::new(FakeSink::new("second", SinkMode::Accept));
    let sinks: Vec<Arc<dyn LogSink>> = vec![first.clone(), second.clone()];
    let fanout = LogFanout::new(sinks, Duration::from_secs(5));

    assert_eq!(fanout.send(&payload()).await, 2);
    assert_eq!(first.received(), vec![payload()]);
    assert_eq!(second.received(), vec![payload()]);
}

#[tokio::test(start_paused = true)]
async fn test_failing_and_hanging_sinks_are_isolated() {
    let healthy = Arc::new(FakeSink::new("healthy", SinkMode::Accept));
    let sinks: Vec<Arc<dyn LogSink>> = vec![
        Arc::new(FakeSink::new("broken", SinkMode::Fail)),
        Arc::new(FakeSink::new("stuck", SinkMode::Hang)),
        healthy.clone(),
    ];
    let fanout = LogFanout::new(sinks, Duration::from_secs(5));
    let start = Instant::now();

    assert_eq!(fanout.send(&payload()).await, 1);
    assert_eq!(healthy.received().len(), 1);
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}

#[tokio::test]
async fn test_trainer_sink_pushes_for_host() {
    let channel = Arc::new(FakeChannel::new());
    let sink = TrainerLogSink::new("edge-1".to_string(), channel.clone());

    assert_ok!(sink.send(&payload()).await);

    let pushed = channel.pushed();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].0, "edge-1");
    assert_eq!(pushed[0].1, payload());
}

#[tokio::test]
async fn test_trainer_sink_reports_failure() {
    let sink = TrainerLogSink::new("edge-1".to_string(), Arc::new(FakeChannel::failing()));
    assert_err!(sink.send(&payload()).await);
}
