//! Polling engine behaviour observed through the bus

use std::time::Duration;

use pretty_assertions::assert_eq;
use status_relay::{Envelope, MessageBus, SourceActor, Status, StatusEnvelope};
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

const WINDOW: Duration = Duration::from_millis(300);

/// Subscribe to all three topics of prefix `test`, then spawn the scripted actor
async fn run_script(
    steps: Vec<Step>,
    ignore_duplicates: bool,
    heartbeat_interval: f64,
) -> (status_relay::BusClient, CancellationToken, tokio::task::JoinHandle<anyhow::Result<()>>) {
    let bus = MessageBus::new();
    let settings = fast_settings(ignore_duplicates, heartbeat_interval);

    let mut observer = bus.client();
    for topic in settings.topics().all() {
        observer.subscribe(topic).await;
    }

    let stop = CancellationToken::new();
    let actor = SourceActor::new(ScriptedSource::new(steps), settings, bus.client(), stop.clone());
    let handle = tokio::spawn(actor.run());

    (observer, stop, handle)
}

#[tokio::test]
async fn test_identical_results_publish_once() {
    let steps = vec![
        Step::Emit(single(Status::Ok, 0.0)),
        Step::Emit(single(Status::Ok, 1.0)),
        Step::Emit(single(Status::Ok, 2.0)),
    ];
    let (mut observer, stop, handle) = run_script(steps, true, 3600.0).await;

    let messages = collect(&mut observer, WINDOW).await;
    assert_eq!(topics_of(&messages), vec!["TEST_CHANGES"]);

    let envelope: Envelope = serde_json::from_str(&messages[0].payload).unwrap();
    assert_eq!(envelope.message_timestamp(), Some(0.0));

    stop.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_heartbeat_reannounces_unchanged_status() {
    let steps = vec![
        Step::Emit(single(Status::Fail, 0.0)),
        Step::Emit(single(Status::Fail, 5.0)),
        Step::Emit(single(Status::Fail, 61.0)),
    ];
    let (mut observer, stop, handle) = run_script(steps, true, 60.0).await;

    let messages = collect(&mut observer, WINDOW).await;
    assert_eq!(topics_of(&messages), vec!["TEST_CHANGES", "TEST_INFO"]);

    // the re-announcement carries the newest result, not the first one
    let announced: Envelope = serde_json::from_str(&messages[1].payload).unwrap();
    assert_eq!(announced.message_timestamp(), Some(61.0));
    assert_eq!(announced, single(Status::Fail, 61.0));

    stop.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_status_change_is_published() {
    let steps = vec![
        Step::Emit(single(Status::Ok, 0.0)),
        Step::Emit(single(Status::Fail, 1.0)),
        Step::Emit(single(Status::Ok, 2.0)),
    ];
    let (mut observer, stop, handle) = run_script(steps, true, 3600.0).await;

    let messages = collect(&mut observer, WINDOW).await;
    assert_eq!(
        topics_of(&messages),
        vec!["TEST_CHANGES", "TEST_CHANGES", "TEST_CHANGES"]
    );

    stop.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_persistent_errors_are_never_deduplicated() {
    let steps = vec![Step::Emit(with_error(0.0)), Step::Emit(with_error(1.0))];
    let (mut observer, stop, handle) = run_script(steps, true, 3600.0).await;

    let messages = collect(&mut observer, WINDOW).await;
    assert_eq!(topics_of(&messages), vec!["TEST_ERROR", "TEST_ERROR"]);

    stop.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_empty_results_are_suppressed() {
    let empty: Envelope = StatusEnvelope::at("test_source", vec![], 0.0).into();
    let steps = vec![Step::Emit(empty.clone()), Step::Emit(empty)];
    let (mut observer, stop, handle) = run_script(steps, true, 3600.0).await;

    assert!(collect(&mut observer, WINDOW).await.is_empty());

    stop.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stalled_fetch_is_abandoned() {
    let steps = vec![Step::Stall, Step::Emit(single(Status::Ok, 0.0))];
    let (mut observer, stop, handle) = run_script(steps, true, 3600.0).await;

    let messages = collect(&mut observer, Duration::from_millis(600)).await;
    assert_eq!(topics_of(&messages), vec!["TEST_CHANGES"]);

    stop.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unexpected_failure_ends_the_source() {
    let steps = vec![Step::Emit(single(Status::Ok, 0.0)), Step::Fail("boom")];
    let (_observer, _stop, handle) = run_script(steps, true, 3600.0).await;

    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("source should end on failure")
        .unwrap();

    let error = result.unwrap_err();
    assert!(format!("{error:#}").contains("boom"));
}

#[tokio::test]
async fn test_stop_signal_ends_idle_source() {
    let (_observer, stop, handle) = run_script(vec![], true, 3600.0).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    stop.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));
}
