//! Source to sink delivery across the bus

use std::time::Duration;

use status_relay::{
    MessageBus, OutputRunner, SourceActor, Status,
    outputs::telegram::{TelegramBot, TelegramSink},
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true, "result": {}}))
}

#[tokio::test]
async fn test_changes_reach_the_chat() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botTOKEN/sendMessage"))
        .and(body_partial_json(serde_json::json!({"disable_notification": true})))
        .and(body_string_contains("Output started"))
        .respond_with(ok())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/botTOKEN/sendMessage"))
        .and(body_partial_json(serde_json::json!({"disable_notification": false})))
        .and(body_string_contains("From test\\\\_source"))
        .respond_with(ok())
        .expect(2)
        .mount(&server)
        .await;

    let bus = MessageBus::new();
    let stop = CancellationToken::new();

    let settings = fast_settings(true, 3600.0);
    let sink = TelegramSink::new(TelegramBot::new(&server.uri(), "TOKEN", "100"));
    let runner = OutputRunner::new(sink, bus.client(), vec![settings.topics().changes], stop.clone());
    let output = tokio::spawn(runner.run());

    tokio::time::sleep(Duration::from_millis(100)).await;

    let steps = vec![
        Step::Emit(single(Status::Ok, 0.0)),
        Step::Emit(single(Status::Ok, 1.0)),
        Step::Emit(single(Status::Fail, 2.0)),
    ];
    let actor = SourceActor::new(ScriptedSource::new(steps), settings, bus.client(), stop.clone());
    let source = tokio::spawn(actor.run());

    tokio::time::sleep(Duration::from_millis(300)).await;
    stop.cancel();

    source.await.unwrap().unwrap();
    output.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_failing_sink_keeps_running() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let bus = MessageBus::new();
    let stop = CancellationToken::new();
    let publisher = bus.client();

    let sink = TelegramSink::new(TelegramBot::new(&server.uri(), "TOKEN", "100"));
    let runner = OutputRunner::new(sink, bus.client(), vec!["TEST_CHANGES".into()], stop.clone());
    let output = tokio::spawn(runner.run());

    tokio::time::sleep(Duration::from_millis(100)).await;
    for at in 0..3 {
        let payload = single(Status::Fail, at as f64).to_json().unwrap();
        publisher.publish("TEST_CHANGES", payload).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!output.is_finished());
    // notice plus one attempt per message, no retries
    assert_eq!(server.received_requests().await.unwrap().len(), 4);

    stop.cancel();
    output.await.unwrap().unwrap();
}
