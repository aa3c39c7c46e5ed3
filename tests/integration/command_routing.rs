//! On-demand requests from command text to answer envelope

use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use status_relay::{
    CommandRouter, Envelope, MessageBus, RouteError, SourceActor, Status,
    config::{AwxApiConfig, SourceSettings},
    sources::awx::AwxApiSource,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_unknown_target_publishes_nothing() {
    let bus = MessageBus::new();
    let mut requests = bus.client();
    requests.subscribe("AWX_IN").await;
    requests.subscribe("NOSUCHSOURCE_IN").await;

    let router = CommandRouter::new(bus.client()).register("awx", "AWX_IN");

    let result = router.route("/status nosuchsource").await;
    assert_matches!(result, Err(RouteError::UnknownTarget(target)) if target == "nosuchsource");
    assert_eq!(
        router.route("/status nosuchsource").await.unwrap_err().to_string(),
        "Invalid source: nosuchsource"
    );

    assert!(collect(&mut requests, Duration::from_millis(100)).await.is_empty());
}

#[tokio::test]
async fn test_malformed_command_publishes_nothing() {
    let bus = MessageBus::new();
    let mut requests = bus.client();
    requests.subscribe("AWX_IN").await;

    let router = CommandRouter::new(bus.client()).register("awx", "AWX_IN");

    for text in ["/status awx Scenario 1.5 5", "/status awx 'unterminated", "/status awx x 0"] {
        assert_matches!(router.route(text).await, Err(RouteError::Parsing(_)), "{text}");
    }

    assert!(collect(&mut requests, Duration::from_millis(100)).await.is_empty());
}

#[tokio::test]
async fn test_status_request_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/job_templates/"))
        .and(query_param("name__iexact", "Scenario 1.5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [{
                "name": "Scenario 1.5",
                "summary_fields": {"recent_jobs": [
                    {"id": 2, "status": "successful", "finished": "2024-03-01T10:00:00Z"},
                    {"id": 1, "status": "failed", "finished": "2024-02-29T10:00:00Z"}
                ]}
            }]
        })))
        .mount(&server)
        .await;

    let bus = MessageBus::new();
    let stop = CancellationToken::new();

    let mut settings = SourceSettings::new("awx_api", "awx");
    settings.polling_interval = 0.1;
    settings.request_timeout = 2.0;
    settings.ignore_duplicates = Some(false);
    let config = AwxApiConfig {
        settings: settings.clone(),
        host: format!("{}/api/v2", server.uri()),
        topic_in: "AWX_IN".into(),
    };

    let mut answers = bus.client();
    answers.subscribe("AWX_CHANGES").await;

    let source = AwxApiSource::new(config, None, bus.client()).unwrap();
    let handle = tokio::spawn(SourceActor::new(source, settings, bus.client(), stop.clone()).run());

    // let the source subscribe to its input topic
    tokio::time::sleep(Duration::from_millis(100)).await;

    let router = CommandRouter::new(bus.client()).register("awx", "AWX_IN");
    let query = router.route("/status awx 'Scenario 1.5' 2").await.unwrap();
    assert_eq!(query.payload(), "Scenario 1.5;2");

    let answer = answers.get(Duration::from_secs(2)).await.expect("answer on AWX_CHANGES");
    let Envelope::Status(envelope) = serde_json::from_str(&answer.payload).unwrap() else {
        panic!("expected status envelope");
    };
    let statuses: Vec<_> = envelope.status_list.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![Status::Ok, Status::Fail]);

    // asking again is answered again, on-demand answers are not deduplicated
    router.route("/status awx 'Scenario 1.5' 2").await.unwrap();
    assert!(answers.get(Duration::from_secs(2)).await.is_some());

    stop.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_request_arriving_late_in_the_wait_is_answered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/job_templates/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "results": [{
                        "name": "Deploy",
                        "summary_fields": {"recent_jobs": [
                            {"id": 5, "status": "successful", "finished": null}
                        ]}
                    }]
                }))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let bus = MessageBus::new();
    let stop = CancellationToken::new();

    // polling as long as the request timeout, the default shape
    let mut settings = SourceSettings::new("awx_api", "awx");
    settings.polling_interval = 1.0;
    settings.request_timeout = 1.0;
    let config = AwxApiConfig {
        settings: settings.clone(),
        host: server.uri(),
        topic_in: "AWX_IN".into(),
    };

    let mut answers = bus.client();
    answers.subscribe("AWX_CHANGES").await;

    let source = AwxApiSource::new(config, None, bus.client()).unwrap();
    let handle = tokio::spawn(SourceActor::new(source, settings, bus.client(), stop.clone()).run());

    tokio::time::sleep(Duration::from_millis(850)).await;
    let router = CommandRouter::new(bus.client()).register("awx", "AWX_IN");
    router.route("/status awx Deploy").await.unwrap();

    let answer = answers.get(Duration::from_secs(4)).await.expect("answer on AWX_CHANGES");
    let Envelope::Status(envelope) = serde_json::from_str(&answer.payload).unwrap() else {
        panic!("expected status envelope");
    };
    assert_eq!(envelope.status_list[0].name, "Deploy");
    assert_eq!(envelope.status_list[0].status, Status::Ok);

    stop.cancel();
    handle.await.unwrap().unwrap();
}
