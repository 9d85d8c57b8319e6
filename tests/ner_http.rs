//! NER client tests against a local mock HTTP server.

mod common;

use common::{MockServer, Reply};
use patta_extract::pipeline::retry::RetryPolicy;
use patta_extract::{EntityLabel, EntitySource, ExtractionError, HttpEntityExtractor};
use serde_json::json;
use std::time::Duration;

fn fast_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::from_millis(1))
}

fn extractor(server: &MockServer, attempts: u32) -> HttpEntityExtractor {
    HttpEntityExtractor::new(
        format!("{}/api", server.url()),
        fast_policy(attempts),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn one_village() -> serde_json::Value {
    json!({
        "entities": [
            {"text": "Kurichi", "label": "VILLAGE", "start": 9, "end": 16, "score": 0.91}
        ],
        "confidence": 0.91,
        "language": "en",
        "processing_time": 0.05
    })
}

#[tokio::test]
async fn retry_exhaustion_makes_exactly_max_attempts() {
    let server = MockServer::always(Reply::raw(503, "overloaded")).await;
    let ner = extractor(&server, 3);

    let err = ner.extract_general("Village: Kurichi", "en").await.unwrap_err();

    match err {
        ExtractionError::Exhausted { attempts, ref detail } => {
            assert_eq!(attempts, 3);
            assert!(detail.contains("503"), "got: {detail}");
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
    assert_eq!(server.request_count(), 3);
}

#[tokio::test]
async fn transient_failure_then_success() {
    let server = MockServer::sequence(vec![
        Reply::raw(502, ""),
        Reply::json(200, one_village()),
    ])
    .await;
    let ner = extractor(&server, 3);

    let response = ner.extract_general("Village: Kurichi", "en").await.unwrap();

    assert_eq!(response.entities.len(), 1);
    assert_eq!(response.entities[0].label, EntityLabel::Village);
    assert_eq!(response.language.as_deref(), Some("en"));
    assert_eq!(server.request_count(), 2);
}

#[tokio::test]
async fn general_request_shape() {
    let server = MockServer::always(Reply::json(200, one_village())).await;
    let ner = extractor(&server, 1);

    ner.extract_general("Village: Kurichi", "ta").await.unwrap();

    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].route(), "/api/ner");
    assert_eq!(
        requests[0].json(),
        json!({"text": "Village: Kurichi", "locale": "ta"})
    );
    assert!(requests[0].header("authorization").is_none());
}

#[tokio::test]
async fn undecodable_body_is_not_retried() {
    let server = MockServer::always(Reply::raw(200, "<html>maintenance</html>")).await;
    let ner = extractor(&server, 3);

    let err = ner.extract_general("x", "en").await.unwrap_err();

    assert!(matches!(err, ExtractionError::InvalidResponse { .. }), "got {err:?}");
    assert_eq!(server.request_count(), 1);
}

#[tokio::test]
async fn domain_failure_falls_back_to_general() {
    let server = MockServer::start(|req, _| match req.route() {
        "/api/ner/patta" => Reply::raw(500, "model not loaded"),
        _ => Reply::json(200, one_village()),
    })
    .await;
    let ner = extractor(&server, 2).with_schema("patta", vec!["en".into(), "ta".into()]);

    let spans = ner.extract("Village: Kurichi", "en").await.unwrap();

    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].text, "Kurichi");
    let routes: Vec<String> = server
        .requests()
        .iter()
        .map(|r| r.route().to_string())
        .collect();
    assert_eq!(routes, ["/api/ner/patta", "/api/ner/patta", "/api/ner"]);
    assert_eq!(
        server.requests()[0].json(),
        json!({"text": "Village: Kurichi", "schema": "patta", "languages": ["en", "ta"]})
    );
}

#[tokio::test]
async fn domain_success_skips_general() {
    let server = MockServer::always(Reply::json(200, one_village())).await;
    let ner = extractor(&server, 2).with_schema("patta", vec!["en".into()]);

    let spans = ner.extract("Village: Kurichi", "en").await.unwrap();

    assert_eq!(spans.len(), 1);
    assert_eq!(server.request_count(), 1);
    assert_eq!(server.requests()[0].route(), "/api/ner/patta");
}

#[tokio::test]
async fn both_endpoints_failing_surfaces_single_error() {
    let server = MockServer::always(Reply::raw(503, "")).await;
    let ner = extractor(&server, 2).with_schema("patta", vec!["en".into()]);

    let err = ner.extract("text", "en").await.unwrap_err();

    assert!(matches!(err, ExtractionError::Exhausted { attempts: 2, .. }), "got {err:?}");
    assert_eq!(server.request_count(), 4);
}

#[tokio::test]
async fn bearer_token_is_sent() {
    let server = MockServer::always(Reply::json(200, json!({"entities": []}))).await;
    let ner = extractor(&server, 1).with_api_key("s3cret");

    let spans = ner.extract("text", "en").await.unwrap();

    assert!(spans.is_empty());
    assert_eq!(
        server.requests()[0].header("authorization"),
        Some("Bearer s3cret")
    );
}

#[tokio::test]
async fn unknown_labels_are_preserved() {
    let server = MockServer::always(Reply::json(
        200,
        json!({"spans": [{"text": "Temple", "label": "LANDMARK", "start": 0, "end": 6, "score": 0.99}]}),
    ))
    .await;
    let ner = extractor(&server, 1);

    let spans = ner.extract("Temple", "en").await.unwrap();

    assert_eq!(spans[0].label, EntityLabel::Other("LANDMARK".into()));
}
