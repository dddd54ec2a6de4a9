use expiry_countdown_push::{
    AndroidConfig, AndroidPriority, FcmClient, MulticastMessage, Notification, PushError,
    INVALID_ARGUMENT, REGISTRATION_TOKEN_NOT_REGISTERED, SERVER_UNAVAILABLE,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SEND_PATH: &str = "/v1/projects/pantry-test/messages:send";

fn client(server: &MockServer) -> FcmClient {
    FcmClient::new(&server.uri(), "pantry-test", "oauth-token", reqwest::Client::new())
}

fn message(tokens: &[&str]) -> MulticastMessage {
    MulticastMessage {
        tokens: tokens.iter().map(|t| t.to_string()).collect(),
        notification: Notification {
            title: "Expiring soon".to_string(),
            body: "Milk expires in 1 day".to_string(),
        },
        data: BTreeMap::from([("type".to_string(), "expiry_countdown".to_string())]),
        android: Some(AndroidConfig {
            priority: AndroidPriority::High,
            ttl: Duration::from_secs(3600),
        }),
        apns: None,
    }
}

async fn mount_token(server: &MockServer, token: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(header("Authorization", "Bearer oauth-token"))
        .and(body_partial_json(json!({ "message": { "token": token } })))
        .respond_with(response)
        .expect(1)
        .mount(server)
        .await;
}

fn fcm_error(http: u16, status: &str, error_code: Option<&str>) -> ResponseTemplate {
    let details = match error_code {
        Some(code) => json!([{
            "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
            "errorCode": code
        }]),
        None => json!([]),
    };
    ResponseTemplate::new(http).set_body_json(json!({
        "error": { "code": http, "message": "rejected", "status": status, "details": details }
    }))
}

#[tokio::test]
async fn test_multicast_reports_outcome_per_token_in_order() {
    let server = MockServer::start().await;

    mount_token(
        &server,
        "tok-ok",
        ResponseTemplate::new(200)
            .set_body_json(json!({ "name": "projects/pantry-test/messages/1" })),
    )
    .await;
    mount_token(&server, "tok-dead", fcm_error(404, "NOT_FOUND", Some("UNREGISTERED"))).await;
    mount_token(&server, "tok-bad", fcm_error(400, "INVALID_ARGUMENT", None)).await;
    mount_token(&server, "tok-busy", fcm_error(503, "UNAVAILABLE", None)).await;

    let batch = client(&server)
        .send_each_for_multicast(&message(&["tok-ok", "tok-dead", "tok-bad", "tok-busy"]))
        .await
        .unwrap();

    assert_eq!(batch.success_count, 1);
    assert_eq!(batch.failure_count, 3);
    assert!(batch.responses[0].success);
    assert_eq!(
        batch.responses[0].message_id.as_deref(),
        Some("projects/pantry-test/messages/1")
    );
    assert_eq!(batch.responses[1].error_code(), Some(REGISTRATION_TOKEN_NOT_REGISTERED));
    assert_eq!(batch.responses[2].error_code(), Some(INVALID_ARGUMENT));
    assert_eq!(batch.responses[3].error_code(), Some(SERVER_UNAVAILABLE));
}

#[tokio::test]
async fn test_unparseable_error_body_is_unknown() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-a", ResponseTemplate::new(502).set_body_string("Bad Gateway")).await;

    let batch = client(&server)
        .send_each_for_multicast(&message(&["tok-a"]))
        .await
        .unwrap();

    assert_eq!(batch.failure_count, 1);
    assert_eq!(batch.responses[0].error_code(), Some("messaging/unknown-error"));
}

#[tokio::test]
async fn test_empty_and_oversized_multicast_rejected() {
    let server = MockServer::start().await;
    let fcm = client(&server);

    match fcm.send_each_for_multicast(&message(&[])).await {
        Err(PushError::InvalidMessage(_)) => {}
        other => panic!("Expected PushError::InvalidMessage, got {:?}", other),
    }

    let tokens: Vec<String> = (0..501).map(|i| format!("tok-{}", i)).collect();
    let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
    match fcm.send_each_for_multicast(&message(&refs)).await {
        Err(PushError::InvalidMessage(_)) => {}
        other => panic!("Expected PushError::InvalidMessage, got {:?}", other),
    }

    assert!(server.received_requests().await.unwrap().is_empty());
}
