//! Integration tests for the OpenAI Realtime connector
//!
//! These tests run the connector against a local mock of the realtime
//! WebSocket endpoint and verify:
//! - Upgrade request authentication
//! - Session setup and outbound event encoding
//! - Inbound event decoding, including function calls
//! - Connection loss reporting
//!
//! Note: Tests requiring actual API calls are marked with #[ignore]
//! and require OPENAI_API_KEY environment variable.

mod mock_providers;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;

use mock_providers::MockRealtimeServer;
use waav_concierge::core::realtime::{
    EventStream, Modality, OpenAIRealtime, OpenAIRealtimeSettings, OutboundEvent,
    RealtimeError, ResponseOutcome, Session, SessionEvent, SessionSetup, ToolDefinition,
};

const SEND_TIMEOUT: Duration = Duration::from_millis(500);

fn connector_for(server: &MockRealtimeServer) -> Arc<OpenAIRealtime> {
    let settings = OpenAIRealtimeSettings::new("sk-test").with_endpoint(server.url());
    Arc::new(OpenAIRealtime::new(settings).unwrap())
}

fn text_setup() -> SessionSetup {
    SessionSetup {
        modalities: Modality::set_for(false),
        tools: vec![ToolDefinition::function(
            "get_status",
            Some("Get robot status".to_string()),
            Some(json!({"type": "object", "properties": {}})),
        )],
        instructions: Some("Be brief.".to_string()),
        ..Default::default()
    }
}

async fn next_event(events: &mut EventStream) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), events.next())
        .await
        .expect("timed out waiting for session event")
        .expect("event stream ended")
}

#[tokio::test]
async fn test_connect_sends_auth_and_model() {
    let mut server = MockRealtimeServer::start().await;
    let mut session = Session::connect(connector_for(&server), SEND_TIMEOUT)
        .await
        .unwrap();
    let conn = server.accept().await;

    assert_eq!(conn.request.authorization.as_deref(), Some("Bearer sk-test"));
    assert_eq!(conn.request.beta.as_deref(), Some("realtime=v1"));
    assert!(conn.request.path_and_query.starts_with("/v1/realtime?model="));

    let mut events = session.events().unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::SessionCreated { session_id } if session_id == "sess_mock"
    ));
    session.close().await;
}

#[tokio::test]
async fn test_configure_then_text_round_trip() {
    let mut server = MockRealtimeServer::start().await;
    let mut session = Session::connect(connector_for(&server), SEND_TIMEOUT)
        .await
        .unwrap();
    let mut conn = server.accept().await;
    let mut events = session.events().unwrap();

    session.configure(text_setup()).await.unwrap();
    let update = conn.expect_event("session.update").await;
    assert_eq!(update["session"]["modalities"], json!(["text"]));
    assert_eq!(update["session"]["tools"][0]["name"], "get_status");
    assert_eq!(update["session"]["tools"][0]["type"], "function");
    assert_eq!(update["session"]["instructions"], "Be brief.");

    session
        .send(OutboundEvent::TextInput("hello".to_string()))
        .await
        .unwrap();
    let item = conn.expect_event("conversation.item.create").await;
    assert_eq!(item["item"]["content"][0]["text"], "hello");
    conn.expect_event("response.create").await;

    conn.send(json!({"type": "response.created", "response": {"id": "resp_1"}}));
    conn.send(json!({"type": "response.text.delta", "response_id": "resp_1", "delta": "Hi"}));
    conn.send(json!({"type": "response.done", "response": {"id": "resp_1", "status": "completed"}}));

    let mut saw_delta = false;
    loop {
        match next_event(&mut events).await {
            SessionEvent::ResponseStarted { response_id } => assert_eq!(response_id, "resp_1"),
            SessionEvent::ResponseTextDelta { text, .. } => {
                assert_eq!(text, "Hi");
                saw_delta = true;
            }
            SessionEvent::ResponseDone { outcome, .. } => {
                assert_eq!(outcome, ResponseOutcome::Completed);
                break;
            }
            _ => {}
        }
    }
    assert!(saw_delta);
    session.close().await;
}

#[tokio::test]
async fn test_send_before_configure_is_rejected() {
    let server = MockRealtimeServer::start().await;
    let session = Session::connect(connector_for(&server), SEND_TIMEOUT)
        .await
        .unwrap();

    let result = session.send(OutboundEvent::RequestResponse).await;
    assert!(matches!(result, Err(RealtimeError::Configuration(_))));

    session.configure(text_setup()).await.unwrap();
    let audio = session
        .send(OutboundEvent::AudioChunk(Bytes::from_static(&[0, 0])))
        .await;
    assert!(matches!(audio, Err(RealtimeError::Configuration(_))));
    session.close().await;
}

#[tokio::test]
async fn test_function_call_decoded_and_result_encoded() {
    let mut server = MockRealtimeServer::start().await;
    let mut session = Session::connect(connector_for(&server), SEND_TIMEOUT)
        .await
        .unwrap();
    let mut conn = server.accept().await;
    let mut events = session.events().unwrap();
    session.configure(text_setup()).await.unwrap();

    conn.send(json!({
        "type": "response.output_item.added",
        "response_id": "resp_2",
        "item": {"id": "item_1", "type": "function_call", "call_id": "call_9", "name": "get_status"}
    }));
    conn.send(json!({
        "type": "response.function_call_arguments.done",
        "response_id": "resp_2",
        "item_id": "item_1",
        "call_id": "call_9",
        "arguments": "{}"
    }));

    let request = loop {
        if let SessionEvent::FunctionCallRequested(request) = next_event(&mut events).await {
            break request;
        }
    };
    assert_eq!(request.call_id, "call_9");
    assert_eq!(request.name, "get_status");
    assert_eq!(request.item_id.as_deref(), Some("item_1"));

    session
        .send(OutboundEvent::FunctionResult {
            call_id: "call_9".to_string(),
            output: r#"{"status":"ok"}"#.to_string(),
        })
        .await
        .unwrap();
    let item = conn.expect_event("conversation.item.create").await;
    assert_eq!(item["item"]["type"], "function_call_output");
    assert_eq!(item["item"]["call_id"], "call_9");
    session.close().await;
}

#[tokio::test]
async fn test_cancel_encodes_response_id() {
    let mut server = MockRealtimeServer::start().await;
    let session = Session::connect(connector_for(&server), SEND_TIMEOUT)
        .await
        .unwrap();
    let mut conn = server.accept().await;
    session.configure(text_setup()).await.unwrap();

    session
        .send(OutboundEvent::CancelResponse {
            response_id: "resp_7".to_string(),
        })
        .await
        .unwrap();
    let cancel = conn.expect_event("response.cancel").await;
    assert_eq!(cancel["response_id"], "resp_7");
    session.close().await;
}

#[tokio::test]
async fn test_server_error_is_not_fatal() {
    let mut server = MockRealtimeServer::start().await;
    let mut session = Session::connect(connector_for(&server), SEND_TIMEOUT)
        .await
        .unwrap();
    let conn = server.accept().await;
    let mut events = session.events().unwrap();

    conn.send(json!({
        "type": "error",
        "error": {"type": "invalid_request_error", "message": "bad tool"}
    }));

    loop {
        if let SessionEvent::TransportError { detail, fatal } = next_event(&mut events).await {
            assert!(!fatal);
            assert!(detail.contains("bad tool"));
            break;
        }
    }
    assert!(session.sender().is_open());
    session.close().await;
}

#[tokio::test]
async fn test_connection_loss_is_fatal_and_closes_session() {
    let mut server = MockRealtimeServer::start().await;
    let mut session = Session::connect(connector_for(&server), SEND_TIMEOUT)
        .await
        .unwrap();
    let conn = server.accept().await;
    let mut events = session.events().unwrap();
    session.configure(text_setup()).await.unwrap();

    conn.drop_connection();

    loop {
        if let SessionEvent::TransportError { fatal, .. } = next_event(&mut events).await {
            assert!(fatal);
            break;
        }
    }
    assert!(!session.sender().is_open());
    assert!(matches!(
        session.send(OutboundEvent::RequestResponse).await,
        Err(RealtimeError::SessionClosed)
    ));
}

#[tokio::test]
async fn test_missing_api_key_rejected() {
    let settings = OpenAIRealtimeSettings::new("");
    assert!(matches!(
        OpenAIRealtime::new(settings),
        Err(RealtimeError::InvalidConfiguration(_))
    ));
}

/// Requires OPENAI_API_KEY and network access.
#[tokio::test]
#[ignore]
async fn test_real_openai_session() {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let api_key = std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set");
    let connector = Arc::new(OpenAIRealtime::new(OpenAIRealtimeSettings::new(api_key)).unwrap());
    let mut session = Session::connect(connector, SEND_TIMEOUT).await.unwrap();
    let mut events = session.events().unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::SessionCreated { .. }
    ));
    session.configure(text_setup()).await.unwrap();
    session.close().await;
}
