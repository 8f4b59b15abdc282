//! OpenAI Realtime API WebSocket connector.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! The connector opens the socket and spawns one I/O task that translates
//! [`OutboundEvent`]s into client events and server events into
//! [`SessionEvent`]s. The task ends on shutdown (after flushing queued sends),
//! when every sender is gone, or when the connection is lost; in the last case
//! it marks the session closed and emits a fatal transport error.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::config::OpenAIRealtimeSettings;
use super::messages::{ClientEvent, ConversationItem, ServerEvent, SessionConfig};
use crate::core::realtime::base::{
    FunctionCallRequest, OutboundEvent, RealtimeConnector, RealtimeError, RealtimeResult,
    ResponseOutcome, SessionEvent, StatusCell, TranscriptRole, TransportLink,
};

/// OpenAI Realtime connector.
#[derive(Debug, Clone)]
pub struct OpenAIRealtime {
    settings: OpenAIRealtimeSettings,
}

impl OpenAIRealtime {
    /// Create a connector after validating its settings.
    pub fn new(settings: OpenAIRealtimeSettings) -> RealtimeResult<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    /// Settings in use.
    pub fn settings(&self) -> &OpenAIRealtimeSettings {
        &self.settings
    }

    /// Build the WebSocket upgrade request with authentication headers.
    pub fn build_request(&self) -> RealtimeResult<http::Request<()>> {
        let url = self.settings.connect_url()?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(RealtimeError::InvalidConfiguration(
                    "Endpoint URL has no host".to_string(),
                ));
            }
        };

        http::Request::builder()
            .uri(url.as_str())
            .header("Authorization", format!("Bearer {}", self.settings.api_key))
            .header("OpenAI-Beta", "realtime=v1")
            .header("Sec-WebSocket-Protocol", "realtime")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))
    }
}

fn map_connect_error(err: tungstenite::Error) -> RealtimeError {
    match err {
        tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
            RealtimeError::AuthenticationFailed("Endpoint rejected the API key".to_string())
        }
        other => RealtimeError::ConnectionFailed(other.to_string()),
    }
}

#[async_trait]
impl RealtimeConnector for OpenAIRealtime {
    async fn connect(&self) -> RealtimeResult<TransportLink> {
        let request = self.build_request()?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(map_connect_error)?;

        tracing::info!(model = %self.settings.model, "Connected to OpenAI Realtime API");

        let (ws_sink, ws_stream) = ws_stream.split();

        let capacity = self.settings.channel_capacity;
        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundEvent>(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel::<SessionEvent>(capacity);
        let status = StatusCell::open();
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(run_io(
            ws_sink,
            ws_stream,
            outbound_rx,
            inbound_tx,
            status.clone(),
            shutdown.clone(),
        ));

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
            status,
            shutdown,
            task: Some(task),
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// =============================================================================
// I/O Task
// =============================================================================

async fn run_io<W, R>(
    mut sink: W,
    mut stream: R,
    mut outbound_rx: mpsc::Receiver<OutboundEvent>,
    inbound_tx: mpsc::Sender<SessionEvent>,
    status: StatusCell,
    shutdown: CancellationToken,
) where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut decoder = EventDecoder::default();

    let lost: Option<String> = loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                let mut flushed = 0usize;
                while let Ok(event) = outbound_rx.try_recv() {
                    if write_event(&mut sink, &event).await.is_err() {
                        break;
                    }
                    flushed += 1;
                }
                tracing::debug!(flushed, "Flushed pending sends before close");
                let _ = sink.send(Message::Close(None)).await;
                break None;
            }

            maybe_event = outbound_rx.recv() => match maybe_event {
                Some(event) => {
                    if let Err(e) = write_event(&mut sink, &event).await {
                        break Some(format!("Failed to send WebSocket message: {e}"));
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break None;
                }
            },

            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = decoder.decode(&text) {
                        if inbound_tx.send(event).await.is_err() {
                            tracing::debug!("Inbound receiver dropped; stopping I/O task");
                            break None;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    break Some("WebSocket closed by server".to_string());
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        tracing::warn!(error = %e, "Failed to send pong");
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(format!("WebSocket error: {e}")),
                None => break Some("WebSocket stream ended".to_string()),
            },
        }
    };

    if let Some(detail) = lost {
        if status.close() {
            tracing::error!(detail = %detail, "Realtime connection lost");
            let _ = inbound_tx
                .send(SessionEvent::TransportError {
                    detail,
                    fatal: true,
                })
                .await;
        }
    } else {
        status.close();
    }
}

async fn write_event<W>(sink: &mut W, event: &OutboundEvent) -> Result<(), tungstenite::Error>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    for client_event in encode_outbound(event) {
        let json = match serde_json::to_string(&client_event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(event = client_event.event_type(), error = %e, "Failed to serialize event");
                continue;
            }
        };
        sink.send(Message::Text(json.into())).await?;
    }
    Ok(())
}

/// Translate one outbound event into the client events that express it.
pub fn encode_outbound(event: &OutboundEvent) -> Vec<ClientEvent> {
    match event {
        OutboundEvent::Configure(setup) => vec![ClientEvent::SessionUpdate {
            session: SessionConfig::from(setup),
        }],
        OutboundEvent::AudioChunk(data) => vec![ClientEvent::audio_append(data)],
        OutboundEvent::TextInput(text) => vec![
            ClientEvent::ConversationItemCreate {
                item: ConversationItem::user_text(text.clone()),
            },
            ClientEvent::ResponseCreate,
        ],
        OutboundEvent::CancelResponse { response_id } => vec![ClientEvent::ResponseCancel {
            response_id: Some(response_id.clone()),
        }],
        OutboundEvent::FunctionResult { call_id, output } => {
            vec![ClientEvent::ConversationItemCreate {
                item: ConversationItem::function_output(call_id.clone(), output.clone()),
            }]
        }
        OutboundEvent::RequestResponse => vec![ClientEvent::ResponseCreate],
    }
}

// =============================================================================
// Event Decoding
// =============================================================================

/// Turns server event payloads into session events.
///
/// Keeps the function names announced by `response.output_item.added` until
/// the matching `response.function_call_arguments.done` arrives, or until the
/// owning response is done.
#[derive(Debug, Default)]
pub struct EventDecoder {
    pending_function_calls: HashMap<String, PendingCall>,
}

#[derive(Debug)]
struct PendingCall {
    response_id: String,
    name: String,
}

impl EventDecoder {
    /// Decode one text frame. Returns `None` for events the session ignores.
    pub fn decode(&mut self, text: &str) -> Option<SessionEvent> {
        let event = match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse server event");
                return Some(SessionEvent::TransportError {
                    detail: format!("Malformed server event: {e}"),
                    fatal: false,
                });
            }
        };

        match event {
            ServerEvent::Error { error } => {
                tracing::error!(
                    error_type = %error.error_type,
                    code = ?error.code,
                    "OpenAI Realtime error: {}",
                    error.message
                );
                Some(SessionEvent::TransportError {
                    detail: format!("{}: {}", error.error_type, error.message),
                    fatal: false,
                })
            }

            ServerEvent::SessionCreated { session } => {
                tracing::info!(session_id = %session.id, model = ?session.model, "OpenAI Realtime session created");
                Some(SessionEvent::SessionCreated {
                    session_id: session.id,
                })
            }

            ServerEvent::SpeechStarted { audio_start_ms } => {
                Some(SessionEvent::SpeechStarted { audio_start_ms })
            }

            ServerEvent::SpeechStopped { audio_end_ms } => {
                Some(SessionEvent::SpeechStopped { audio_end_ms })
            }

            ServerEvent::TranscriptionCompleted { transcript } => Some(SessionEvent::Transcript {
                role: TranscriptRole::User,
                text: transcript,
            }),

            ServerEvent::ResponseCreated { response } => Some(SessionEvent::ResponseStarted {
                response_id: response.id,
            }),

            ServerEvent::ResponseDone { response } => {
                let before = self.pending_function_calls.len();
                self.pending_function_calls
                    .retain(|_, call| call.response_id != response.id);
                let abandoned = before - self.pending_function_calls.len();
                if abandoned > 0 {
                    tracing::debug!(response_id = %response.id, abandoned, "Dropped unfinished function calls");
                }
                let outcome = response
                    .status
                    .as_deref()
                    .map(ResponseOutcome::from_status)
                    .unwrap_or(ResponseOutcome::Completed);
                Some(SessionEvent::ResponseDone {
                    response_id: response.id,
                    outcome,
                })
            }

            ServerEvent::OutputItemAdded { response_id, item } => {
                if item.item_type == "function_call"
                    && let (Some(call_id), Some(name)) = (item.call_id, item.name)
                {
                    tracing::debug!(call_id = %call_id, name = %name, "Tracking function call");
                    self.pending_function_calls
                        .insert(call_id, PendingCall { response_id, name });
                }
                None
            }

            ServerEvent::TextDelta { response_id, delta } => {
                Some(SessionEvent::ResponseTextDelta {
                    response_id,
                    text: delta,
                })
            }

            ServerEvent::AudioTranscriptDone { transcript, .. } => Some(SessionEvent::Transcript {
                role: TranscriptRole::Assistant,
                text: transcript,
            }),

            ServerEvent::AudioDelta { response_id, delta } => {
                match ServerEvent::decode_audio_delta(&delta) {
                    Ok(bytes) => Some(SessionEvent::ResponseAudioDelta {
                        response_id,
                        data: Bytes::from(bytes),
                    }),
                    Err(e) => {
                        tracing::warn!(response_id = %response_id, error = %e, "Failed to decode audio delta");
                        Some(SessionEvent::TransportError {
                            detail: format!("Undecodable audio delta: {e}"),
                            fatal: false,
                        })
                    }
                }
            }

            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                item_id,
                name,
                arguments,
                ..
            } => {
                let name = self
                    .pending_function_calls
                    .remove(&call_id)
                    .map(|call| call.name)
                    .or(name)
                    .unwrap_or_else(|| {
                        tracing::warn!(call_id = %call_id, "Function name not found for call");
                        String::new()
                    });

                Some(SessionEvent::FunctionCallRequested(FunctionCallRequest {
                    call_id,
                    name,
                    arguments,
                    item_id,
                }))
            }

            ServerEvent::Unknown => {
                tracing::trace!("Unhandled server event");
                None
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use base64::prelude::*;

    #[test]
    fn test_new_requires_api_key() {
        let result = OpenAIRealtime::new(OpenAIRealtimeSettings::new(""));
        assert!(matches!(
            result,
            Err(RealtimeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_build_request_headers() {
        let connector = OpenAIRealtime::new(
            OpenAIRealtimeSettings::new("sk-test").with_endpoint("ws://127.0.0.1:9100/v1/realtime"),
        )
        .unwrap();
        let request = connector.build_request().unwrap();
        let headers = request.headers();
        assert_eq!(headers["Authorization"], "Bearer sk-test");
        assert_eq!(headers["OpenAI-Beta"], "realtime=v1");
        assert_eq!(headers["Host"], "127.0.0.1:9100");
        assert!(request.uri().to_string().contains("model="));
    }

    #[test]
    fn test_encode_text_input_requests_response() {
        let events = encode_outbound(&OutboundEvent::TextInput("hi".to_string()));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), "conversation.item.create");
        assert_eq!(events[1].event_type(), "response.create");
    }

    #[test]
    fn test_encode_cancel() {
        let events = encode_outbound(&OutboundEvent::CancelResponse {
            response_id: "resp_1".to_string(),
        });
        let json = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(json["type"], "response.cancel");
        assert_eq!(json["response_id"], "resp_1");
    }

    #[test]
    fn test_decode_function_call_uses_tracked_name() {
        let mut decoder = EventDecoder::default();
        let added = r#"{"type":"response.output_item.added","response_id":"resp_1","output_index":0,
            "item":{"id":"item_1","type":"function_call","call_id":"call_1","name":"get_status"}}"#;
        assert!(decoder.decode(added).is_none());

        let done = r#"{"type":"response.function_call_arguments.done","response_id":"resp_1",
            "item_id":"item_1","output_index":0,"call_id":"call_1","arguments":"{}"}"#;
        match decoder.decode(done) {
            Some(SessionEvent::FunctionCallRequested(call)) => {
                assert_eq!(call.name, "get_status");
                assert_eq!(call.call_id, "call_1");
                assert_eq!(call.arguments, "{}");
            }
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_audio_delta() {
        let mut decoder = EventDecoder::default();
        let payload = BASE64_STANDARD.encode([1u8, 2, 3, 4]);
        let text = format!(
            r#"{{"type":"response.audio.delta","response_id":"resp_2","item_id":"i","output_index":0,"content_index":0,"delta":"{payload}"}}"#
        );
        match decoder.decode(&text) {
            Some(SessionEvent::ResponseAudioDelta { response_id, data }) => {
                assert_eq!(response_id, "resp_2");
                assert_eq!(&data[..], &[1, 2, 3, 4]);
            }
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_malformed_is_non_fatal() {
        let mut decoder = EventDecoder::default();
        match decoder.decode("{not json") {
            Some(SessionEvent::TransportError { fatal, .. }) => assert!(!fatal),
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_error_event_is_non_fatal() {
        let mut decoder = EventDecoder::default();
        let text = r#"{"type":"error","error":{"type":"invalid_request_error","code":"response_cancel_not_active","message":"No active response"}}"#;
        match decoder.decode(text) {
            Some(SessionEvent::TransportError { detail, fatal }) => {
                assert!(!fatal);
                assert!(detail.contains("No active response"));
            }
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_ignores_unknown_events() {
        let mut decoder = EventDecoder::default();
        assert!(
            decoder
                .decode(r#"{"type":"response.audio.done","response_id":"r"}"#)
                .is_none()
        );
    }

    #[test]
    fn test_response_done_forgets_unfinished_calls() {
        let mut decoder = EventDecoder::default();
        for (response, call) in [("resp_a", "call_a"), ("resp_b", "call_b")] {
            let added = format!(
                r#"{{"type":"response.output_item.added","response_id":"{response}",
                "item":{{"id":"item_{call}","type":"function_call","call_id":"{call}","name":"move_forward"}}}}"#
            );
            assert!(decoder.decode(&added).is_none());
        }
        assert_eq!(decoder.pending_function_calls.len(), 2);

        // resp_a was cancelled before its arguments were streamed.
        decoder.decode(r#"{"type":"response.done","response":{"id":"resp_a","status":"cancelled"}}"#);
        assert_eq!(decoder.pending_function_calls.len(), 1);
        assert!(decoder.pending_function_calls.contains_key("call_b"));
    }

    #[test]
    fn test_decode_response_done_outcome() {
        let mut decoder = EventDecoder::default();
        let text = r#"{"type":"response.done","response":{"id":"resp_3","status":"cancelled"}}"#;
        match decoder.decode(text) {
            Some(SessionEvent::ResponseDone {
                response_id,
                outcome,
            }) => {
                assert_eq!(response_id, "resp_3");
                assert_eq!(outcome, ResponseOutcome::Cancelled);
            }
            other => panic!("Unexpected event: {other:?}"),
        }
    }
}
