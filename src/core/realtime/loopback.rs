//! In-memory loopback connector.
//!
//! The connector hands the session one end of a pair of bounded channels; the
//! [`LoopbackPeer`] holds the other end and plays the endpoint. Used by tests
//! and by offline runs of the binary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tokio::task::JoinHandle;

use super::base::{
    FunctionCallRequest, OutboundEvent, RealtimeConnector, RealtimeError, RealtimeResult,
    ResponseOutcome, SessionEvent, StatusCell, TransportLink,
};

/// Text prefix that makes the echo peer request a capability call:
/// `/call <name> <json arguments>`.
pub const ECHO_CALL_PREFIX: &str = "/call ";

/// Connector producing a link to an in-memory peer. Connects once.
pub struct LoopbackConnector {
    pending: Mutex<Option<TransportLink>>,
}

impl LoopbackConnector {
    /// Create a connector and its peer with the given channel capacity.
    pub fn new(capacity: usize) -> (Self, LoopbackPeer) {
        let capacity = capacity.max(1);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let status = StatusCell::open();
        let shutdown = CancellationToken::new();

        let link = TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
            status: status.clone(),
            shutdown: shutdown.clone(),
            task: None,
        };

        let peer = LoopbackPeer {
            inner: Arc::new(PeerInner {
                outbound: tokio::sync::Mutex::new(outbound_rx),
                inbound: Mutex::new(Some(inbound_tx)),
                status,
                shutdown,
            }),
        };

        (
            Self {
                pending: Mutex::new(Some(link)),
            },
            peer,
        )
    }
}

#[async_trait]
impl RealtimeConnector for LoopbackConnector {
    async fn connect(&self) -> RealtimeResult<TransportLink> {
        self.pending.lock().take().ok_or_else(|| {
            RealtimeError::ConnectionFailed("loopback peer already connected".to_string())
        })
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

struct PeerInner {
    outbound: tokio::sync::Mutex<mpsc::Receiver<OutboundEvent>>,
    inbound: Mutex<Option<mpsc::Sender<SessionEvent>>>,
    status: StatusCell,
    shutdown: CancellationToken,
}

/// The endpoint side of a loopback link.
#[derive(Clone)]
pub struct LoopbackPeer {
    inner: Arc<PeerInner>,
}

impl LoopbackPeer {
    /// Deliver an inbound event to the session. Returns false once severed
    /// or when the session's stream is gone.
    pub async fn emit(&self, event: SessionEvent) -> bool {
        let tx = self.inner.inbound.lock().clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Next event the session sent, waiting up to `timeout`.
    pub async fn next_outbound(&self, timeout: Duration) -> Option<OutboundEvent> {
        let mut rx = self.inner.outbound.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// Next event the session sent, if one is already queued.
    pub fn try_next_outbound(&self) -> Option<OutboundEvent> {
        let mut rx = self.inner.outbound.try_lock().ok()?;
        rx.try_recv().ok()
    }

    /// Every event currently queued by the session.
    pub fn drain_outbound(&self) -> Vec<OutboundEvent> {
        let mut drained = Vec::new();
        while let Some(event) = self.try_next_outbound() {
            drained.push(event);
        }
        drained
    }

    /// Simulate connection loss: close the session, emit a fatal transport
    /// error and end the inbound stream.
    pub async fn sever(&self, detail: impl Into<String>) {
        let tx = self.inner.inbound.lock().take();
        if self.inner.status.close() {
            if let Some(tx) = tx {
                let _ = tx
                    .send(SessionEvent::TransportError {
                        detail: detail.into(),
                        fatal: true,
                    })
                    .await;
            }
        }
    }

    /// Whether the session side is still open.
    pub fn is_open(&self) -> bool {
        self.inner.status.is_open()
    }

    /// Resolves once the session requests shutdown.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await;
    }

    async fn recv_outbound(&self) -> Option<OutboundEvent> {
        self.inner.outbound.lock().await.recv().await
    }

    /// Play a minimal text-only endpoint until the session closes.
    ///
    /// Text input is echoed back as a response. Input starting with
    /// [`ECHO_CALL_PREFIX`] becomes a function call request instead, and the
    /// next requested response reports the function output.
    pub fn spawn_echo(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_output: Option<String> = None;
            let mut responses = 0u64;
            loop {
                let event = tokio::select! {
                    _ = self.closed() => break,
                    event = self.recv_outbound() => event,
                };
                let Some(event) = event else { break };

                match event {
                    OutboundEvent::Configure(_) => {
                        let session_id = format!("loopback-{}", uuid::Uuid::new_v4());
                        self.emit(SessionEvent::SessionCreated { session_id }).await;
                    }
                    OutboundEvent::TextInput(text) => {
                        if let Some(request) = parse_call(&text) {
                            tracing::debug!(name = %request.name, "Echo peer requesting call");
                            self.emit(SessionEvent::FunctionCallRequested(request)).await;
                        } else {
                            responses += 1;
                            self.respond(responses, &format!("You said: {text}")).await;
                        }
                    }
                    OutboundEvent::FunctionResult { output, .. } => {
                        last_output = Some(output);
                    }
                    OutboundEvent::RequestResponse => {
                        responses += 1;
                        let reply = match last_output.take() {
                            Some(output) => format!("Function returned {output}"),
                            None => "Nothing new to report.".to_string(),
                        };
                        self.respond(responses, &reply).await;
                    }
                    OutboundEvent::AudioChunk(_) | OutboundEvent::CancelResponse { .. } => {}
                }
            }
            tracing::debug!(responses, "Echo peer finished");
        })
    }

    async fn respond(&self, sequence: u64, text: &str) {
        let response_id = format!("resp_{sequence}");
        self.emit(SessionEvent::ResponseStarted {
            response_id: response_id.clone(),
        })
        .await;
        for word in text.split_inclusive(' ') {
            self.emit(SessionEvent::ResponseTextDelta {
                response_id: response_id.clone(),
                text: word.to_string(),
            })
            .await;
        }
        self.emit(SessionEvent::ResponseDone {
            response_id,
            outcome: ResponseOutcome::Completed,
        })
        .await;
    }
}

fn parse_call(text: &str) -> Option<FunctionCallRequest> {
    let rest = text.trim().strip_prefix(ECHO_CALL_PREFIX)?.trim();
    let (name, arguments) = match rest.split_once(char::is_whitespace) {
        Some((name, arguments)) => (name, arguments.trim()),
        None => (rest, "{}"),
    };
    if name.is_empty() {
        return None;
    }
    Some(FunctionCallRequest {
        call_id: format!("call_{}", uuid::Uuid::new_v4().simple()),
        name: name.to_string(),
        arguments: arguments.to_string(),
        item_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_once() {
        let (connector, _peer) = LoopbackConnector::new(4);
        assert!(connector.connect().await.is_ok());
        assert!(matches!(
            connector.connect().await,
            Err(RealtimeError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_emit_reaches_link() {
        let (connector, peer) = LoopbackConnector::new(4);
        let mut link = connector.connect().await.unwrap();

        assert!(
            peer.emit(SessionEvent::SpeechStarted { audio_start_ms: 10 })
                .await
        );
        assert!(matches!(
            link.inbound.recv().await,
            Some(SessionEvent::SpeechStarted { audio_start_ms: 10 })
        ));
    }

    #[tokio::test]
    async fn test_sever_ends_stream_with_fatal_error() {
        let (connector, peer) = LoopbackConnector::new(4);
        let mut link = connector.connect().await.unwrap();

        peer.sever("cable cut").await;
        assert!(!link.status.is_open());
        assert!(matches!(
            link.inbound.recv().await,
            Some(SessionEvent::TransportError { fatal: true, .. })
        ));
        assert!(link.inbound.recv().await.is_none());
        assert!(!peer.emit(SessionEvent::SpeechStopped { audio_end_ms: 0 }).await);
    }

    #[tokio::test]
    async fn test_drain_outbound() {
        let (connector, peer) = LoopbackConnector::new(4);
        let link = connector.connect().await.unwrap();
        link.outbound
            .send(OutboundEvent::RequestResponse)
            .await
            .unwrap();
        link.outbound
            .send(OutboundEvent::TextInput("x".to_string()))
            .await
            .unwrap();

        let drained = peer.drain_outbound();
        assert_eq!(drained.len(), 2);
        assert!(peer.try_next_outbound().is_none());
    }

    #[test]
    fn test_parse_call() {
        let request = parse_call("/call get_menu_by_category {\"category\":\"coffee\"}").unwrap();
        assert_eq!(request.name, "get_menu_by_category");
        assert_eq!(request.arguments, r#"{"category":"coffee"}"#);

        let request = parse_call("/call view_current_order").unwrap();
        assert_eq!(request.arguments, "{}");

        assert!(parse_call("hello").is_none());
        assert!(parse_call("/call ").is_none());
    }

    #[tokio::test]
    async fn test_echo_replies_to_text() {
        let (connector, peer) = LoopbackConnector::new(16);
        let mut link = connector.connect().await.unwrap();
        let echo = peer.clone().spawn_echo();

        link.outbound
            .send(OutboundEvent::TextInput("hi there".to_string()))
            .await
            .unwrap();

        let mut text = String::new();
        loop {
            match link.inbound.recv().await.unwrap() {
                SessionEvent::ResponseTextDelta { text: delta, .. } => text.push_str(&delta),
                SessionEvent::ResponseDone { outcome, .. } => {
                    assert_eq!(outcome, ResponseOutcome::Completed);
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(text, "You said: hi there");

        link.shutdown.cancel();
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_echo_reports_function_output() {
        let (connector, peer) = LoopbackConnector::new(16);
        let mut link = connector.connect().await.unwrap();
        let _echo = peer.clone().spawn_echo();

        link.outbound
            .send(OutboundEvent::TextInput("/call stop".to_string()))
            .await
            .unwrap();
        let call_id = match link.inbound.recv().await.unwrap() {
            SessionEvent::FunctionCallRequested(request) => {
                assert_eq!(request.name, "stop");
                request.call_id
            }
            other => panic!("unexpected event: {other:?}"),
        };

        link.outbound
            .send(OutboundEvent::FunctionResult {
                call_id,
                output: "{\"status\":\"ok\"}".to_string(),
            })
            .await
            .unwrap();
        link.outbound.send(OutboundEvent::RequestResponse).await.unwrap();

        let mut text = String::new();
        while let Some(event) = link.inbound.recv().await {
            match event {
                SessionEvent::ResponseTextDelta { text: delta, .. } => text.push_str(&delta),
                SessionEvent::ResponseDone { .. } => break,
                _ => {}
            }
        }
        assert!(text.contains(r#"{"status":"ok"}"#));
    }
}
