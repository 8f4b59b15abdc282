//! Session wrapper enforcing the transport contract over any connector.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::base::{
    OutboundEvent, RealtimeConnector, RealtimeError, RealtimeResult, SessionEvent, SessionSetup,
    SessionStatus, StatusCell,
};

/// How long `close` waits for the I/O task to flush before aborting it.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

struct SendState {
    tx: mpsc::Sender<OutboundEvent>,
    status: StatusCell,
    configured: AtomicBool,
    audio_enabled: AtomicBool,
    send_timeout: Duration,
}

impl SendState {
    fn check(&self, event: &OutboundEvent) -> RealtimeResult<()> {
        if matches!(event, OutboundEvent::Configure(_)) {
            return Err(RealtimeError::Configuration(
                "session setup is sent through configure".to_string(),
            ));
        }
        if !self.status.is_open() {
            return Err(RealtimeError::SessionClosed);
        }
        if !self.configured.load(Ordering::SeqCst) {
            return Err(RealtimeError::Configuration(
                "session is not configured".to_string(),
            ));
        }
        if matches!(event, OutboundEvent::AudioChunk(_))
            && !self.audio_enabled.load(Ordering::SeqCst)
        {
            return Err(RealtimeError::Configuration(
                "audio modality is not enabled".to_string(),
            ));
        }
        Ok(())
    }

    async fn enqueue(&self, event: OutboundEvent) -> RealtimeResult<()> {
        match tokio::time::timeout(self.send_timeout, self.tx.send(event)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                self.status.close();
                Err(RealtimeError::SessionClosed)
            }
            Err(_) => Err(RealtimeError::Backpressure(self.send_timeout)),
        }
    }
}

/// Cloneable handle for sending outbound events.
///
/// Every send is bounded by the session's send timeout.
#[derive(Clone)]
pub struct OutboundSender {
    state: Arc<SendState>,
}

impl OutboundSender {
    /// Enqueue an event, waiting at most the send timeout for queue space.
    pub async fn send(&self, event: OutboundEvent) -> RealtimeResult<()> {
        self.state.check(&event)?;
        let kind = event.kind();
        let result = self.state.enqueue(event).await;
        if let Err(RealtimeError::Backpressure(waited)) = &result {
            tracing::debug!(kind, ?waited, "Outbound send timed out");
        }
        result
    }

    /// Enqueue without waiting. A full queue is reported as backpressure.
    pub fn try_send(&self, event: OutboundEvent) -> RealtimeResult<()> {
        self.state.check(&event)?;
        match self.state.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RealtimeError::Backpressure(Duration::ZERO)),
            Err(TrySendError::Closed(_)) => {
                self.state.status.close();
                Err(RealtimeError::SessionClosed)
            }
        }
    }

    /// Whether the session still accepts sends.
    pub fn is_open(&self) -> bool {
        self.state.status.is_open()
    }
}

impl std::fmt::Debug for OutboundSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundSender")
            .field("status", &self.state.status.get())
            .field("send_timeout", &self.state.send_timeout)
            .finish()
    }
}

/// Inbound event stream of a session. Ends when the session closes.
pub struct EventStream {
    rx: mpsc::Receiver<SessionEvent>,
}

impl EventStream {
    /// Next inbound event, or `None` once the session is closed.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// One logical connection to the realtime endpoint.
pub struct Session {
    id: String,
    connector: &'static str,
    state: Arc<SendState>,
    events: Option<EventStream>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Connect through the given connector.
    pub async fn connect(
        connector: Arc<dyn RealtimeConnector>,
        send_timeout: Duration,
    ) -> RealtimeResult<Self> {
        let link = connector.connect().await?;
        let id = uuid::Uuid::new_v4().to_string();

        tracing::info!(session_id = %id, connector = connector.name(), "Realtime session opened");

        Ok(Self {
            id,
            connector: connector.name(),
            state: Arc::new(SendState {
                tx: link.outbound,
                status: link.status,
                configured: AtomicBool::new(false),
                audio_enabled: AtomicBool::new(false),
                send_timeout,
            }),
            events: Some(EventStream { rx: link.inbound }),
            shutdown: link.shutdown,
            task: Mutex::new(link.task),
        })
    }

    /// Local session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Open/closed status.
    pub fn status(&self) -> SessionStatus {
        self.state.status.get()
    }

    /// Whether `configure` has succeeded.
    pub fn is_configured(&self) -> bool {
        self.state.configured.load(Ordering::SeqCst)
    }

    /// Send the session setup. Must happen exactly once, before any other send.
    pub async fn configure(&self, setup: SessionSetup) -> RealtimeResult<()> {
        if !self.state.status.is_open() {
            return Err(RealtimeError::Configuration(
                "session is closed".to_string(),
            ));
        }
        if self.state.configured.swap(true, Ordering::SeqCst) {
            return Err(RealtimeError::Configuration(
                "session is already configured".to_string(),
            ));
        }

        let audio = setup.has_audio();
        let tools = setup.tools.len();
        if let Err(e) = self.state.enqueue(OutboundEvent::Configure(setup)).await {
            self.state.configured.store(false, Ordering::SeqCst);
            return Err(e);
        }
        self.state.audio_enabled.store(audio, Ordering::SeqCst);

        tracing::info!(session_id = %self.id, audio, tools, "Realtime session configured");
        Ok(())
    }

    /// Take the inbound event stream. Available once per session.
    pub fn events(&mut self) -> Option<EventStream> {
        self.events.take()
    }

    /// Handle for sending outbound events.
    pub fn sender(&self) -> OutboundSender {
        OutboundSender {
            state: self.state.clone(),
        }
    }

    /// Send an outbound event with the session's bounded timeout.
    pub async fn send(&self, event: OutboundEvent) -> RealtimeResult<()> {
        self.sender().send(event).await
    }

    /// Flush pending sends and release the connection. Safe to call repeatedly.
    pub async fn close(&self) {
        let was_open = self.state.status.close();
        self.shutdown.cancel();

        let task = self.task.lock().take();
        if let Some(mut handle) = task {
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                tracing::warn!(session_id = %self.id, "Transport task did not finish in time; aborting");
                handle.abort();
            }
        }

        if was_open {
            tracing::info!(session_id = %self.id, connector = self.connector, "Realtime session closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.state.status.close();
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connector", &self.connector)
            .field("status", &self.status())
            .field("configured", &self.is_configured())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::base::Modality;
    use crate::core::realtime::loopback::LoopbackConnector;
    use bytes::Bytes;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn text_setup() -> SessionSetup {
        SessionSetup {
            modalities: Modality::set_for(false),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_before_configure_fails() {
        let (connector, _peer) = LoopbackConnector::new(8);
        let session = Session::connect(Arc::new(connector), TIMEOUT).await.unwrap();

        let result = session
            .send(OutboundEvent::TextInput("hello".to_string()))
            .await;
        assert!(matches!(result, Err(RealtimeError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_configure_once() {
        let (connector, peer) = LoopbackConnector::new(8);
        let session = Session::connect(Arc::new(connector), TIMEOUT).await.unwrap();

        session.configure(text_setup()).await.unwrap();
        assert!(session.is_configured());
        assert!(matches!(
            peer.try_next_outbound(),
            Some(OutboundEvent::Configure(_))
        ));

        let again = session.configure(text_setup()).await;
        assert!(matches!(again, Err(RealtimeError::Configuration(_))));
        assert!(peer.try_next_outbound().is_none());
    }

    #[tokio::test]
    async fn test_configure_after_close_fails() {
        let (connector, _peer) = LoopbackConnector::new(8);
        let session = Session::connect(Arc::new(connector), TIMEOUT).await.unwrap();
        session.close().await;

        let result = session.configure(text_setup()).await;
        assert!(matches!(result, Err(RealtimeError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_send_times_out_with_backpressure() {
        let (connector, _peer) = LoopbackConnector::new(1);
        let session = Session::connect(Arc::new(connector), TIMEOUT).await.unwrap();
        // The setup occupies the only slot.
        session.configure(text_setup()).await.unwrap();

        let result = session.send(OutboundEvent::RequestResponse).await;
        assert!(matches!(result, Err(RealtimeError::Backpressure(_))));
        assert_eq!(session.status(), SessionStatus::Open);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (connector, _peer) = LoopbackConnector::new(8);
        let session = Session::connect(Arc::new(connector), TIMEOUT).await.unwrap();
        session.configure(text_setup()).await.unwrap();
        let sender = session.sender();

        session.close().await;
        session.close().await;

        let result = sender.send(OutboundEvent::RequestResponse).await;
        assert!(matches!(result, Err(RealtimeError::SessionClosed)));
        assert_eq!(session.status(), SessionStatus::Closed);
    }

    #[tokio::test]
    async fn test_audio_rejected_in_text_only_session() {
        let (connector, _peer) = LoopbackConnector::new(8);
        let session = Session::connect(Arc::new(connector), TIMEOUT).await.unwrap();
        session.configure(text_setup()).await.unwrap();

        let result = session
            .send(OutboundEvent::AudioChunk(Bytes::from_static(&[0, 0])))
            .await;
        assert!(matches!(result, Err(RealtimeError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_events_taken_once() {
        let (connector, _peer) = LoopbackConnector::new(8);
        let mut session = Session::connect(Arc::new(connector), TIMEOUT).await.unwrap();
        assert!(session.events().is_some());
        assert!(session.events().is_none());
    }

    #[tokio::test]
    async fn test_try_send_full_is_backpressure() {
        let (connector, _peer) = LoopbackConnector::new(1);
        let session = Session::connect(Arc::new(connector), TIMEOUT).await.unwrap();
        session.configure(text_setup()).await.unwrap();

        let result = session.sender().try_send(OutboundEvent::RequestResponse);
        assert!(matches!(result, Err(RealtimeError::Backpressure(_))));
    }
}
