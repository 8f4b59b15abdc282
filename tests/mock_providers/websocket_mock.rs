//! WebSocket mock of the OpenAI Realtime endpoint.
//!
//! Accepts connections, records the upgrade request and every client event,
//! and sends whatever server events the test scripts.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;

/// Commands a test sends to one accepted connection.
enum Command {
    Send(Value),
    Drop,
}

/// Upgrade request details captured by the server.
#[derive(Debug, Clone, Default)]
pub struct CapturedRequest {
    pub path_and_query: String,
    pub authorization: Option<String>,
    pub beta: Option<String>,
}

/// One accepted client connection.
pub struct MockConnection {
    pub request: CapturedRequest,
    commands: mpsc::UnboundedSender<Command>,
    received: mpsc::UnboundedReceiver<Value>,
}

impl MockConnection {
    /// Send a server event to the client.
    pub fn send(&self, event: Value) {
        let _ = self.commands.send(Command::Send(event));
    }

    /// Drop the TCP connection without a close frame.
    pub fn drop_connection(&self) {
        let _ = self.commands.send(Command::Drop);
    }

    /// Next client event, waiting up to two seconds.
    pub async fn next_event(&mut self) -> Option<Value> {
        tokio::time::timeout(Duration::from_secs(2), self.received.recv())
            .await
            .ok()
            .flatten()
    }

    /// Skip client events until one of the given type arrives.
    pub async fn expect_event(&mut self, event_type: &str) -> Value {
        while let Some(event) = self.next_event().await {
            if event["type"] == event_type {
                return event;
            }
        }
        panic!("client never sent {event_type}");
    }
}

/// Mock realtime server bound to an ephemeral local port.
pub struct MockRealtimeServer {
    pub addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<MockConnection>,
}

impl MockRealtimeServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_tx = conn_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, conn_tx).await {
                        eprintln!("Mock connection error: {e}");
                    }
                });
            }
        });

        Self { addr, connections }
    }

    /// Endpoint URL to configure the connector with.
    pub fn url(&self) -> String {
        format!("ws://{}/v1/realtime", self.addr)
    }

    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> MockConnection {
        tokio::time::timeout(Duration::from_secs(2), self.connections.recv())
            .await
            .expect("no client connected")
            .expect("server stopped")
    }
}

async fn handle_connection(
    stream: TcpStream,
    conn_tx: mpsc::UnboundedSender<MockConnection>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let captured = Arc::new(Mutex::new(CapturedRequest::default()));
    let capture = captured.clone();
    let callback = move |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        *capture.lock() = CapturedRequest {
            path_and_query: request
                .uri()
                .path_and_query()
                .map(|pq| pq.to_string())
                .unwrap_or_default(),
            authorization: header("authorization"),
            beta: header("openai-beta"),
        };
        // The client asks for the "realtime" subprotocol.
        response
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("realtime"));
        Ok(response)
    };

    let ws_stream = accept_hdr_async(stream, callback).await?;
    let (mut write, mut read) = ws_stream.split();

    let (commands, mut command_rx) = mpsc::unbounded_channel();
    let (received_tx, received) = mpsc::unbounded_channel();
    let request = captured.lock().clone();
    let _ = conn_tx.send(MockConnection {
        request,
        commands,
        received,
    });

    let created = json!({
        "type": "session.created",
        "session": { "id": "sess_mock", "model": "gpt-4o-realtime-preview" }
    });
    write.send(Message::Text(created.to_string().into())).await?;

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(Command::Send(event)) => {
                    write.send(Message::Text(event.to_string().into())).await?;
                }
                Some(Command::Drop) | None => return Ok(()),
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(event) = serde_json::from_str::<Value>(&text) {
                        let _ = received_tx.send(event);
                    }
                }
                Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}
