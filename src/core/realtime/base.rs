//! Base traits and types for the realtime session transport.
//!
//! This module defines the typed vocabulary shared by every transport
//! implementation: the outbound events the orchestrator may send, the inbound
//! events a session produces, session setup parameters and the connector seam
//! that produces a live link to the endpoint.
//!
//! # Audio Format
//!
//! Audio chunks exchanged with the endpoint are PCM 16-bit signed
//! little-endian, mono, at 24kHz.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime session operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Session misuse: configured twice, configured after close, or sending
    /// before the session was configured.
    #[error("Session configuration error: {0}")]
    Configuration(String),

    /// The outbound queue stayed full for the whole send timeout
    #[error("Outbound queue full for {0:?}")]
    Backpressure(Duration),

    /// The session is closed and accepts no further sends
    #[error("Session closed")]
    SessionClosed,

    /// Invalid connector settings
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Connection to the endpoint failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl RealtimeError {
    /// Whether the caller may retry the same operation later.
    pub fn is_retriable(&self) -> bool {
        matches!(self, RealtimeError::Backpressure(_))
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Session Setup
// =============================================================================

/// Enabled input/output medium for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Text input and output
    Text,
    /// Audio input and output
    Audio,
}

impl Modality {
    /// Convert to the wire parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
        }
    }

    /// Modalities for a session with or without working audio devices.
    pub fn set_for(audio: bool) -> Vec<Modality> {
        if audio {
            vec![Modality::Text, Modality::Audio]
        } else {
            vec![Modality::Text]
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for input audio transcription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputTranscriptionConfig {
    /// Model to use for transcription (e.g., "whisper-1")
    pub model: String,
}

/// Configuration for turn detection (VAD).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Endpoint-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(default)]
        threshold: Option<f32>,
        /// Amount of audio to include before voice detection (ms)
        #[serde(default)]
        prefix_padding_ms: Option<u32>,
        /// Silence duration before end of turn (ms)
        #[serde(default)]
        silence_duration_ms: Option<u32>,
        /// Whether the endpoint starts a response when the turn ends
        #[serde(default)]
        create_response: Option<bool>,
        /// Whether the endpoint interrupts its own output on speech
        #[serde(default)]
        interrupt_response: Option<bool>,
    },
    /// Semantic-aware turn detection
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// Eagerness level (low, medium, high, auto)
        #[serde(default)]
        eagerness: Option<String>,
        /// Whether to create response on turn end
        #[serde(default)]
        create_response: Option<bool>,
        /// Interrupt model output on speech detection
        #[serde(default)]
        interrupt_response: Option<bool>,
    },
    /// No automatic turn detection
    #[serde(rename = "none")]
    None,
}

impl TurnDetectionConfig {
    /// Server VAD with the given sensitivity and timing.
    pub fn server_vad(threshold: f32, prefix_padding_ms: u32, silence_duration_ms: u32) -> Self {
        TurnDetectionConfig::ServerVad {
            threshold: Some(threshold),
            prefix_padding_ms: Some(prefix_padding_ms),
            silence_duration_ms: Some(silence_duration_ms),
            create_response: Some(true),
            interrupt_response: None,
        }
    }
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self::server_vad(0.5, 300, 200)
    }
}

/// Tool definition for function calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function definition
    pub function: FunctionDefinition,
}

impl ToolDefinition {
    /// Create a function tool.
    pub fn function(
        name: impl Into<String>,
        description: Option<String>,
        parameters: Option<serde_json::Value>,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description,
                parameters,
            },
        }
    }
}

/// Function definition for tool calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name
    pub name: String,
    /// Function description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Everything sent to the endpoint once, at session start.
#[derive(Debug, Clone, Default)]
pub struct SessionSetup {
    /// Enabled modalities
    pub modalities: Vec<Modality>,
    /// Turn detection parameters
    pub turn_detection: TurnDetectionConfig,
    /// Capability schema list, in registration order
    pub tools: Vec<ToolDefinition>,
    /// System instructions for the assistant
    pub instructions: Option<String>,
    /// Voice for audio output
    pub voice: Option<String>,
    /// Transcription of user audio, if wanted
    pub input_transcription: Option<InputTranscriptionConfig>,
}

impl SessionSetup {
    /// Whether the setup enables audio.
    pub fn has_audio(&self) -> bool {
        self.modalities.contains(&Modality::Audio)
    }
}

// =============================================================================
// Events
// =============================================================================

/// Structured messages sent to the endpoint.
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    /// Session setup. Only produced by `Session::configure`.
    Configure(SessionSetup),
    /// One captured PCM chunk
    AudioChunk(Bytes),
    /// A typed user message; the endpoint is asked to respond to it
    TextInput(String),
    /// Cancel the given in-flight response
    CancelResponse {
        /// Response to cancel
        response_id: String,
    },
    /// Result of a function call, correlated by call id
    FunctionResult {
        /// Call ID from the originating request
        call_id: String,
        /// Serialized result payload
        output: String,
    },
    /// Ask the endpoint to generate a response now
    RequestResponse,
}

impl OutboundEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Configure(_) => "configure",
            OutboundEvent::AudioChunk(_) => "audio_chunk",
            OutboundEvent::TextInput(_) => "text_input",
            OutboundEvent::CancelResponse { .. } => "cancel_response",
            OutboundEvent::FunctionResult { .. } => "function_result",
            OutboundEvent::RequestResponse => "request_response",
        }
    }
}

/// Function call request from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRequest {
    /// Call ID for the function call
    pub call_id: String,
    /// Function name
    pub name: String,
    /// JSON arguments
    pub arguments: String,
    /// Item ID
    pub item_id: Option<String>,
}

/// Role of the speaker in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    /// User speech transcript
    User,
    /// Assistant speech transcript
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// How the endpoint finished a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Generated to the end
    Completed,
    /// Cancelled by a client request or turn detection
    Cancelled,
    /// Stopped early (token limit, content filter)
    Incomplete,
    /// Failed on the endpoint side
    Failed,
}

impl ResponseOutcome {
    /// Parse the endpoint's status string; unknown values count as completed.
    pub fn from_status(status: &str) -> Self {
        match status {
            "cancelled" => Self::Cancelled,
            "incomplete" => Self::Incomplete,
            "failed" => Self::Failed,
            _ => Self::Completed,
        }
    }
}

/// Typed inbound events produced by a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The endpoint acknowledged the session
    SessionCreated {
        /// Endpoint-side session id
        session_id: String,
    },
    /// A response began streaming
    ResponseStarted {
        /// Response ID
        response_id: String,
    },
    /// Audio chunk for a response (decoded PCM)
    ResponseAudioDelta {
        /// Response ID
        response_id: String,
        /// PCM bytes
        data: Bytes,
    },
    /// Text chunk for a response
    ResponseTextDelta {
        /// Response ID
        response_id: String,
        /// Text delta
        text: String,
    },
    /// A response finished
    ResponseDone {
        /// Response ID
        response_id: String,
        /// How it finished
        outcome: ResponseOutcome,
    },
    /// Turn detection heard the user start speaking
    SpeechStarted {
        /// Audio timestamp in milliseconds
        audio_start_ms: u64,
    },
    /// Turn detection heard the user stop speaking
    SpeechStopped {
        /// Audio timestamp in milliseconds
        audio_end_ms: u64,
    },
    /// The model wants a capability invoked
    FunctionCallRequested(FunctionCallRequest),
    /// Final transcript of user or assistant speech
    Transcript {
        /// Speaker
        role: TranscriptRole,
        /// Transcript text
        text: String,
    },
    /// Transport problem; fatal when the connection is gone
    TransportError {
        /// Human-readable detail
        detail: String,
        /// Whether the session is closed as a result
        fatal: bool,
    },
}

// =============================================================================
// Session Status
// =============================================================================

/// Open/closed status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Connected; sends are accepted
    Open,
    /// Closed locally or by connection loss
    Closed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Open => write!(f, "Open"),
            SessionStatus::Closed => write!(f, "Closed"),
        }
    }
}

/// Shared, lock-free open flag for a session and its I/O task.
#[derive(Debug, Clone)]
pub struct StatusCell(Arc<AtomicBool>);

impl StatusCell {
    /// A cell in the open state.
    pub fn open() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Current status.
    pub fn get(&self) -> SessionStatus {
        if self.0.load(Ordering::SeqCst) {
            SessionStatus::Open
        } else {
            SessionStatus::Closed
        }
    }

    /// Whether the session is open.
    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Mark closed. Returns true if this call performed the transition.
    pub fn close(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

// =============================================================================
// Connector
// =============================================================================

/// A live link to the endpoint, produced by a connector.
///
/// The connector owns the wire; the link carries the channel ends the
/// session uses to talk to it.
pub struct TransportLink {
    /// Outbound events to the wire
    pub outbound: mpsc::Sender<OutboundEvent>,
    /// Inbound events from the wire
    pub inbound: mpsc::Receiver<SessionEvent>,
    /// Open flag shared with the I/O task
    pub status: StatusCell,
    /// Cancelled to request a flush-and-close
    pub shutdown: CancellationToken,
    /// I/O task driving the wire, if any
    pub task: Option<JoinHandle<()>>,
}

/// Produces a live link to a realtime endpoint.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Open the underlying connection.
    async fn connect(&self) -> RealtimeResult<TransportLink>;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

/// Boxed connector.
pub type BoxedConnector = Arc<dyn RealtimeConnector>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_display() {
        assert_eq!(SessionStatus::Open.to_string(), "Open");
        assert_eq!(SessionStatus::Closed.to_string(), "Closed");
    }

    #[test]
    fn test_transcript_role_display() {
        assert_eq!(TranscriptRole::User.to_string(), "user");
        assert_eq!(TranscriptRole::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_default_turn_detection() {
        match TurnDetectionConfig::default() {
            TurnDetectionConfig::ServerVad {
                threshold,
                silence_duration_ms,
                ..
            } => {
                assert_eq!(threshold, Some(0.5));
                assert_eq!(silence_duration_ms, Some(200));
            }
            _ => panic!("Expected ServerVad default"),
        }
    }

    #[test]
    fn test_turn_detection_serialization() {
        let json = serde_json::to_value(TurnDetectionConfig::server_vad(0.7, 250, 150)).unwrap();
        assert_eq!(json["type"], "server_vad");
        assert_eq!(json["silence_duration_ms"], 150);
    }

    #[test]
    fn test_modality_set() {
        assert_eq!(Modality::set_for(false), vec![Modality::Text]);
        assert_eq!(
            Modality::set_for(true),
            vec![Modality::Text, Modality::Audio]
        );
    }

    #[test]
    fn test_response_outcome_parsing() {
        assert_eq!(
            ResponseOutcome::from_status("cancelled"),
            ResponseOutcome::Cancelled
        );
        assert_eq!(
            ResponseOutcome::from_status("completed"),
            ResponseOutcome::Completed
        );
        assert_eq!(ResponseOutcome::from_status("failed"), ResponseOutcome::Failed);
    }

    #[test]
    fn test_status_cell_close_once() {
        let cell = StatusCell::open();
        assert!(cell.is_open());
        assert!(cell.close());
        assert!(!cell.close());
        assert_eq!(cell.get(), SessionStatus::Closed);
    }

    #[test]
    fn test_error_display() {
        let err = RealtimeError::Configuration("already configured".to_string());
        assert!(err.to_string().contains("already configured"));
        assert!(RealtimeError::Backpressure(Duration::from_millis(5)).is_retriable());
        assert!(!RealtimeError::SessionClosed.is_retriable());
    }
}
