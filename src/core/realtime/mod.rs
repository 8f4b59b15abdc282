//! Realtime session transport.
//!
//! Owns the single duplex channel to the remote inference endpoint.
//!
//! # Architecture
//!
//! - [`RealtimeConnector`] opens the underlying connection and yields a
//!   [`TransportLink`] (channel ends plus the I/O task).
//! - [`Session`] wraps a link and enforces the session contract for every
//!   connector: configure exactly once, bounded sends, one inbound event
//!   stream, idempotent close.
//! - [`OpenAIRealtime`] speaks the OpenAI Realtime WebSocket protocol;
//!   [`LoopbackConnector`] is an in-memory peer for tests and offline runs.
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian, mono, 24kHz.

mod base;
mod loopback;
pub mod openai;
mod session;

pub use base::{
    BoxedConnector, FunctionCallRequest, FunctionDefinition, InputTranscriptionConfig, Modality,
    OutboundEvent, RealtimeConnector, RealtimeError, RealtimeResult, ResponseOutcome,
    SessionEvent, SessionSetup, SessionStatus, StatusCell, ToolDefinition, TranscriptRole,
    TransportLink, TurnDetectionConfig,
};
pub use loopback::{ECHO_CALL_PREFIX, LoopbackConnector, LoopbackPeer};
pub use openai::{
    OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAIRealtime, OpenAIRealtimeModel,
    OpenAIRealtimeSettings, OpenAIRealtimeVoice,
};
pub use session::{EventStream, OutboundSender, Session};

/// Supported realtime connectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeProvider {
    /// OpenAI Realtime API
    OpenAI,
    /// In-memory loopback peer
    Loopback,
}

impl RealtimeProvider {
    /// Parse provider from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(RealtimeProvider::OpenAI),
            "loopback" | "offline" => Some(RealtimeProvider::Loopback),
            _ => None,
        }
    }
}

impl std::fmt::Display for RealtimeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RealtimeProvider::OpenAI => write!(f, "openai"),
            RealtimeProvider::Loopback => write!(f, "loopback"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!(
            RealtimeProvider::parse("OPENAI"),
            Some(RealtimeProvider::OpenAI)
        );
        assert_eq!(
            RealtimeProvider::parse("offline"),
            Some(RealtimeProvider::Loopback)
        );
        assert_eq!(RealtimeProvider::parse("hume"), None);
    }

    #[test]
    fn test_provider_display() {
        assert_eq!(RealtimeProvider::OpenAI.to_string(), "openai");
        assert_eq!(RealtimeProvider::Loopback.to_string(), "loopback");
    }
}
