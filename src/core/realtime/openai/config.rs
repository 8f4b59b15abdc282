//! OpenAI Realtime API configuration types.
//!
//! This module contains:
//! - Model selection
//! - Voice selection
//! - Connection settings for the WebSocket connector

use serde::{Deserialize, Serialize};
use url::Url;
use zeroize::Zeroize;

use crate::core::realtime::base::{RealtimeError, RealtimeResult};

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default audio sample rate for OpenAI Realtime API.
pub const OPENAI_REALTIME_SAMPLE_RATE: u32 = 24000;

/// Wire audio format for input and output (PCM 16-bit little-endian).
pub const OPENAI_REALTIME_AUDIO_FORMAT: &str = "pcm16";

/// Capacity of the channels between the session and the WebSocket task.
pub const WS_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Models
// =============================================================================

/// Known OpenAI Realtime models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenAIRealtimeModel {
    /// GPT-4o Realtime Preview 2024-10-01
    #[default]
    #[serde(rename = "gpt-4o-realtime-preview-2024-10-01")]
    Gpt4oRealtimePreview20241001,
    /// GPT-4o Realtime Preview 2024-12-17
    #[serde(rename = "gpt-4o-realtime-preview-2024-12-17")]
    Gpt4oRealtimePreview20241217,
    /// GPT-4o Realtime Preview (rolling alias)
    #[serde(rename = "gpt-4o-realtime-preview")]
    Gpt4oRealtimePreview,
    /// GPT-4o Mini Realtime Preview
    #[serde(rename = "gpt-4o-mini-realtime-preview")]
    Gpt4oMiniRealtimePreview,
}

impl OpenAIRealtimeModel {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt4oRealtimePreview20241001 => "gpt-4o-realtime-preview-2024-10-01",
            Self::Gpt4oRealtimePreview20241217 => "gpt-4o-realtime-preview-2024-12-17",
            Self::Gpt4oRealtimePreview => "gpt-4o-realtime-preview",
            Self::Gpt4oMiniRealtimePreview => "gpt-4o-mini-realtime-preview",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "gpt-4o-realtime-preview-2024-10-01" => Self::Gpt4oRealtimePreview20241001,
            "gpt-4o-realtime-preview-2024-12-17" => Self::Gpt4oRealtimePreview20241217,
            "gpt-4o-realtime-preview" => Self::Gpt4oRealtimePreview,
            "gpt-4o-mini-realtime-preview" => Self::Gpt4oMiniRealtimePreview,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for OpenAIRealtimeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Voices
// =============================================================================

/// Available voices for OpenAI Realtime API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAIRealtimeVoice {
    /// Alloy voice (default)
    #[default]
    Alloy,
    /// Ash voice
    Ash,
    /// Ballad voice
    Ballad,
    /// Coral voice
    Coral,
    /// Echo voice
    Echo,
    /// Sage voice
    Sage,
    /// Shimmer voice
    Shimmer,
    /// Verse voice
    Verse,
}

impl OpenAIRealtimeVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "alloy" => Self::Alloy,
            "ash" => Self::Ash,
            "ballad" => Self::Ballad,
            "coral" => Self::Coral,
            "echo" => Self::Echo,
            "sage" => Self::Sage,
            "shimmer" => Self::Shimmer,
            "verse" => Self::Verse,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for OpenAIRealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Connection Settings
// =============================================================================

/// Settings for the OpenAI Realtime WebSocket connector.
#[derive(Clone)]
pub struct OpenAIRealtimeSettings {
    /// API key, zeroized on drop
    pub api_key: String,
    /// Model name sent as the `model` query parameter
    pub model: String,
    /// Base endpoint; overridden in tests to point at a local server
    pub endpoint: String,
    /// Capacity of the outbound and inbound channels
    pub channel_capacity: usize,
}

impl OpenAIRealtimeSettings {
    /// Settings for the public endpoint with the default model.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: OpenAIRealtimeModel::default().as_str().to_string(),
            endpoint: OPENAI_REALTIME_URL.to_string(),
            channel_capacity: WS_CHANNEL_CAPACITY,
        }
    }

    /// Override the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Check the settings before connecting.
    pub fn validate(&self) -> RealtimeResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "API key is required".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "Model is required".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(RealtimeError::InvalidConfiguration(
                "Channel capacity must be greater than zero".to_string(),
            ));
        }
        self.connect_url().map(|_| ())
    }

    /// Endpoint URL with the model query parameter appended.
    pub fn connect_url(&self) -> RealtimeResult<Url> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| {
            RealtimeError::InvalidConfiguration(format!("Invalid endpoint URL: {e}"))
        })?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(RealtimeError::InvalidConfiguration(format!(
                    "Endpoint scheme must be ws or wss, got {other}"
                )));
            }
        }
        url.query_pairs_mut().append_pair("model", &self.model);
        Ok(url)
    }
}

impl std::fmt::Debug for OpenAIRealtimeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIRealtimeSettings")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

impl Drop for OpenAIRealtimeSettings {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

// =============================================================================
// Tests
// =============================================================================
