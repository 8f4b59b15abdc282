//! OpenAI Realtime API connector.
//!
//! Full-duplex session over OpenAI's WebSocket Realtime API: audio in,
//! audio and text out, server-side turn detection and function calling.
//!
//! # Supported Models
//!
//! - `gpt-4o-realtime-preview-2024-10-01` - October 2024 version (default)
//! - `gpt-4o-realtime-preview-2024-12-17` - December 2024 version
//! - `gpt-4o-realtime-preview` - Rolling alias
//! - `gpt-4o-mini-realtime-preview` - Mini model for lower latency
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use waav_concierge::core::realtime::{OpenAIRealtime, OpenAIRealtimeSettings, Session};
//!
//! let connector = OpenAIRealtime::new(OpenAIRealtimeSettings::new("sk-..."))?;
//! let mut session = Session::connect(Arc::new(connector), send_timeout).await?;
//! session.configure(setup).await?;
//! ```

mod client;
mod config;
mod messages;

pub use client::{EventDecoder, OpenAIRealtime, encode_outbound};
pub use config::{
    OPENAI_REALTIME_AUDIO_FORMAT, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL,
    OpenAIRealtimeModel, OpenAIRealtimeSettings, OpenAIRealtimeVoice, WS_CHANNEL_CAPACITY,
};
pub use messages::{ClientEvent, ConversationItem, ServerEvent, SessionConfig, TurnDetection};
