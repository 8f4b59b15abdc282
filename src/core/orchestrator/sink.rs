//! Output surfaces of a conversation.

use std::fmt;

use crate::core::dispatch::{ConversationMode, FunctionResult};
use crate::core::realtime::{ResponseOutcome, TranscriptRole};

/// Session-level notices for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusNotice {
    /// Session configured and running
    Connected {
        /// Local session id
        session_id: String,
        /// Whether audio is off for this session
        text_only: bool,
    },
    /// Audio devices failed; the session continues as text-only
    DegradedToText {
        /// Device failure detail
        reason: String,
    },
    /// The user barged in and the response was cancelled
    Interrupted {
        /// Cancelled response
        response_id: String,
    },
    /// Non-fatal transport or endpoint problem
    TransportWarning {
        /// Detail from the endpoint
        detail: String,
    },
    /// The session is gone
    Disconnected {
        /// Why the session ended
        reason: String,
    },
}

impl fmt::Display for StatusNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusNotice::Connected {
                session_id,
                text_only,
            } => {
                let mode = if *text_only { "text" } else { "voice" };
                write!(f, "connected ({mode}), session {session_id}")
            }
            StatusNotice::DegradedToText { reason } => {
                write!(f, "audio unavailable, continuing in text: {reason}")
            }
            StatusNotice::Interrupted { response_id } => write!(f, "interrupted {response_id}"),
            StatusNotice::TransportWarning { detail } => write!(f, "warning: {detail}"),
            StatusNotice::Disconnected { reason } => write!(f, "disconnected: {reason}"),
        }
    }
}

/// Receives the visible side of a conversation.
///
/// Called from the event loop; implementations must not block.
pub trait ConversationSink: Send + Sync {
    /// A chunk of response text.
    fn on_text_delta(&self, _response_id: &str, _text: &str) {}

    /// A final transcript line.
    fn on_transcript(&self, _role: TranscriptRole, _text: &str) {}

    /// A response finished.
    fn on_response_done(&self, _response_id: &str, _outcome: ResponseOutcome) {}

    /// A session-level notice.
    fn on_notice(&self, _notice: &StatusNotice) {}
}

/// Receives capability execution results.
pub trait NotificationSink: Send + Sync {
    /// A capability call produced its result. `mode` is the mode after the call.
    fn on_function_executed(&self, result: &FunctionResult, mode: ConversationMode);
}

/// Sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ConversationSink for NullSink {}

impl NotificationSink for NullSink {
    fn on_function_executed(&self, _result: &FunctionResult, _mode: ConversationMode) {}
}
