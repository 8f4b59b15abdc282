//! Barge-in handling.
//!
//! An explicit state machine decides when user speech interrupts the
//! assistant. On barge-in the controller, in this order, sends a
//! cancellation for the streaming response, clears playback and marks the
//! response cancelled. Deltas that arrive later for a cancelled response are
//! discarded by id.
//!
//! ```text
//!   Idle ──response-started──▶ AiResponding ──speech-started──▶ Cancelling
//!    ▲                              │                               │
//!    └──────────response-done───────┴────response-done (same id)────┘
//! ```
//!
//! The controller never blocks: the cancellation is a non-blocking send with
//! a spawned, bounded retry when the outbound queue is momentarily full.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::core::audio::AudioPipeline;
use crate::core::realtime::{OutboundEvent, OutboundSender, RealtimeError, ResponseOutcome};

/// Number of cancelled response ids remembered for late-delta matching.
const CANCELLED_HISTORY: usize = 64;

/// Anything that can drop buffered playback.
pub trait PlaybackControl: Send + Sync {
    /// Discard buffered, not-yet-emitted audio. Never fails.
    fn clear_playback(&self);
}

impl PlaybackControl for AudioPipeline {
    fn clear_playback(&self) {
        AudioPipeline::clear_playback(self);
    }
}

/// Playback control for text-only sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPlayback;

impl PlaybackControl for NoPlayback {
    fn clear_playback(&self) {}
}

/// Interruption state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InterruptionState {
    /// Nothing streaming
    #[default]
    Idle,
    /// A response is streaming
    AiResponding {
        /// Streaming response
        response_id: String,
    },
    /// Cancellation sent; waiting for the endpoint to finish the response
    Cancelling {
        /// Cancelled response
        response_id: String,
    },
}

impl fmt::Display for InterruptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptionState::Idle => write!(f, "idle"),
            InterruptionState::AiResponding { response_id } => {
                write!(f, "ai_responding({response_id})")
            }
            InterruptionState::Cancelling { response_id } => {
                write!(f, "cancelling({response_id})")
            }
        }
    }
}

/// Lifecycle of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Announced, no output yet
    Pending,
    /// Output streaming
    Streaming,
    /// Finished normally or superseded
    Completed,
    /// Cancelled by barge-in or by the endpoint
    Cancelled,
}

/// One reply generated by the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response id
    pub id: String,
    /// Owning session
    pub session_id: String,
    /// Current status
    pub status: ResponseStatus,
}

/// What to do with an inbound delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaDisposition {
    /// Route to playback or the text sink
    Apply,
    /// The response was cancelled; drop it
    Discard,
}

/// Counters for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterruptionStats {
    /// Barge-ins performed
    pub barge_ins: u64,
    /// Late deltas discarded
    pub discarded_deltas: u64,
    /// Responses replaced by a newer one while streaming
    pub superseded: u64,
}

/// Barge-in state machine. Owned by the event loop.
pub struct InterruptionController {
    session_id: String,
    sender: OutboundSender,
    playback: Arc<dyn PlaybackControl>,
    enabled: bool,
    state: InterruptionState,
    current: Option<Response>,
    cancelled: VecDeque<String>,
    stats: InterruptionStats,
}

impl InterruptionController {
    /// Create a controller for one session.
    pub fn new(
        session_id: impl Into<String>,
        sender: OutboundSender,
        playback: Arc<dyn PlaybackControl>,
        enabled: bool,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            sender,
            playback,
            enabled,
            state: InterruptionState::Idle,
            current: None,
            cancelled: VecDeque::with_capacity(CANCELLED_HISTORY),
            stats: InterruptionStats::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> &InterruptionState {
        &self.state
    }

    /// The response being tracked, if any.
    pub fn current_response(&self) -> Option<&Response> {
        self.current.as_ref()
    }

    /// Whether a response is streaming.
    pub fn is_responding(&self) -> bool {
        matches!(self.state, InterruptionState::AiResponding { .. })
    }

    /// Whether barge-in is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Counters.
    pub fn stats(&self) -> InterruptionStats {
        self.stats
    }

    /// Swap the playback target, e.g. after the session degrades to text.
    pub fn set_playback(&mut self, playback: Arc<dyn PlaybackControl>) {
        self.playback = playback;
    }

    /// The endpoint started a response.
    pub fn on_response_started(&mut self, response_id: &str) {
        if self.was_cancelled(response_id) {
            tracing::debug!(response_id, "Ignoring start of a cancelled response");
            return;
        }

        if let InterruptionState::AiResponding { response_id: old } = &self.state {
            if old == response_id {
                return;
            }
            tracing::debug!(old = %old, new = response_id, "Response superseded while streaming");
            self.stats.superseded += 1;
            if let Some(current) = self.current.as_mut() {
                current.status = ResponseStatus::Completed;
            }
        }

        self.current = Some(Response {
            id: response_id.to_string(),
            session_id: self.session_id.clone(),
            status: ResponseStatus::Streaming,
        });
        self.state = InterruptionState::AiResponding {
            response_id: response_id.to_string(),
        };
        tracing::debug!(response_id, "Response streaming");
    }

    /// Turn detection heard the user. Returns true if a barge-in was performed.
    pub fn on_speech_started(&mut self) -> bool {
        let response_id = match &self.state {
            InterruptionState::AiResponding { response_id } => response_id.clone(),
            InterruptionState::Cancelling { .. } | InterruptionState::Idle => return false,
        };

        if !self.enabled {
            tracing::debug!(response_id = %response_id, "Speech during response; interruption disabled");
            return false;
        }

        self.send_cancel(&response_id);
        self.playback.clear_playback();
        if let Some(current) = self.current.as_mut() {
            current.status = ResponseStatus::Cancelled;
        }
        self.remember_cancelled(response_id.clone());
        self.stats.barge_ins += 1;

        tracing::info!(response_id = %response_id, "Barge-in: response cancelled");
        self.state = InterruptionState::Cancelling { response_id };
        true
    }

    /// The endpoint finished a response.
    pub fn on_response_done(&mut self, response_id: &str, outcome: ResponseOutcome) {
        match &self.state {
            InterruptionState::Cancelling { response_id: id } if id == response_id => {
                self.state = InterruptionState::Idle;
                self.current = None;
            }
            InterruptionState::AiResponding { response_id: id } if id == response_id => {
                if outcome == ResponseOutcome::Cancelled {
                    // Cancelled on the endpoint side; drop any stragglers too.
                    self.remember_cancelled(response_id.to_string());
                }
                self.state = InterruptionState::Idle;
                self.current = None;
            }
            _ => {
                tracing::debug!(response_id, state = %self.state, "Done for an untracked response");
            }
        }
    }

    /// Decide whether a delta for `response_id` may be applied.
    pub fn admit_delta(&mut self, response_id: &str) -> DeltaDisposition {
        if self.was_cancelled(response_id) {
            self.stats.discarded_deltas += 1;
            tracing::trace!(response_id, "Discarding late delta");
            return DeltaDisposition::Discard;
        }
        DeltaDisposition::Apply
    }

    fn was_cancelled(&self, response_id: &str) -> bool {
        self.cancelled.iter().any(|id| id == response_id)
    }

    fn remember_cancelled(&mut self, response_id: String) {
        if self.was_cancelled(&response_id) {
            return;
        }
        if self.cancelled.len() == CANCELLED_HISTORY {
            self.cancelled.pop_front();
        }
        self.cancelled.push_back(response_id);
    }

    fn send_cancel(&self, response_id: &str) {
        let event = OutboundEvent::CancelResponse {
            response_id: response_id.to_string(),
        };
        match self.sender.try_send(event.clone()) {
            Ok(()) => {}
            Err(RealtimeError::Backpressure(_)) => {
                let sender = self.sender.clone();
                let response_id = response_id.to_string();
                tokio::spawn(async move {
                    if let Err(e) = sender.send(event).await {
                        tracing::error!(response_id = %response_id, error = %e, "Failed to send cancellation");
                    }
                });
            }
            Err(e) => {
                tracing::warn!(response_id, error = %e, "Cancellation not sent");
            }
        }
    }
}

impl fmt::Debug for InterruptionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptionController")
            .field("session_id", &self.session_id)
            .field("enabled", &self.enabled)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}
