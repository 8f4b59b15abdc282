//! Conversation orchestration.
//!
//! [`ConversationOrchestrator::start`] opens audio and starts capture, then
//! connects and configures a [`Session`]. [`ActiveConversation::run`] then drives a
//! single sequential event loop:
//!
//! - speech boundaries and response lifecycle go to the interruption controller
//! - audio deltas go to playback (dropped when text-only)
//! - text deltas and transcripts go to the [`ConversationSink`]
//! - function calls run on spawned tasks; their results come back through a
//!   completion channel and are sent as function results. A result that meets
//!   a full outbound queue stays queued and is resent until the session closes.
//!
//! The only suspension point inside event handling is a bounded `send`.

mod sink;

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::audio::{AudioBackend, AudioError, AudioFrame, AudioNotice, AudioPipeline, AudioSettings};
use crate::core::dispatch::{CapabilitySchema, ConversationMode, FunctionCall, FunctionRegistry, FunctionResult};
use crate::core::interruption::{
    DeltaDisposition, InterruptionController, InterruptionState, InterruptionStats, NoPlayback,
    PlaybackControl,
};
use crate::core::realtime::{
    EventStream, FunctionCallRequest, InputTranscriptionConfig, Modality, OutboundEvent,
    OutboundSender, RealtimeConnector, RealtimeError, Session, SessionEvent, SessionSetup,
    ToolDefinition, TurnDetectionConfig,
};

pub use sink::{ConversationSink, NotificationSink, NullSink, StatusNotice};

/// Capacity of the function completion channel.
const COMPLETION_CHANNEL_CAPACITY: usize = 32;

/// How often unsent function results are retried.
const RESULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Default bound on a single outbound send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Errors raised while starting a conversation.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Connecting or configuring the session failed
    #[error("Realtime session error: {0}")]
    Realtime(#[from] RealtimeError),

    /// Voice mode was requested but the devices could not be opened
    #[error("Audio required but unavailable: {0}")]
    AudioRequired(AudioError),

    /// The session's event stream was already taken
    #[error("Session event stream unavailable")]
    EventStreamUnavailable,
}

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// How the user talks to the assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Voice when devices are available, otherwise text
    #[default]
    Auto,
    /// Voice only; starting fails without devices
    Voice,
    /// Text only; audio devices are never opened
    Text,
}

impl InputMode {
    /// Config string.
    pub fn as_str(&self) -> &'static str {
        match self {
            InputMode::Auto => "auto",
            InputMode::Voice => "voice",
            InputMode::Text => "text",
        }
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(InputMode::Auto),
            "voice" | "audio" => Ok(InputMode::Voice),
            "text" => Ok(InputMode::Text),
            other => Err(format!(
                "Unknown input mode: {other}. Expected one of: auto, voice, text"
            )),
        }
    }
}

/// Runtime settings for one conversation.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Input mode
    pub input_mode: InputMode,
    /// System instructions
    pub instructions: Option<String>,
    /// Output voice (audio sessions only)
    pub voice: Option<String>,
    /// Turn detection parameters
    pub turn_detection: TurnDetectionConfig,
    /// User audio transcription (audio sessions only)
    pub input_transcription: Option<InputTranscriptionConfig>,
    /// Whether user speech cancels a streaming response
    pub interruption_enabled: bool,
    /// Bound on each outbound send
    pub send_timeout: Duration,
    /// Audio format and queue sizes
    pub audio: AudioSettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            input_mode: InputMode::Auto,
            instructions: None,
            voice: None,
            turn_detection: TurnDetectionConfig::default(),
            input_transcription: None,
            interruption_enabled: true,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            audio: AudioSettings::default(),
        }
    }
}

/// Input from the local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    /// A typed message
    Text(String),
    /// End the conversation
    Exit,
}

/// Why a conversation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The user asked to exit, or the input source closed
    UserExit,
    /// The connection to the endpoint was lost
    TransportLost(String),
    /// The inbound event stream ended without an error
    StreamEnded,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::UserExit => write!(f, "user exit"),
            ShutdownReason::TransportLost(detail) => write!(f, "transport lost: {detail}"),
            ShutdownReason::StreamEnded => write!(f, "event stream ended"),
        }
    }
}

impl From<FunctionCallRequest> for FunctionCall {
    fn from(request: FunctionCallRequest) -> Self {
        Self {
            call_id: request.call_id,
            name: request.name,
            arguments: request.arguments,
        }
    }
}

impl From<CapabilitySchema> for ToolDefinition {
    fn from(schema: CapabilitySchema) -> Self {
        ToolDefinition::function(schema.name, schema.description, Some(schema.parameters))
    }
}

/// Builds and starts conversations.
pub struct ConversationOrchestrator {
    config: OrchestratorConfig,
    connector: Arc<dyn RealtimeConnector>,
    registry: Arc<FunctionRegistry>,
    backend: Arc<dyn AudioBackend>,
    sink: Arc<dyn ConversationSink>,
    notifications: Arc<dyn NotificationSink>,
}

impl ConversationOrchestrator {
    /// Create an orchestrator with silent sinks.
    pub fn new(
        config: OrchestratorConfig,
        connector: Arc<dyn RealtimeConnector>,
        registry: Arc<FunctionRegistry>,
        backend: Arc<dyn AudioBackend>,
    ) -> Self {
        Self {
            config,
            connector,
            registry,
            backend,
            sink: Arc::new(NullSink),
            notifications: Arc::new(NullSink),
        }
    }

    /// Set the conversation sink.
    pub fn with_sink(mut self, sink: Arc<dyn ConversationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Set the capability notification sink.
    pub fn with_notifications(mut self, notifications: Arc<dyn NotificationSink>) -> Self {
        self.notifications = notifications;
        self
    }

    /// Config in use.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn session_setup(&self, audio: bool) -> SessionSetup {
        SessionSetup {
            modalities: Modality::set_for(audio),
            turn_detection: self.config.turn_detection.clone(),
            tools: self
                .registry
                .capability_schemas()
                .into_iter()
                .map(ToolDefinition::from)
                .collect(),
            instructions: self.config.instructions.clone(),
            voice: if audio { self.config.voice.clone() } else { None },
            input_transcription: if audio {
                self.config.input_transcription.clone()
            } else {
                None
            },
        }
    }

    /// Open audio and start capture, then connect and configure.
    ///
    /// Device failures degrade the conversation to text-only unless the input
    /// mode is [`InputMode::Voice`]. The session is configured with audio only
    /// when capture is actually running.
    pub async fn start(self) -> OrchestratorResult<ActiveConversation> {
        let AudioStartup { live, degraded } = self.open_audio()?;

        let mut session = Session::connect(self.connector.clone(), self.config.send_timeout).await?;
        let setup = self.session_setup(live.is_some());
        if let Err(e) = session.configure(setup).await {
            session.close().await;
            return Err(e.into());
        }
        let events = match session.events() {
            Some(events) => events,
            None => {
                session.close().await;
                return Err(OrchestratorError::EventStreamUnavailable);
            }
        };
        let sender = session.sender();

        let (pipeline_handle, capture_forwarder, audio_notices) = match live {
            Some(LiveAudio {
                pipeline,
                frames,
                notices,
            }) => (
                Some(pipeline),
                Some(spawn_capture_forwarder(frames, sender.clone())),
                Some(notices),
            ),
            None => (None, None, None),
        };

        let playback: Arc<dyn PlaybackControl> = match &pipeline_handle {
            Some(pipeline) => pipeline.clone() as Arc<dyn PlaybackControl>,
            None => Arc::new(NoPlayback),
        };
        let controller = InterruptionController::new(
            session.id(),
            sender.clone(),
            playback,
            self.config.interruption_enabled,
        );

        let text_only = pipeline_handle.is_none();
        if let Some(reason) = degraded {
            self.sink.on_notice(&StatusNotice::DegradedToText { reason });
        }
        self.sink.on_notice(&StatusNotice::Connected {
            session_id: session.id().to_string(),
            text_only,
        });
        info!(
            session_id = %session.id(),
            text_only,
            capabilities = self.registry.len(),
            "Conversation started"
        );

        let (completions_tx, completions_rx) = mpsc::channel(COMPLETION_CHANNEL_CAPACITY);

        Ok(ActiveConversation {
            events,
            completions: completions_rx,
            audio_notices,
            state: Conversation {
                session,
                sender,
                controller,
                registry: self.registry,
                audio: pipeline_handle,
                capture_forwarder,
                sink: self.sink,
                notifications: self.notifications,
                completions_tx,
                in_flight: 0,
                unsent_results: VecDeque::new(),
                follow_up_pending: false,
                played_frames: 0,
            },
        })
    }

    fn open_audio(&self) -> OrchestratorResult<AudioStartup> {
        if self.config.input_mode == InputMode::Text {
            return Ok(AudioStartup::default());
        }
        match AudioPipeline::open(self.backend.clone(), self.config.audio.clone()) {
            Ok((pipeline, notices)) => self.begin_capture(Arc::new(pipeline), notices),
            Err(e) => self.audio_unavailable(e, "Audio devices unavailable; starting text-only"),
        }
    }

    fn begin_capture(
        &self,
        pipeline: Arc<AudioPipeline>,
        notices: mpsc::Receiver<AudioNotice>,
    ) -> OrchestratorResult<AudioStartup> {
        match pipeline.start_capture() {
            Ok(frames) => Ok(AudioStartup {
                live: Some(LiveAudio {
                    pipeline,
                    frames,
                    notices,
                }),
                degraded: None,
            }),
            Err(e) => self.audio_unavailable(e, "Capture failed to start; starting text-only"),
        }
    }

    fn audio_unavailable(&self, error: AudioError, message: &str) -> OrchestratorResult<AudioStartup> {
        if self.config.input_mode == InputMode::Voice {
            return Err(OrchestratorError::AudioRequired(error));
        }
        warn!(error = %error, "{}", message);
        Ok(AudioStartup {
            live: None,
            degraded: Some(error.to_string()),
        })
    }
}

/// Audio that is open and capturing.
struct LiveAudio {
    pipeline: Arc<AudioPipeline>,
    frames: mpsc::Receiver<AudioFrame>,
    notices: mpsc::Receiver<AudioNotice>,
}

#[derive(Default)]
struct AudioStartup {
    live: Option<LiveAudio>,
    degraded: Option<String>,
}

/// A started conversation, ready to run.
pub struct ActiveConversation {
    events: EventStream,
    completions: mpsc::Receiver<FunctionResult>,
    audio_notices: Option<mpsc::Receiver<AudioNotice>>,
    state: Conversation,
}

impl ActiveConversation {
    /// Local session id.
    pub fn session_id(&self) -> &str {
        self.state.session.id()
    }

    /// Whether audio is off.
    pub fn is_text_only(&self) -> bool {
        self.state.audio.is_none()
    }

    /// Current conversation mode.
    pub fn mode(&self) -> ConversationMode {
        self.state.registry.mode()
    }

    /// Run the event loop until the user exits or the session ends.
    pub async fn run(self, mut input: mpsc::Receiver<UserInput>) -> ShutdownReason {
        let Self {
            mut events,
            mut completions,
            mut audio_notices,
            mut state,
        } = self;

        let mut retry = tokio::time::interval(RESULT_RETRY_INTERVAL);
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let reason = loop {
            select! {
                event = events.next() => match event {
                    Some(event) => {
                        if let Some(reason) = state.handle_event(event).await {
                            break reason;
                        }
                    }
                    None => break ShutdownReason::StreamEnded,
                },
                Some(result) = completions.recv() => {
                    state.complete_call(result).await;
                }
                notice = next_notice(&mut audio_notices) => {
                    // One degrade per session; later notices are moot.
                    audio_notices = None;
                    if let Some(notice) = notice {
                        state.degrade_to_text(describe_notice(&notice));
                    }
                }
                line = input.recv() => match line {
                    Some(UserInput::Text(text)) => state.send_text(text).await,
                    Some(UserInput::Exit) | None => break ShutdownReason::UserExit,
                },
                _ = retry.tick(), if state.has_backlog() => {
                    state.flush_results().await;
                }
            }
        };

        state.shutdown(&reason).await;
        reason
    }
}

async fn next_notice(rx: &mut Option<mpsc::Receiver<AudioNotice>>) -> Option<AudioNotice> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn describe_notice(notice: &AudioNotice) -> String {
    match notice {
        AudioNotice::CaptureLost(detail) => format!("capture lost: {detail}"),
        AudioNotice::PlaybackLost(detail) => format!("playback lost: {detail}"),
    }
}

/// Forward captured frames as audio chunks. Frames are dropped under backpressure.
fn spawn_capture_forwarder(
    mut frames: mpsc::Receiver<AudioFrame>,
    sender: OutboundSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut forwarded = 0u64;
        let mut dropped = 0u64;
        while let Some(frame) = frames.recv().await {
            match sender.try_send(OutboundEvent::AudioChunk(frame.payload)) {
                Ok(()) => forwarded += 1,
                Err(RealtimeError::Backpressure(_)) => {
                    dropped += 1;
                    if dropped % 50 == 1 {
                        warn!(dropped, "Outbound queue full; dropping captured audio");
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Capture forwarding stopped");
                    break;
                }
            }
        }
        debug!(forwarded, dropped, "Capture forwarder finished");
    })
}

/// Loop-owned conversation state.
struct Conversation {
    session: Session,
    sender: OutboundSender,
    controller: InterruptionController,
    registry: Arc<FunctionRegistry>,
    audio: Option<Arc<AudioPipeline>>,
    capture_forwarder: Option<JoinHandle<()>>,
    sink: Arc<dyn ConversationSink>,
    notifications: Arc<dyn NotificationSink>,
    completions_tx: mpsc::Sender<FunctionResult>,
    /// Calls dispatched whose result has not been sent yet
    in_flight: usize,
    /// Results waiting for outbound queue space, oldest first
    unsent_results: VecDeque<FunctionResult>,
    follow_up_pending: bool,
    played_frames: u64,
}

impl Conversation {
    async fn handle_event(&mut self, event: SessionEvent) -> Option<ShutdownReason> {
        match event {
            SessionEvent::SessionCreated { session_id } => {
                debug!(remote_session_id = %session_id, "Endpoint session created");
            }
            SessionEvent::ResponseStarted { response_id } => {
                self.controller.on_response_started(&response_id);
            }
            SessionEvent::ResponseAudioDelta { response_id, data } => {
                if self.controller.admit_delta(&response_id) == DeltaDisposition::Discard {
                    return None;
                }
                if let Some(pipeline) = &self.audio {
                    // Overflow is logged and counted by the pipeline.
                    if pipeline.enqueue_playback(data).is_ok() {
                        self.played_frames += 1;
                    }
                }
            }
            SessionEvent::ResponseTextDelta { response_id, text } => {
                if self.controller.admit_delta(&response_id) == DeltaDisposition::Apply {
                    self.sink.on_text_delta(&response_id, &text);
                }
            }
            SessionEvent::ResponseDone {
                response_id,
                outcome,
            } => {
                debug!(response_id = %response_id, ?outcome, "Response done");
                self.controller.on_response_done(&response_id, outcome);
                self.sink.on_response_done(&response_id, outcome);
                self.maybe_request_follow_up().await;
            }
            SessionEvent::SpeechStarted { audio_start_ms } => {
                let interrupted = match self.controller.state() {
                    InterruptionState::AiResponding { response_id } => Some(response_id.clone()),
                    _ => None,
                };
                if self.controller.on_speech_started()
                    && let Some(response_id) = interrupted
                {
                    debug!(audio_start_ms, "Speech started during response");
                    self.sink
                        .on_notice(&StatusNotice::Interrupted { response_id });
                }
            }
            SessionEvent::SpeechStopped { audio_end_ms } => {
                debug!(audio_end_ms, "Speech stopped");
            }
            SessionEvent::FunctionCallRequested(request) => {
                self.dispatch_call(request.into());
            }
            SessionEvent::Transcript { role, text } => {
                self.sink.on_transcript(role, &text);
            }
            SessionEvent::TransportError { detail, fatal } => {
                if fatal {
                    error!(detail = %detail, "Realtime transport lost");
                    return Some(ShutdownReason::TransportLost(detail));
                }
                warn!(detail = %detail, "Realtime transport error");
                self.sink
                    .on_notice(&StatusNotice::TransportWarning { detail });
            }
        }
        None
    }

    fn dispatch_call(&mut self, call: FunctionCall) {
        info!(call_id = %call.call_id, name = %call.name, "Function call requested");
        self.in_flight += 1;

        let registry = self.registry.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = registry.execute(&call).await;
            if completions.send(result).await.is_err() {
                debug!(call_id = %call.call_id, "Conversation ended before the call completed");
            }
        });
    }

    async fn complete_call(&mut self, result: FunctionResult) {
        self.notifications
            .on_function_executed(&result, self.registry.mode());
        self.unsent_results.push_back(result);
        self.flush_results().await;
    }

    /// Whether anything is waiting for outbound queue space.
    fn has_backlog(&self) -> bool {
        !self.unsent_results.is_empty() || (self.follow_up_pending && self.follow_up_ready())
    }

    /// Send queued results in order, then request a follow-up if due.
    ///
    /// A full queue leaves the remaining results for the next retry tick.
    /// Results are only abandoned once the session is closed.
    async fn flush_results(&mut self) {
        while let Some(result) = self.unsent_results.front() {
            let call_id = result.call_id.clone();
            let success = result.is_success();
            let event = OutboundEvent::FunctionResult {
                call_id: call_id.clone(),
                output: result.to_output(),
            };
            match self.sender.send(event).await {
                Ok(()) => {
                    debug!(call_id = %call_id, success, "Function result sent");
                    self.unsent_results.pop_front();
                    self.in_flight = self.in_flight.saturating_sub(1);
                    self.follow_up_pending = true;
                }
                Err(e) if e.is_retriable() => {
                    warn!(
                        call_id = %call_id,
                        queued = self.unsent_results.len(),
                        "Outbound queue full; function result will be retried"
                    );
                    return;
                }
                Err(e) => {
                    error!(
                        call_id = %call_id,
                        dropped = self.unsent_results.len(),
                        error = %e,
                        "Session closed with unsent function results"
                    );
                    self.in_flight = self.in_flight.saturating_sub(self.unsent_results.len());
                    self.unsent_results.clear();
                    return;
                }
            }
        }
        self.maybe_request_follow_up().await;
    }

    fn follow_up_ready(&self) -> bool {
        self.in_flight == 0 && *self.controller.state() == InterruptionState::Idle
    }

    /// Ask for a response once results are in and nothing is streaming.
    async fn maybe_request_follow_up(&mut self) {
        if !self.follow_up_pending || !self.follow_up_ready() {
            return;
        }
        match self.sender.send(OutboundEvent::RequestResponse).await {
            Ok(()) => self.follow_up_pending = false,
            Err(e) if e.is_retriable() => {
                warn!(error = %e, "Follow-up response request will be retried");
            }
            Err(e) => {
                warn!(error = %e, "Failed to request follow-up response");
                self.follow_up_pending = false;
            }
        }
    }

    async fn send_text(&mut self, text: String) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if let Err(e) = self.sender.send(OutboundEvent::TextInput(text.to_string())).await {
            warn!(error = %e, "Failed to send text input");
            self.sink.on_notice(&StatusNotice::TransportWarning {
                detail: e.to_string(),
            });
        }
    }

    fn degrade_to_text(&mut self, reason: String) {
        let Some(pipeline) = self.audio.take() else {
            return;
        };
        pipeline.stop_capture();
        if let Some(forwarder) = self.capture_forwarder.take() {
            forwarder.abort();
        }
        self.controller.set_playback(Arc::new(NoPlayback));
        warn!(reason = %reason, "Audio lost; continuing text-only");
        self.sink.on_notice(&StatusNotice::DegradedToText { reason });
    }

    fn stats(&self) -> InterruptionStats {
        self.controller.stats()
    }

    async fn shutdown(&mut self, reason: &ShutdownReason) {
        if let Some(forwarder) = self.capture_forwarder.take() {
            forwarder.abort();
        }
        if let Some(pipeline) = self.audio.take() {
            pipeline.stop_capture();
        }
        self.session.close().await;

        let stats = self.stats();
        info!(
            session_id = %self.session.id(),
            reason = %reason,
            barge_ins = stats.barge_ins,
            discarded_deltas = stats.discarded_deltas,
            played_frames = self.played_frames,
            pending_calls = self.in_flight,
            unsent_results = self.unsent_results.len(),
            "Conversation ended"
        );
        self.sink.on_notice(&StatusNotice::Disconnected {
            reason: reason.to_string(),
        });
    }
}
