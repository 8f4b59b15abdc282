pub mod audio;
pub mod dispatch;
pub mod interruption;
pub mod orchestrator;
pub mod realtime;

// Re-export commonly used types for convenience
pub use realtime::{
    LoopbackConnector, LoopbackPeer, OpenAIRealtime, OpenAIRealtimeSettings, OutboundEvent,
    RealtimeConnector, RealtimeError, RealtimeProvider, RealtimeResult, Session, SessionEvent,
    SessionSetup,
};

pub use audio::{
    AudioBackend, AudioError, AudioNotice, AudioPipeline, AudioSettings, MemoryBackend,
    UnavailableBackend, default_backend,
};

pub use dispatch::{
    ConversationMode, DispatchError, DispatchResult, FunctionCall, FunctionRegistry,
    FunctionRegistryBuilder, FunctionResult, HandlerFault, ModeTracker, handler_fn,
};

pub use interruption::{InterruptionController, InterruptionState, PlaybackControl};

pub use orchestrator::{
    ActiveConversation, ConversationOrchestrator, ConversationSink, InputMode,
    NotificationSink, NullSink, OrchestratorConfig, OrchestratorError, OrchestratorResult,
    ShutdownReason, StatusNotice, UserInput,
};
