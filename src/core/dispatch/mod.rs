//! Function dispatch registry.
//!
//! Maps capability names requested by the model to registered async
//! handlers. Arguments are validated against each capability's JSON Schema
//! before the handler runs; handler errors, panics and timeouts are caught.
//! Every call yields exactly one [`FunctionResult`], correlated by call id.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use waav_concierge::core::dispatch::{ConversationMode, FunctionRegistry, handler_fn};
//!
//! let mut builder = FunctionRegistry::builder();
//! builder
//!     .register("get_status", handler_fn(|_| async { Ok(json!({"battery": 87})) }), json!({"type": "object"}))?
//!     .with_description("Get robot status")
//!     .with_domain(ConversationMode::RobotControl);
//! let registry = builder.build();
//! ```

mod isolation;
mod mode;
mod registry;

use serde::Serialize;
use serde_json::{Value, json};

pub use isolation::{IsolationFailure, call_handler_isolated, extract_panic_message};
pub use mode::{ConversationMode, ModeTracker};
pub use registry::{
    DEFAULT_HANDLER_TIMEOUT, FunctionHandler, FunctionRegistration, FunctionRegistry,
    FunctionRegistryBuilder, HandlerFault, HandlerFuture, handler_fn,
};

// =============================================================================
// Error Types
// =============================================================================

/// Errors produced by registration and execution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    /// The name is already registered
    #[error("Capability already registered: {0}")]
    DuplicateRegistration(String),

    /// The parameter schema does not compile
    #[error("Invalid parameter schema for {name}: {reason}")]
    InvalidSchema {
        /// Capability name
        name: String,
        /// Compiler message
        reason: String,
    },

    /// No capability with this name
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    /// Arguments are not JSON or fail schema validation
    #[error("Invalid arguments for {name}: {reason}")]
    InvalidArguments {
        /// Capability name
        name: String,
        /// Validation messages
        reason: String,
    },

    /// The handler failed, panicked or timed out
    #[error("Handler error in {name}: {message}")]
    Handler {
        /// Capability name
        name: String,
        /// Human-readable message
        message: String,
    },
}

impl DispatchError {
    /// Stable error kind reported to the endpoint.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::DuplicateRegistration(_) => "duplicate_registration",
            DispatchError::InvalidSchema { .. } => "invalid_schema",
            DispatchError::UnknownCapability(_) => "unknown_capability",
            DispatchError::InvalidArguments { .. } => "invalid_arguments",
            DispatchError::Handler { .. } => "handler_error",
        }
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

// =============================================================================
// Calls and Results
// =============================================================================

/// Lifecycle of a function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCallStatus {
    /// Received from the endpoint
    Requested,
    /// Handler running
    Executing,
    /// Result is a success
    Completed,
    /// Result is an error
    Failed,
}

/// One structured request to invoke a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    /// Correlation id from the endpoint
    pub call_id: String,
    /// Capability name
    pub name: String,
    /// Raw JSON argument string
    pub arguments: String,
}

/// The single result produced for a call.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResult {
    /// Correlation id of the originating call
    pub call_id: String,
    /// Capability name as requested
    pub name: String,
    /// Handler value or the reason the call failed
    pub outcome: DispatchResult<Value>,
}

impl FunctionResult {
    /// Whether the handler produced a value.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Terminal status of the call.
    pub fn status(&self) -> FunctionCallStatus {
        if self.is_success() {
            FunctionCallStatus::Completed
        } else {
            FunctionCallStatus::Failed
        }
    }

    /// JSON payload sent back to the endpoint.
    pub fn to_output(&self) -> String {
        let payload = match &self.outcome {
            Ok(value) => json!({"status": "ok", "result": value}),
            Err(e) => json!({"status": "error", "error": e.kind(), "message": e.to_string()}),
        };
        payload.to_string()
    }
}

/// Capability description exposed to the endpoint at session setup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilitySchema {
    /// Capability name
    pub name: String,
    /// Description shown to the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Parameter JSON schema
    pub parameters: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_output() {
        let result = FunctionResult {
            call_id: "c1".to_string(),
            name: "get_status".to_string(),
            outcome: Ok(json!({"battery": 87})),
        };
        let output: Value = serde_json::from_str(&result.to_output()).unwrap();
        assert_eq!(output["status"], "ok");
        assert_eq!(output["result"]["battery"], 87);
        assert_eq!(result.status(), FunctionCallStatus::Completed);
    }

    #[test]
    fn test_error_output() {
        let result = FunctionResult {
            call_id: "c2".to_string(),
            name: "teleport".to_string(),
            outcome: Err(DispatchError::UnknownCapability("teleport".to_string())),
        };
        let output: Value = serde_json::from_str(&result.to_output()).unwrap();
        assert_eq!(output["status"], "error");
        assert_eq!(output["error"], "unknown_capability");
        assert!(output["message"].as_str().unwrap().contains("teleport"));
        assert_eq!(result.status(), FunctionCallStatus::Failed);
    }
}
