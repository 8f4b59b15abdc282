//! Function registry: registration, argument validation and execution.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::isolation::call_handler_isolated;
use super::mode::{ConversationMode, ModeTracker};
use super::{CapabilitySchema, DispatchError, DispatchResult, FunctionCall, FunctionResult};

/// Default time budget for one handler invocation.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Handler Types
// =============================================================================

/// Error returned by a handler. Converted to a `HandlerError` result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerFault {
    message: String,
}

impl HandlerFault {
    /// Fault with a human-readable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerFault {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerFault {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerFault {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Future returned by a handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerFault>> + Send>>;

/// Async capability handler taking validated JSON arguments.
pub type FunctionHandler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`FunctionHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FunctionHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerFault>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

// =============================================================================
// Registration
// =============================================================================

/// A capability exposed to the endpoint.
pub struct FunctionRegistration {
    name: String,
    description: Option<String>,
    domain: Option<ConversationMode>,
    parameters: Value,
    validator: jsonschema::Validator,
    handler: FunctionHandler,
}

impl FunctionRegistration {
    /// Set the description shown to the model.
    pub fn with_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = Some(description.into());
        self
    }

    /// Set the conversation mode entered after a successful call.
    pub fn with_domain(&mut self, domain: ConversationMode) -> &mut Self {
        self.domain = Some(domain);
        self
    }

    /// Capability name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Domain tag, if any.
    pub fn domain(&self) -> Option<ConversationMode> {
        self.domain
    }

    /// Parameter JSON schema.
    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    fn schema(&self) -> CapabilitySchema {
        CapabilitySchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    fn validate(&self, arguments: &Value) -> Result<(), String> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(arguments)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}

impl fmt::Debug for FunctionRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistration")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("domain", &self.domain)
            .field("parameters", &self.parameters)
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Collects registrations at startup and freezes them into a registry.
pub struct FunctionRegistryBuilder {
    registrations: Vec<FunctionRegistration>,
    index: HashMap<String, usize>,
    mode: ModeTracker,
    handler_timeout: Duration,
}

impl Default for FunctionRegistryBuilder {
    fn default() -> Self {
        Self {
            registrations: Vec::new(),
            index: HashMap::new(),
            mode: ModeTracker::default(),
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }
}

impl FunctionRegistryBuilder {
    /// Empty builder with the default handler timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing mode tracker with the registry.
    pub fn with_mode_tracker(mut self, mode: ModeTracker) -> Self {
        self.mode = mode;
        self
    }

    /// Override the per-call handler timeout.
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// The mode tracker the registry will update.
    pub fn mode_tracker(&self) -> &ModeTracker {
        &self.mode
    }

    /// Register a capability.
    ///
    /// Fails with `DuplicateRegistration` if the name is taken and
    /// `InvalidSchema` if the parameter schema does not compile.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: FunctionHandler,
        schema: Value,
    ) -> DispatchResult<&mut FunctionRegistration> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(DispatchError::DuplicateRegistration(name));
        }

        let validator = jsonschema::validator_for(&schema).map_err(|e| {
            DispatchError::InvalidSchema {
                name: name.clone(),
                reason: e.to_string(),
            }
        })?;

        tracing::debug!(name = %name, "Registered capability");

        let slot = self.registrations.len();
        self.index.insert(name.clone(), slot);
        self.registrations.push(FunctionRegistration {
            name,
            description: None,
            domain: None,
            parameters: schema,
            validator,
            handler,
        });
        Ok(&mut self.registrations[slot])
    }

    /// Freeze the registrations.
    pub fn build(self) -> Arc<FunctionRegistry> {
        tracing::info!(
            capabilities = self.registrations.len(),
            handler_timeout = ?self.handler_timeout,
            "Function registry built"
        );
        Arc::new(FunctionRegistry {
            registrations: self.registrations,
            index: self.index,
            mode: self.mode,
            handler_timeout: self.handler_timeout,
        })
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Immutable set of capabilities, safe to share across tasks.
pub struct FunctionRegistry {
    registrations: Vec<FunctionRegistration>,
    index: HashMap<String, usize>,
    mode: ModeTracker,
    handler_timeout: Duration,
}

impl FunctionRegistry {
    /// Start building a registry.
    pub fn builder() -> FunctionRegistryBuilder {
        FunctionRegistryBuilder::new()
    }

    /// Look up a registration.
    pub fn get(&self, name: &str) -> Option<&FunctionRegistration> {
        self.index.get(name).map(|&slot| &self.registrations[slot])
    }

    /// Whether a capability is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of capabilities.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Capability names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.registrations.iter().map(|r| r.name.as_str()).collect()
    }

    /// Capability schemas in registration order.
    pub fn capability_schemas(&self) -> Vec<CapabilitySchema> {
        self.registrations
            .iter()
            .map(FunctionRegistration::schema)
            .collect()
    }

    /// Shared conversation mode.
    pub fn mode_tracker(&self) -> &ModeTracker {
        &self.mode
    }

    /// Current conversation mode.
    pub fn mode(&self) -> ConversationMode {
        self.mode.get()
    }

    /// Execute one call. Always returns exactly one result for the call id.
    pub async fn execute(&self, call: &FunctionCall) -> FunctionResult {
        let started = Instant::now();
        let outcome = self.run(call).await;

        match &outcome {
            Ok(_) => tracing::info!(
                call_id = %call.call_id,
                name = %call.name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Function call completed"
            ),
            Err(e) => tracing::warn!(
                call_id = %call.call_id,
                name = %call.name,
                kind = e.kind(),
                "Function call failed: {}",
                e
            ),
        }

        FunctionResult {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            outcome,
        }
    }

    async fn run(&self, call: &FunctionCall) -> DispatchResult<Value> {
        let registration = self
            .get(&call.name)
            .ok_or_else(|| DispatchError::UnknownCapability(call.name.clone()))?;

        let arguments = parse_arguments(&call.arguments).map_err(|reason| {
            DispatchError::InvalidArguments {
                name: call.name.clone(),
                reason,
            }
        })?;

        registration
            .validate(&arguments)
            .map_err(|reason| DispatchError::InvalidArguments {
                name: call.name.clone(),
                reason,
            })?;

        let value = call_handler_isolated(
            &registration.name,
            &registration.handler,
            arguments,
            self.handler_timeout,
        )
        .await
        .map_err(|failure| DispatchError::Handler {
            name: call.name.clone(),
            message: failure.to_string(),
        })?;

        if let Some(domain) = registration.domain {
            self.mode.set(domain);
        }

        Ok(value)
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("capabilities", &self.names())
            .field("mode", &self.mode.get())
            .field("handler_timeout", &self.handler_timeout)
            .finish()
    }
}

/// Parse the argument string; an empty string means no arguments.
fn parse_arguments(raw: &str) -> Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|e| format!("arguments are not valid JSON: {e}"))
}
