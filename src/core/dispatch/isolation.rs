//! Handler isolation and panic safety.
//!
//! Handler futures are polled inside `catch_unwind`, so a panicking handler
//! becomes a `HandlerError` result instead of tearing down the event loop.
//!
//! # Safety Considerations
//!
//! - `catch_unwind` only catches panics, not aborts; the release profile
//!   must keep `panic = "unwind"`
//! - Panics in tasks spawned by a handler are not caught here

use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;

use super::registry::{FunctionHandler, HandlerFuture};

/// Why an isolated handler call did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IsolationFailure {
    /// The handler returned an error
    #[error("{0}")]
    Failed(String),

    /// The handler panicked
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// The handler exceeded its time budget
    #[error("handler timed out after {0:?}")]
    TimedOut(Duration),
}

struct CatchUnwindFuture {
    inner: HandlerFuture,
}

impl Future for CatchUnwindFuture {
    type Output = Result<<HandlerFuture as Future>::Output, Box<dyn Any + Send>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = &mut self.inner;
        match catch_unwind(AssertUnwindSafe(|| inner.as_mut().poll(cx))) {
            Ok(Poll::Ready(output)) => Poll::Ready(Ok(output)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(panic_info) => Poll::Ready(Err(panic_info)),
        }
    }
}

/// Invoke a handler with panic catching and a time budget.
///
/// Panics during future creation and during polling are both caught.
pub async fn call_handler_isolated(
    name: &str,
    handler: &FunctionHandler,
    arguments: Value,
    budget: Duration,
) -> Result<Value, IsolationFailure> {
    let future = match catch_unwind(AssertUnwindSafe(|| (handler.as_ref())(arguments))) {
        Ok(future) => future,
        Err(panic_info) => {
            let msg = extract_panic_message(&panic_info);
            tracing::error!(name, message = %msg, "Handler panicked during future creation");
            return Err(IsolationFailure::Panicked(msg));
        }
    };

    let guarded = CatchUnwindFuture { inner: future };

    match tokio::time::timeout(budget, guarded).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(fault))) => Err(IsolationFailure::Failed(fault.to_string())),
        Ok(Err(panic_info)) => {
            let msg = extract_panic_message(&panic_info);
            tracing::error!(name, message = %msg, "Handler panicked during async execution");
            Err(IsolationFailure::Panicked(msg))
        }
        Err(_) => {
            tracing::warn!(name, ?budget, "Handler timed out");
            Err(IsolationFailure::TimedOut(budget))
        }
    }
}

/// Extract a human-readable message from a panic payload.
pub fn extract_panic_message(panic_info: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic (non-string payload)".to_string()
    }
}
