//! Bridges faults raised inside the embedded runtime to the adapter.

use crate::BACKEND_NAME;
use crate::runtime::EmbeddedRuntime;

/// Format, emit and clear the pending fault, if any.
///
/// Returns the formatted message. Exactly one diagnostic is emitted per fault
/// and the runtime's error state is always cleared afterwards.
pub fn take_pending<R: EmbeddedRuntime>(runtime: &R) -> Option<String> {
    let exception = runtime.pending_exception()?;
    let message = runtime.describe_exception(exception);
    tracing::error!(backend = BACKEND_NAME, "[{BACKEND_NAME}] ERROR: {message}");
    runtime.clear_exception();
    Some(message)
}

/// Settle the outcome of a runtime primitive that may raise.
///
/// A pending fault wins over any returned value.
pub fn check<R: EmbeddedRuntime, T>(runtime: &R, outcome: Option<T>) -> Result<T, String> {
    if let Some(message) = take_pending(runtime) {
        return Err(message);
    }
    outcome.ok_or_else(|| {
        let message = "runtime returned no value and reported no exception".to_string();
        tracing::error!(backend = BACKEND_NAME, "[{BACKEND_NAME}] ERROR: {message}");
        message
    })
}
