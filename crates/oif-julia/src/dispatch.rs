use oif_core::{Arg, ImplId};

use crate::BACKEND_NAME;
use crate::error::DispatchError;
use crate::exception;
use crate::marshal::MarshaledArgs;
use crate::runtime::EmbeddedRuntime;

/// Suffix the runtime's convention puts on functions that mutate their
/// arguments in place.
pub const DEFAULT_MUTATING_SUFFIX: char = '!';

/// Outcome of looking up the callee for a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallableLookup<V> {
    Found { name: String, function: V },
    NotFound { name: String },
}

/// Name of the callee implementing `method`.
///
/// Methods with output arguments write into them, so their callee carries the
/// mutating suffix. There is no fallback to the plain name.
pub fn callable_name(method: &str, out_count: usize, suffix: char) -> String {
    if out_count == 0 {
        method.to_string()
    } else {
        format!("{method}{suffix}")
    }
}

pub fn resolve_callable<R: EmbeddedRuntime>(
    runtime: &R,
    module: R::Module,
    method: &str,
    out_count: usize,
    suffix: char,
) -> CallableLookup<R::Value> {
    let name = callable_name(method, out_count, suffix);
    match runtime.lookup_function(module, &name) {
        Some(function) => CallableLookup::Found { name, function },
        None => {
            exception::take_pending(runtime);
            CallableLookup::NotFound { name }
        }
    }
}

/// Reject argument lists whose counts do not fit the runtime's 32-bit call
/// interface.
pub fn check_arg_counts(in_count: usize, out_count: usize) -> Result<u32, DispatchError> {
    let too_many = |n| DispatchError::TooManyArguments(n);
    let in_count_32 = u32::try_from(in_count).map_err(|_| too_many(in_count))?;
    let out_count_32 = u32::try_from(out_count).map_err(|_| too_many(out_count))?;
    in_count_32
        .checked_add(out_count_32)
        .filter(|total| *total < i32::MAX as u32)
        .ok_or_else(|| too_many(in_count + out_count))
}

/// The callee reports success by returning `Int64` zero.
pub fn validate_return<R: EmbeddedRuntime>(runtime: &R, value: R::Value) -> Result<(), DispatchError> {
    match runtime.unbox_i64(value) {
        Some(0) => Ok(()),
        Some(code) => Err(DispatchError::CalleeSignaledFailure(code)),
        None => Err(DispatchError::UnexpectedReturn(runtime.type_name(value))),
    }
}

/// Marshal, resolve, invoke and validate one call into `module`.
///
/// All pins taken for the call are released before this returns.
pub fn dispatch<R: EmbeddedRuntime>(
    runtime: &R,
    module: R::Module,
    implementation: ImplId,
    method: &str,
    in_args: &[Arg<'_>],
    out_args: &[Arg<'_>],
    suffix: char,
) -> Result<(), DispatchError> {
    let total = check_arg_counts(in_args.len(), out_args.len())?;
    let marshaled = MarshaledArgs::marshal(runtime, in_args, out_args)?;

    let (name, function) = match resolve_callable(runtime, module, method, out_args.len(), suffix) {
        CallableLookup::Found { name, function } => (name, function),
        CallableLookup::NotFound { name } => {
            return Err(DispatchError::CallableNotFound { name, implementation });
        }
    };

    tracing::debug!(backend = BACKEND_NAME, callee = %name, nargs = total, "Invoking callee");
    let returned = runtime.call(function, &marshaled.values());
    let returned = exception::check(runtime, returned).map_err(DispatchError::CalleeException)?;
    validate_return(runtime, returned)?;

    if tracing::enabled!(tracing::Level::DEBUG) {
        for index in in_args.len()..marshaled.len() {
            if let Some(output) = marshaled.peek(runtime, index) {
                tracing::debug!(backend = BACKEND_NAME, callee = %name, index, ?output, "Output after call");
            }
        }
    }
    Ok(())
}
