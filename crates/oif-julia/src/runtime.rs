use std::ptr::NonNull;

use crate::error::DispatchError;

/// The primitives the adapter needs from an embedded, garbage-collected
/// runtime.
///
/// Operations that can raise inside the runtime return `None` and leave the
/// fault pending; callers hand it to [`crate::exception`] to format and clear.
/// Receivers are `&self` because the runtime's state is process-global and
/// pin guards must coexist with further runtime calls.
pub trait EmbeddedRuntime {
    /// A reference to any value living in the runtime's heap.
    type Value: Copy + std::fmt::Debug;
    /// A reference to a loaded module.
    type Module: Copy + std::fmt::Debug;

    /// Process-wide start-up. Called exactly once per process.
    fn initialize(&self) -> Result<(), DispatchError>;

    /// Process-wide shutdown. Nothing may touch the runtime afterwards.
    fn finalize(&self);

    /// Evaluate source text in the top-level namespace.
    fn eval(&self, source: &str) -> Option<Self::Value>;

    /// Look up a module bound by `name` in the top-level namespace.
    fn lookup_module(&self, name: &str) -> Option<Self::Module>;

    /// Look up a function bound by `name` inside `module`. A missing binding,
    /// or one bound to something other than a function, is `None` without a
    /// pending fault.
    fn lookup_function(&self, module: Self::Module, name: &str) -> Option<Self::Value>;

    fn box_f64(&self, value: f64) -> Option<Self::Value>;

    fn unbox_f64(&self, value: Self::Value) -> Option<f64>;

    /// Wrap caller memory as a one-dimensional `Float64` array without copying
    /// and without handing ownership to the collector.
    ///
    /// # Safety
    ///
    /// `data` must point to `len` valid `f64` values that outlive every use of
    /// the returned value.
    unsafe fn wrap_f64_array(&self, data: NonNull<f64>, len: usize) -> Option<Self::Value>;

    fn read_f64_array(&self, value: Self::Value) -> Option<Vec<f64>>;

    /// Root `value` so the collector cannot reclaim or move it. Pins are
    /// released in the reverse order they were taken.
    fn pin(&self, value: Self::Value) -> Result<(), DispatchError>;

    fn unpin(&self, value: Self::Value);

    /// Call `function` positionally.
    fn call(&self, function: Self::Value, args: &[Self::Value]) -> Option<Self::Value>;

    /// Unbox a signed 64-bit integer, or `None` when `value` is another type.
    fn unbox_i64(&self, value: Self::Value) -> Option<i64>;

    fn type_name(&self, value: Self::Value) -> String;

    /// The pending fault, if any.
    fn pending_exception(&self) -> Option<Self::Value>;

    /// Render a fault with the runtime's own error formatting.
    fn describe_exception(&self, exception: Self::Value) -> String;

    fn clear_exception(&self);
}
