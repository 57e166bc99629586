//! Conversion of generic arguments into pinned runtime values.

use oif_core::{Arg, ArrayF64};

use crate::BACKEND_NAME;
use crate::error::{ArgDirection, DispatchError};
use crate::exception;
use crate::runtime::EmbeddedRuntime;

/// The argument kinds this backend can hand to the runtime.
#[derive(Debug, Clone, Copy)]
pub enum NativeArg<'b> {
    /// Boxed `Float64`.
    Scalar(f64),
    /// Non-owning `Vector{Float64}` over the caller's buffer.
    ArrayView(&'b ArrayF64<'b>),
}

/// A runtime value read back into Rust.
#[derive(Debug, Clone, PartialEq)]
pub enum Unmarshaled {
    Scalar(f64),
    Array(Vec<f64>),
}

impl<'b> NativeArg<'b> {
    /// Classify a generic argument, rejecting anything outside the supported
    /// kinds. `index` is the position in the concatenated input-then-output
    /// list.
    pub fn classify(
        arg: &'b Arg<'b>,
        index: usize,
        direction: ArgDirection,
    ) -> Result<Self, DispatchError> {
        match arg {
            Arg::Float64(value) => Ok(NativeArg::Scalar(*value)),
            Arg::ArrayF64(view) if view.rank() == 1 => Ok(NativeArg::ArrayView(view)),
            other => {
                if let Arg::ArrayF64(view) = other {
                    tracing::debug!(
                        backend = BACKEND_NAME,
                        index,
                        rank = view.rank(),
                        "Only 1-D arrays are supported"
                    );
                }
                Err(DispatchError::ArgumentTypeUnsupported {
                    index,
                    direction,
                    tag: other.tag(),
                })
            }
        }
    }

    pub fn marshal<R: EmbeddedRuntime>(&self, runtime: &R) -> Result<R::Value, DispatchError> {
        let outcome = match self {
            NativeArg::Scalar(value) => runtime.box_f64(*value),
            // SAFETY: the view borrows the caller's buffer for 'b, which
            // outlives the marshaled list built from it.
            NativeArg::ArrayView(view) => unsafe { runtime.wrap_f64_array(view.data(), view.len()) },
        };
        exception::check(runtime, outcome).map_err(DispatchError::AllocationFailed)
    }

    fn read<R: EmbeddedRuntime>(&self, runtime: &R, value: R::Value) -> Option<Unmarshaled> {
        match self {
            NativeArg::Scalar(_) => runtime.unbox_f64(value).map(Unmarshaled::Scalar),
            NativeArg::ArrayView(_) => runtime.read_f64_array(value).map(Unmarshaled::Array),
        }
    }

    pub fn unmarshal<R: EmbeddedRuntime>(
        &self,
        runtime: &R,
        value: R::Value,
    ) -> Result<Unmarshaled, DispatchError> {
        self.read(runtime, value).ok_or_else(|| {
            exception::take_pending(runtime);
            DispatchError::UnexpectedReturn(runtime.type_name(value))
        })
    }
}

/// A runtime value kept rooted for as long as the guard lives.
pub struct Pinned<'r, R: EmbeddedRuntime> {
    runtime: &'r R,
    value: R::Value,
}

impl<'r, R: EmbeddedRuntime> Pinned<'r, R> {
    pub fn new(runtime: &'r R, value: R::Value) -> Result<Self, DispatchError> {
        runtime.pin(value)?;
        Ok(Self { runtime, value })
    }

    pub fn value(&self) -> R::Value {
        self.value
    }
}

impl<R: EmbeddedRuntime> Drop for Pinned<'_, R> {
    fn drop(&mut self) {
        self.runtime.unpin(self.value);
    }
}

/// The pinned native argument list for one call.
///
/// Pins are released newest-first when the list is dropped, whichever way the
/// call ends.
pub struct MarshaledArgs<'r, 'b, R: EmbeddedRuntime> {
    kinds: Vec<NativeArg<'b>>,
    pinned: Vec<Pinned<'r, R>>,
}

impl<'r, 'b, R: EmbeddedRuntime> MarshaledArgs<'r, 'b, R> {
    /// Marshal inputs followed by outputs.
    ///
    /// On the first unsupported argument, every value pinned so far is
    /// released before the error is returned.
    pub fn marshal(
        runtime: &'r R,
        in_args: &'b [Arg<'b>],
        out_args: &'b [Arg<'b>],
    ) -> Result<Self, DispatchError> {
        let total = in_args.len() + out_args.len();
        let mut marshaled = Self {
            kinds: Vec::with_capacity(total),
            pinned: Vec::with_capacity(total),
        };

        let tagged = in_args
            .iter()
            .map(|arg| (arg, ArgDirection::Input))
            .chain(out_args.iter().map(|arg| (arg, ArgDirection::Output)));

        for (index, (arg, direction)) in tagged.enumerate() {
            let kind = NativeArg::classify(arg, index, direction)?;
            let value = kind.marshal(runtime)?;
            marshaled.pinned.push(Pinned::new(runtime, value)?);
            marshaled.kinds.push(kind);
        }

        debug_assert_eq!(marshaled.pinned.len(), total);
        Ok(marshaled)
    }

    pub fn len(&self) -> usize {
        self.pinned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pinned.is_empty()
    }

    pub fn values(&self) -> Vec<R::Value> {
        self.pinned.iter().map(Pinned::value).collect()
    }

    /// Read argument `index` back out of the runtime.
    pub fn unmarshal(&self, runtime: &R, index: usize) -> Option<Result<Unmarshaled, DispatchError>> {
        let kind = self.kinds.get(index)?;
        let value = self.pinned.get(index)?.value();
        Some(kind.unmarshal(runtime, value))
    }

    /// Read argument `index` back for diagnostics only. A failed read yields
    /// `None` without reporting, and any fault it raised is cleared.
    pub fn peek(&self, runtime: &R, index: usize) -> Option<Unmarshaled> {
        let kind = self.kinds.get(index)?;
        let value = self.pinned.get(index)?.value();
        let read = kind.read(runtime, value);
        if read.is_none() && runtime.pending_exception().is_some() {
            runtime.clear_exception();
        }
        read
    }
}

impl<R: EmbeddedRuntime> Drop for MarshaledArgs<'_, '_, R> {
    fn drop(&mut self) {
        while let Some(pinned) = self.pinned.pop() {
            drop(pinned);
        }
    }
}
