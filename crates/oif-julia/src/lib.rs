//! Open Interfaces backend for implementations written in Julia.
//!
//! The backend embeds `libjulia`, loads an implementation module from a
//! `"<source-path> <module>"` descriptor and invokes its functions with
//! arguments marshaled from the generic dispatch ABI. Functions that receive
//! output arguments are looked up with the `!` suffix, following the Julia
//! convention for functions that mutate their arguments.
//!
//! [`JuliaBackend`] is the Rust entry point; the `cdylib` build also exports
//! `load_impl`, `call_impl` and `unload_impl` for the C dispatch library.

pub mod backend;
pub mod capi;
pub mod config;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod exception;
pub mod julia;
pub mod lifecycle;
pub mod marshal;
pub mod resolver;
pub mod runtime;

#[cfg(test)]
mod testing;

/// Name carried by every diagnostic this backend emits.
pub const BACKEND_NAME: &str = "dispatch_julia";

pub use backend::JuliaBackend;
pub use config::JuliaConfig;
pub use descriptor::ImplDescriptor;
pub use error::{DispatchError, ErrorKind};
pub use julia::JuliaRuntime;
pub use lifecycle::{LifecycleState, RuntimeContext};
pub use runtime::EmbeddedRuntime;
