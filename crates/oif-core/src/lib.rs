//! The Open Interfaces dispatch ABI as seen by a language backend.
//!
//! Frontends pack their arguments into tagged lists ([`OifArgs`] at the C
//! boundary, [`Arg`] in Rust) and address loaded implementations through an
//! [`ImplHandle`]. Every language backend implements [`LanguageBackend`] on
//! top of these types.

pub mod args;
pub mod backend;
pub mod error;
pub mod handle;

pub use args::{Arg, ArgType, ArrayF64, OifArgs, OifArrayF64};
pub use backend::{LanguageBackend, OIF_ERROR, OIF_OK, status_of};
pub use error::ArgDecodeError;
pub use handle::{DispatchLanguage, ImplHandle, ImplId, ImplInfo};
