use std::ffi::c_int;

use crate::args::Arg;
use crate::handle::{DispatchLanguage, ImplHandle};

/// Status returned across the C boundary on success.
pub const OIF_OK: c_int = 0;
/// Status returned across the C boundary on any failure.
pub const OIF_ERROR: c_int = -1;

/// Contract every language backend implements for the dispatch library.
///
/// Calls are synchronous and must be serialized by the caller; the `&mut self`
/// receivers make that explicit for in-process users.
pub trait LanguageBackend {
    type Error: std::error::Error;

    /// Backend family stamped on every handle this backend creates.
    fn language(&self) -> DispatchLanguage;

    /// Load the implementation described by `descriptor`.
    fn load(
        &mut self,
        descriptor: &str,
        version_major: u32,
        version_minor: u32,
    ) -> Result<ImplHandle, Self::Error>;

    /// Invoke `method` with inputs followed by pre-allocated outputs.
    fn call(
        &mut self,
        handle: &ImplHandle,
        method: &str,
        in_args: &[Arg<'_>],
        out_args: &[Arg<'_>],
    ) -> Result<(), Self::Error>;

    /// Release the implementation and the backend's runtime.
    fn unload(&mut self, handle: ImplHandle) -> Result<(), Self::Error>;
}

/// Collapse a backend result into the C status code.
pub fn status_of<T, E: std::error::Error>(result: &Result<T, E>) -> c_int {
    match result {
        Ok(_) => OIF_OK,
        Err(e) => {
            tracing::debug!("Collapsing backend error into status {OIF_ERROR}: {e}");
            OIF_ERROR
        }
    }
}
