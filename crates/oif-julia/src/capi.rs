//! C entry points loaded by the dispatch library.
//!
//! Every entry point goes through one process-wide backend behind a mutex.
//! Failures are logged and collapsed into a null handle or `OIF_ERROR`.

use std::ffi::{CStr, c_char, c_int};
use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use oif_core::{
    Arg, DispatchLanguage, ImplHandle, ImplId, ImplInfo, LanguageBackend, OifArgs, status_of,
};

use crate::BACKEND_NAME;
use crate::backend::JuliaBackend;
use crate::config::JuliaConfig;
use crate::error::DispatchError;
use crate::runtime::EmbeddedRuntime;

static BACKEND: Mutex<Option<JuliaBackend>> = Mutex::new(None);

fn lock() -> MutexGuard<'static, Option<JuliaBackend>> {
    BACKEND.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle given to the dispatch library.
///
/// The dispatch library owns `base` and stamps its own id and backend tag into
/// it after [`load_impl`] returns. The backend finds its implementation
/// through `id` alone.
#[repr(C)]
#[derive(Debug)]
pub struct JuliaImplInfo {
    pub base: ImplInfo,
    id: ImplId,
}

impl JuliaImplInfo {
    fn new(handle: ImplHandle) -> Self {
        Self {
            base: ImplInfo::from(handle),
            id: handle.id(),
        }
    }

    /// The backend handle, tagged with the family `dh` currently names.
    fn handle(&self) -> Result<ImplHandle, DispatchError> {
        let language = DispatchLanguage::from_raw(self.base.dh).ok_or_else(|| {
            DispatchError::InvalidDescriptor(format!("unknown backend tag {}", self.base.dh))
        })?;
        Ok(ImplHandle::new(language, self.id))
    }
}

/// Report a failure detected at the boundary, before the backend saw it.
fn rejected(e: DispatchError) -> DispatchError {
    tracing::error!(backend = BACKEND_NAME, kind = ?e.kind(), "[{BACKEND_NAME}] ERROR: {e}");
    e
}

unsafe fn c_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, DispatchError> {
    if ptr.is_null() {
        return Err(DispatchError::InvalidDescriptor(format!("{what} is null")));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| DispatchError::InvalidDescriptor(format!("{what} is not UTF-8")))
}

/// # Safety
///
/// `implh` must be null or point at the `base` of a live [`JuliaImplInfo`].
unsafe fn impl_info<'a>(implh: *const ImplInfo) -> Result<&'a JuliaImplInfo, DispatchError> {
    // SAFETY: `base` is the first field of the `repr(C)` JuliaImplInfo.
    unsafe { implh.cast::<JuliaImplInfo>().as_ref() }
        .ok_or_else(|| DispatchError::InvalidDescriptor("implementation handle is null".into()))
}

unsafe fn decode<'a>(pack: *const OifArgs) -> Result<Vec<Arg<'a>>, DispatchError> {
    match unsafe { pack.as_ref() } {
        Some(pack) => Ok(unsafe { pack.decode()? }),
        None => Ok(Vec::new()),
    }
}

fn load_through<R: EmbeddedRuntime>(
    backend: &mut JuliaBackend<R>,
    descriptor: &str,
    version_major: usize,
    version_minor: usize,
) -> Result<*mut ImplInfo, DispatchError> {
    let major = u32::try_from(version_major).unwrap_or(u32::MAX);
    let minor = u32::try_from(version_minor).unwrap_or(u32::MAX);
    let handle = backend.load(descriptor, major, minor)?;
    Ok(Box::into_raw(Box::new(JuliaImplInfo::new(handle))).cast::<ImplInfo>())
}

/// # Safety
///
/// See [`call_impl`].
unsafe fn call_through<R: EmbeddedRuntime>(
    backend: &mut JuliaBackend<R>,
    implh: *const ImplInfo,
    method: *const c_char,
    in_args: *const OifArgs,
    out_args: *const OifArgs,
) -> Result<(), DispatchError> {
    let handle = unsafe { impl_info(implh) }
        .and_then(JuliaImplInfo::handle)
        .map_err(rejected)?;
    let method = unsafe { c_str(method, "method name") }.map_err(rejected)?;
    let in_args = unsafe { decode(in_args) }.map_err(rejected)?;
    let out_args = unsafe { decode(out_args) }.map_err(rejected)?;
    backend.call(&handle, method, &in_args, &out_args)
}

/// # Safety
///
/// See [`unload_impl`].
unsafe fn unload_through<R: EmbeddedRuntime>(
    backend: &mut JuliaBackend<R>,
    implh: *const ImplInfo,
) -> Result<(), DispatchError> {
    let handle = unsafe { impl_info(implh) }
        .and_then(JuliaImplInfo::handle)
        .map_err(rejected)?;
    backend.unload(handle)
}

unsafe fn try_load(
    impl_details: *const c_char,
    version_major: usize,
    version_minor: usize,
) -> Result<*mut ImplInfo, DispatchError> {
    let descriptor = unsafe { c_str(impl_details, "implementation descriptor") }.map_err(rejected)?;

    let mut guard = lock();
    if guard.is_none() {
        let backend = JuliaConfig::discover().and_then(|config| JuliaBackend::from_config(&config));
        *guard = Some(backend.map_err(rejected)?);
    }
    let backend = guard
        .as_mut()
        .ok_or(DispatchError::RuntimeNotInitialized)
        .map_err(rejected)?;
    load_through(backend, descriptor, version_major, version_minor)
}

/// Load the implementation named by `impl_details` (`"<path> <module>"`).
///
/// Returns null on failure. A non-null result points at the `base` of a
/// [`JuliaImplInfo`] and must be released with [`unload_impl`].
///
/// # Safety
///
/// `impl_details` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn load_impl(
    impl_details: *const c_char,
    version_major: usize,
    version_minor: usize,
) -> *mut ImplInfo {
    unsafe { try_load(impl_details, version_major, version_minor) }.unwrap_or(ptr::null_mut())
}

/// Call `method` on a loaded implementation. Returns `OIF_OK` or
/// `OIF_ERROR`.
///
/// # Safety
///
/// `implh` must be null or come from [`load_impl`]. `method` must be null or
/// a valid NUL-terminated string. `in_args` and `out_args` must be null or
/// point to argument packs whose buffers stay valid for the whole call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn call_impl(
    implh: *mut ImplInfo,
    method: *const c_char,
    in_args: *mut OifArgs,
    out_args: *mut OifArgs,
) -> c_int {
    let result = lock()
        .as_mut()
        .ok_or(DispatchError::RuntimeNotInitialized)
        .map_err(rejected)
        .and_then(|backend| unsafe { call_through(backend, implh, method, in_args, out_args) });
    status_of(&result)
}

/// Unload an implementation, shut the runtime down and free the handle.
///
/// The handle is only freed when the unload succeeds.
///
/// # Safety
///
/// `implh` must be null or come from [`load_impl`] and not have been
/// unloaded already.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn unload_impl(implh: *mut ImplInfo) -> c_int {
    let result = lock()
        .as_mut()
        .ok_or(DispatchError::RuntimeNotInitialized)
        .map_err(rejected)
        .and_then(|backend| unsafe { unload_through(backend, implh) });
    if result.is_ok() {
        drop(unsafe { Box::from_raw(implh.cast::<JuliaImplInfo>()) });
    }
    status_of(&result)
}
