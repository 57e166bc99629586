//! [`EmbeddedRuntime`] over a `libjulia` opened at run time.

mod ffi;

use std::cell::Cell;
use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU8, Ordering};

use crate::BACKEND_NAME;
use crate::config::RuntimeConfig;
use crate::error::DispatchError;
use crate::exception;
use crate::runtime::EmbeddedRuntime;

use ffi::{JlModule, JlValue, JuliaApi};

const UNINITIALIZED: u8 = 0;
const RUNNING: u8 = 1;
const FINALIZED: u8 = 2;

/// `libjulia` can be booted once per process and never after shutdown,
/// whichever context asks.
static PROCESS_STATE: AtomicU8 = AtomicU8::new(UNINITIALIZED);

/// Global array in `Main` holding pinned values.
const ROOTS_BINDING: &str = "__oif_dispatch_roots";

/// A value in the Julia heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JlRef(NonNull<JlValue>);

impl JlRef {
    fn from_raw(ptr: *mut JlValue) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    fn as_ptr(self) -> *mut JlValue {
        self.0.as_ptr()
    }
}

/// A Julia `Module`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JlModuleRef(NonNull<JlModule>);

// SAFETY: see `JuliaRuntime`. References are only dereferenced by the runtime
// that produced them.
unsafe impl Send for JlRef {}
unsafe impl Send for JlModuleRef {}

pub struct JuliaRuntime {
    api: JuliaApi,
    bindir: Option<PathBuf>,
    image: Option<PathBuf>,
    roots: Cell<Option<JlRef>>,
}

// SAFETY: Julia values may only be touched from the thread that booted the
// runtime. The backend is driven from one thread at a time behind a mutex and
// these handles never escape it.
unsafe impl Send for JuliaRuntime {}

impl JuliaRuntime {
    /// Open the configured `libjulia` and resolve its entry points. The
    /// runtime is not booted until [`EmbeddedRuntime::initialize`].
    pub fn open(config: &RuntimeConfig) -> Result<Self, DispatchError> {
        let api = JuliaApi::open(Path::new(&config.library))?;
        tracing::debug!(backend = BACKEND_NAME, library = %config.library, "Opened libjulia");
        Ok(Self {
            api,
            bindir: config.bindir.clone(),
            image: config.image.clone(),
            roots: Cell::new(None),
        })
    }

    fn symbol(&self, name: &str) -> Option<*mut ffi::JlSym> {
        let name = CString::new(name).ok()?;
        let sym = unsafe { (self.api.symbol)(name.as_ptr()) };
        (!sym.is_null()).then_some(sym)
    }

    fn global(&self, module: *mut JlModule, name: &str) -> Option<JlRef> {
        let sym = self.symbol(name)?;
        JlRef::from_raw(unsafe { (self.api.get_global)(module, sym) })
    }

    fn base_function(&self, name: &str) -> Option<JlRef> {
        self.global(unsafe { self.api.base_module() }, name)
    }

    fn has_type(&self, value: JlRef, name: &str) -> bool {
        self.type_name(value) == name
    }

    /// `value isa Function`. A fault raised by the check itself is cleared.
    fn is_function(&self, value: JlRef) -> bool {
        let checked = self
            .base_function("isa")
            .zip(self.base_function("Function"))
            .and_then(|(isa, function_type)| self.call(isa, &[value, function_type]));
        match checked {
            Some(result) if self.has_type(result, "Bool") => {
                unsafe { (self.api.unbox_bool)(result.as_ptr()) != 0 }
            }
            _ => {
                if self.pending_exception().is_some() {
                    self.clear_exception();
                }
                false
            }
        }
    }

    fn roots(&self) -> Result<JlRef, DispatchError> {
        self.roots.get().ok_or(DispatchError::RuntimeNotInitialized)
    }

    fn boot(&self) -> Result<(), DispatchError> {
        match (&self.bindir, self.api.init_with_image) {
            (Some(bindir), Some(init_with_image)) => {
                let bindir = path_cstring(bindir)?;
                let image = self.image.as_deref().map(path_cstring).transpose()?;
                let image_ptr = image.as_ref().map_or(ptr::null(), |i| i.as_ptr());
                unsafe { init_with_image(bindir.as_ptr(), image_ptr) };
            }
            _ => unsafe { (self.api.init)() },
        }
        Ok(())
    }
}

fn path_cstring(path: &Path) -> Result<CString, DispatchError> {
    path.to_str()
        .and_then(|s| CString::new(s).ok())
        .ok_or_else(|| DispatchError::Config(format!("unusable path {}", path.display())))
}

impl EmbeddedRuntime for JuliaRuntime {
    type Value = JlRef;
    type Module = JlModuleRef;

    fn initialize(&self) -> Result<(), DispatchError> {
        match PROCESS_STATE.compare_exchange(UNINITIALIZED, RUNNING, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {}
            Err(RUNNING) => return Err(DispatchError::RuntimeAlreadyInitialized),
            Err(_) => return Err(DispatchError::RuntimeFinalized),
        }

        self.boot()?;

        let roots = self.eval(&format!("const {ROOTS_BINDING} = Any[]"));
        let roots = exception::check(self, roots).map_err(DispatchError::AllocationFailed)?;
        self.roots.set(Some(roots));
        Ok(())
    }

    fn finalize(&self) {
        self.roots.set(None);
        unsafe { (self.api.atexit_hook)(0) };
        PROCESS_STATE.store(FINALIZED, Ordering::Release);
    }

    fn eval(&self, source: &str) -> Option<JlRef> {
        let source = CString::new(source).ok()?;
        JlRef::from_raw(unsafe { (self.api.eval_string)(source.as_ptr()) })
    }

    fn lookup_module(&self, name: &str) -> Option<JlModuleRef> {
        let value = self.global(unsafe { self.api.main_module() }, name)?;
        self.has_type(value, "Module")
            .then(|| JlModuleRef(value.0.cast()))
    }

    fn lookup_function(&self, module: JlModuleRef, name: &str) -> Option<JlRef> {
        let value = self.global(module.0.as_ptr(), name)?;
        if self.is_function(value) {
            return Some(value);
        }
        tracing::debug!(
            backend = BACKEND_NAME,
            name,
            found = %self.type_name(value),
            "Binding is not callable"
        );
        None
    }

    fn box_f64(&self, value: f64) -> Option<JlRef> {
        JlRef::from_raw(unsafe { (self.api.box_float64)(value) })
    }

    fn unbox_f64(&self, value: JlRef) -> Option<f64> {
        self.has_type(value, "Float64")
            .then(|| unsafe { (self.api.unbox_float64)(value.as_ptr()) })
    }

    unsafe fn wrap_f64_array(&self, data: NonNull<f64>, len: usize) -> Option<JlRef> {
        unsafe {
            let array_type = (self.api.apply_array_type)(self.api.float64_type(), 1);
            if array_type.is_null() {
                return None;
            }
            // own_buffer = 0: the collector never frees caller memory.
            JlRef::from_raw((self.api.ptr_to_array_1d)(array_type, data.as_ptr().cast(), len, 0))
        }
    }

    fn read_f64_array(&self, value: JlRef) -> Option<Vec<f64>> {
        let length = self.call(self.base_function("length")?, &[value])?;
        let length = usize::try_from(self.unbox_i64(length)?).ok()?;
        let getindex = self.base_function("getindex")?;

        let mut out = Vec::with_capacity(length);
        for i in 1..=length {
            let index = JlRef::from_raw(unsafe { (self.api.box_int64)(i as i64) })?;
            let element = self.call(getindex, &[value, index])?;
            out.push(self.unbox_f64(element)?);
        }
        Some(out)
    }

    fn pin(&self, value: JlRef) -> Result<(), DispatchError> {
        let roots = self.roots()?;
        let push = self.base_function("push!").ok_or_else(|| {
            let message = "Base.push! is not bound";
            tracing::error!(backend = BACKEND_NAME, "[{BACKEND_NAME}] ERROR: {message}");
            DispatchError::AllocationFailed(message.into())
        })?;
        let pushed = self.call(push, &[roots, value]);
        exception::check(self, pushed)
            .map(|_| ())
            .map_err(DispatchError::AllocationFailed)
    }

    fn unpin(&self, _value: JlRef) {
        let (Ok(roots), Some(pop)) = (self.roots(), self.base_function("pop!")) else {
            return;
        };
        if self.call(pop, &[roots]).is_none() {
            exception::take_pending(self);
        }
    }

    fn call(&self, function: JlRef, args: &[JlRef]) -> Option<JlRef> {
        let nargs = u32::try_from(args.len()).ok()?;
        let mut argv: Vec<*mut JlValue> = args.iter().map(|a| a.as_ptr()).collect();
        JlRef::from_raw(unsafe { (self.api.call)(function.as_ptr(), argv.as_mut_ptr(), nargs) })
    }

    fn unbox_i64(&self, value: JlRef) -> Option<i64> {
        self.has_type(value, "Int64")
            .then(|| unsafe { (self.api.unbox_int64)(value.as_ptr()) })
    }

    fn type_name(&self, value: JlRef) -> String {
        let name = unsafe { (self.api.typeof_str)(value.as_ptr()) };
        if name.is_null() {
            return String::from("<unknown>");
        }
        unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
    }

    fn pending_exception(&self) -> Option<JlRef> {
        JlRef::from_raw(unsafe { (self.api.exception_occurred)() })
    }

    fn describe_exception(&self, exception: JlRef) -> String {
        let rendered = self
            .base_function("sprint")
            .zip(self.base_function("showerror"))
            .and_then(|(sprint, showerror)| self.call(sprint, &[showerror, exception]))
            .filter(|s| self.has_type(*s, "String"));

        match rendered {
            Some(text) => {
                let ptr = unsafe { (self.api.string_ptr)(text.as_ptr()) };
                if ptr.is_null() {
                    return self.type_name(exception);
                }
                unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
            }
            // showerror itself threw; fall back to the exception's type.
            None => self.type_name(exception),
        }
    }

    fn clear_exception(&self) {
        unsafe { (self.api.exception_clear)() };
    }
}
