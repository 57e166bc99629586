//! Run-time bindings to the subset of the `libjulia` C API this backend uses.
//!
//! `libjulia` is opened with `RTLD_GLOBAL` so that code it JIT-compiles can
//! resolve its own runtime symbols.

use std::ffi::{c_char, c_int, c_void};
use std::path::Path;

use libloading::Library;

use crate::error::DispatchError;

#[repr(C)]
pub struct JlValue {
    _opaque: [u8; 0],
}

#[repr(C)]
pub struct JlModule {
    _opaque: [u8; 0],
}

#[repr(C)]
pub struct JlSym {
    _opaque: [u8; 0],
}

type InitFn = unsafe extern "C" fn();
type InitWithImageFn = unsafe extern "C" fn(*const c_char, *const c_char);
type AtexitHookFn = unsafe extern "C" fn(c_int);
type EvalStringFn = unsafe extern "C" fn(*const c_char) -> *mut JlValue;
type ExceptionOccurredFn = unsafe extern "C" fn() -> *mut JlValue;
type ExceptionClearFn = unsafe extern "C" fn();
type SymbolFn = unsafe extern "C" fn(*const c_char) -> *mut JlSym;
type GetGlobalFn = unsafe extern "C" fn(*mut JlModule, *mut JlSym) -> *mut JlValue;
type CallFn = unsafe extern "C" fn(*mut JlValue, *mut *mut JlValue, u32) -> *mut JlValue;
type BoxFloat64Fn = unsafe extern "C" fn(f64) -> *mut JlValue;
type BoxInt64Fn = unsafe extern "C" fn(i64) -> *mut JlValue;
type UnboxFloat64Fn = unsafe extern "C" fn(*mut JlValue) -> f64;
type UnboxInt64Fn = unsafe extern "C" fn(*mut JlValue) -> i64;
type UnboxBoolFn = unsafe extern "C" fn(*mut JlValue) -> i8;
type TypeofStrFn = unsafe extern "C" fn(*mut JlValue) -> *const c_char;
type StringPtrFn = unsafe extern "C" fn(*mut JlValue) -> *const c_char;
type ApplyArrayTypeFn = unsafe extern "C" fn(*mut JlValue, usize) -> *mut JlValue;
type PtrToArray1dFn = unsafe extern "C" fn(*mut JlValue, *mut c_void, usize, c_int) -> *mut JlValue;

/// Resolved entry points and globals of an opened `libjulia`.
pub struct JuliaApi {
    _lib: Library,
    pub init: InitFn,
    pub init_with_image: Option<InitWithImageFn>,
    pub atexit_hook: AtexitHookFn,
    pub eval_string: EvalStringFn,
    pub exception_occurred: ExceptionOccurredFn,
    pub exception_clear: ExceptionClearFn,
    pub symbol: SymbolFn,
    pub get_global: GetGlobalFn,
    pub call: CallFn,
    pub box_float64: BoxFloat64Fn,
    pub box_int64: BoxInt64Fn,
    pub unbox_float64: UnboxFloat64Fn,
    pub unbox_int64: UnboxInt64Fn,
    pub unbox_bool: UnboxBoolFn,
    pub typeof_str: TypeofStrFn,
    pub string_ptr: StringPtrFn,
    pub apply_array_type: ApplyArrayTypeFn,
    pub ptr_to_array_1d: PtrToArray1dFn,
    base_module: *mut *mut JlModule,
    main_module: *mut *mut JlModule,
    float64_type: *mut *mut JlValue,
}

impl JuliaApi {
    /// Open `library` (a path or a name for the dynamic loader) and resolve
    /// every symbol up front, so a missing one fails here rather than mid-call.
    pub fn open(library: &Path) -> Result<Self, DispatchError> {
        let lib = open_global(library)?;

        // SAFETY: every signature below matches julia.h for Julia 1.6 and later.
        unsafe {
            Ok(Self {
                init: symbol(&lib, "jl_init")?,
                init_with_image: symbol(&lib, "jl_init_with_image").ok(),
                atexit_hook: symbol(&lib, "jl_atexit_hook")?,
                eval_string: symbol(&lib, "jl_eval_string")?,
                exception_occurred: symbol(&lib, "jl_exception_occurred")?,
                exception_clear: symbol(&lib, "jl_exception_clear")?,
                symbol: symbol(&lib, "jl_symbol")?,
                get_global: symbol(&lib, "jl_get_global")?,
                call: symbol(&lib, "jl_call")?,
                box_float64: symbol(&lib, "jl_box_float64")?,
                box_int64: symbol(&lib, "jl_box_int64")?,
                unbox_float64: symbol(&lib, "jl_unbox_float64")?,
                unbox_int64: symbol(&lib, "jl_unbox_int64")?,
                unbox_bool: symbol(&lib, "jl_unbox_bool")?,
                typeof_str: symbol(&lib, "jl_typeof_str")?,
                string_ptr: symbol(&lib, "jl_string_ptr")?,
                apply_array_type: symbol(&lib, "jl_apply_array_type")?,
                ptr_to_array_1d: symbol(&lib, "jl_ptr_to_array_1d")?,
                base_module: symbol(&lib, "jl_base_module")?,
                main_module: symbol(&lib, "jl_main_module")?,
                float64_type: symbol(&lib, "jl_float64_type")?,
                _lib: lib,
            })
        }
    }

    /// `Base`. Only meaningful after `jl_init`.
    pub unsafe fn base_module(&self) -> *mut JlModule {
        unsafe { *self.base_module }
    }

    /// `Main`. Only meaningful after `jl_init`.
    pub unsafe fn main_module(&self) -> *mut JlModule {
        unsafe { *self.main_module }
    }

    /// `Float64`. Only meaningful after `jl_init`.
    pub unsafe fn float64_type(&self) -> *mut JlValue {
        unsafe { *self.float64_type }
    }
}

fn open_global(library: &Path) -> Result<Library, DispatchError> {
    #[cfg(unix)]
    let lib = unsafe {
        let flags = libloading::os::unix::RTLD_NOW | libloading::os::unix::RTLD_GLOBAL;
        libloading::os::unix::Library::open(Some(library), flags).map(Library::from)
    };
    #[cfg(not(unix))]
    let lib = unsafe { Library::new(library) };

    lib.map_err(|e| DispatchError::LibraryLoad(format!("{}: {e}", library.display())))
}

/// Copy a symbol's value out of the library. For functions `T` is the
/// function pointer type; for globals it is a pointer to the global.
unsafe fn symbol<T: Copy>(lib: &Library, name: &str) -> Result<T, DispatchError> {
    let sym = unsafe { lib.get::<T>(name.as_bytes()) }
        .map_err(|_| DispatchError::MissingSymbol(name.to_string()))?;
    Ok(*sym)
}
