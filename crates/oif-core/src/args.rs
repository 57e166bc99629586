use std::ffi::{c_int, c_long, c_void};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use serde::{Deserialize, Serialize};

use crate::error::ArgDecodeError;

pub const OIF_INT: c_int = 1;
pub const OIF_FLOAT32: c_int = 2;
pub const OIF_FLOAT64: c_int = 3;
pub const OIF_FLOAT32_P: c_int = 4;
pub const OIF_ARRAY_F64: c_int = 5;
pub const OIF_STR: c_int = 6;

/// Type tag of a generic argument, as declared by the frontend.
///
/// Raw values outside the known enumeration are preserved in
/// [`ArgType::Unknown`] so backends can report exactly what they received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgType {
    Int,
    Float32,
    Float64,
    Float32Ptr,
    ArrayF64,
    Str,
    Unknown(i32),
}

impl ArgType {
    pub fn from_raw(raw: c_int) -> Self {
        match raw {
            OIF_INT => ArgType::Int,
            OIF_FLOAT32 => ArgType::Float32,
            OIF_FLOAT64 => ArgType::Float64,
            OIF_FLOAT32_P => ArgType::Float32Ptr,
            OIF_ARRAY_F64 => ArgType::ArrayF64,
            OIF_STR => ArgType::Str,
            other => ArgType::Unknown(other),
        }
    }

    pub fn as_raw(self) -> c_int {
        match self {
            ArgType::Int => OIF_INT,
            ArgType::Float32 => OIF_FLOAT32,
            ArgType::Float64 => OIF_FLOAT64,
            ArgType::Float32Ptr => OIF_FLOAT32_P,
            ArgType::ArrayF64 => OIF_ARRAY_F64,
            ArgType::Str => OIF_STR,
            ArgType::Unknown(raw) => raw,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ArgType::Int => "OIF_INT",
            ArgType::Float32 => "OIF_FLOAT32",
            ArgType::Float64 => "OIF_FLOAT64",
            ArgType::Float32Ptr => "OIF_FLOAT32_P",
            ArgType::ArrayF64 => "OIF_ARRAY_F64",
            ArgType::Str => "OIF_STR",
            ArgType::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_raw())
    }
}

/// A borrowed, caller-owned buffer of `f64` values.
///
/// Backends hand this memory to their runtime as-is; nothing is copied, so
/// writes made by an implementation are visible to the caller once the call
/// returns.
#[derive(Debug)]
pub struct ArrayF64<'a> {
    data: NonNull<f64>,
    dims: Vec<usize>,
    _buffer: PhantomData<&'a mut [f64]>,
}

impl<'a> ArrayF64<'a> {
    pub fn from_slice(slice: &'a mut [f64]) -> Self {
        let len = slice.len();
        Self {
            // A slice pointer is never null, even for an empty slice.
            data: NonNull::from(slice).cast(),
            dims: vec![len],
            _buffer: PhantomData,
        }
    }

    /// # Safety
    ///
    /// `data` must point to `dims.iter().product()` initialized `f64` values
    /// that stay valid and unaliased for `'a`.
    pub unsafe fn from_raw_parts(data: NonNull<f64>, dims: Vec<usize>) -> Self {
        Self {
            data,
            dims,
            _buffer: PhantomData,
        }
    }

    pub fn data(&self) -> NonNull<f64> {
        self.data
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the current contents of the buffer.
    pub fn to_vec(&self) -> Vec<f64> {
        // SAFETY: the constructors guarantee `len()` valid elements for 'a.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len()) }.to_vec()
    }
}

/// One decoded generic argument.
#[derive(Debug)]
pub enum Arg<'a> {
    Int(i32),
    Float64(f64),
    ArrayF64(ArrayF64<'a>),
    /// A tag this ABI knows about (or not) but carries no Rust value for.
    Other(ArgType),
}

impl Arg<'_> {
    pub fn tag(&self) -> ArgType {
        match self {
            Arg::Int(_) => ArgType::Int,
            Arg::Float64(_) => ArgType::Float64,
            Arg::ArrayF64(_) => ArgType::ArrayF64,
            Arg::Other(tag) => *tag,
        }
    }
}

/// Array descriptor passed by frontends for `OIF_ARRAY_F64` arguments.
#[repr(C)]
#[derive(Debug)]
pub struct OifArrayF64 {
    pub nd: c_int,
    pub dimensions: *mut c_long,
    pub data: *mut f64,
}

/// Argument pack at the C boundary.
///
/// `arg_values[i]` points at the value for scalars and at a pointer to an
/// [`OifArrayF64`] for arrays.
#[repr(C)]
#[derive(Debug)]
pub struct OifArgs {
    pub num_args: usize,
    pub arg_types: *const c_int,
    pub arg_values: *const *mut c_void,
}

impl OifArgs {
    /// Decode the pack into typed arguments borrowing the frontend's storage.
    ///
    /// # Safety
    ///
    /// Both tables must hold `num_args` entries and every value pointer must
    /// match its declared tag. Array buffers must outlive `'a`.
    pub unsafe fn decode<'a>(&'a self) -> Result<Vec<Arg<'a>>, ArgDecodeError> {
        if self.num_args == 0 {
            return Ok(Vec::new());
        }
        if self.arg_types.is_null() || self.arg_values.is_null() {
            return Err(ArgDecodeError::NullTable(self.num_args));
        }

        let mut args = Vec::with_capacity(self.num_args);
        for index in 0..self.num_args {
            // SAFETY: caller guarantees both tables hold `num_args` entries.
            let (raw_tag, value) =
                unsafe { (*self.arg_types.add(index), *self.arg_values.add(index)) };
            let tag = ArgType::from_raw(raw_tag);
            // Unsupported tags never touch the value slot.
            if !matches!(tag, ArgType::Float64 | ArgType::ArrayF64) {
                args.push(Arg::Other(tag));
                continue;
            }
            if value.is_null() {
                return Err(ArgDecodeError::NullValue { index });
            }

            let arg = match tag {
                // SAFETY: the tag promises the pointee type.
                ArgType::Float64 => Arg::Float64(unsafe { *(value as *const f64) }),
                _ => Arg::ArrayF64(unsafe { decode_array(index, value)? }),
            };
            args.push(arg);
        }
        Ok(args)
    }
}

unsafe fn decode_array<'a>(index: usize, value: *mut c_void) -> Result<ArrayF64<'a>, ArgDecodeError> {
    // SAFETY: for OIF_ARRAY_F64 the value slot holds `OIFArrayF64 **`.
    let desc_ptr = unsafe { *(value as *const *const OifArrayF64) };
    if desc_ptr.is_null() {
        return Err(ArgDecodeError::NullArray { index });
    }
    let desc = unsafe { &*desc_ptr };
    let data = NonNull::new(desc.data).ok_or(ArgDecodeError::NullArray { index })?;

    let nd = usize::try_from(desc.nd).map_err(|_| ArgDecodeError::NegativeExtent {
        index,
        extent: i64::from(desc.nd),
    })?;
    if nd > 0 && desc.dimensions.is_null() {
        return Err(ArgDecodeError::NullArray { index });
    }

    let mut dims = Vec::with_capacity(nd);
    for axis in 0..nd {
        let extent = unsafe { *desc.dimensions.add(axis) };
        let extent = usize::try_from(extent).map_err(|_| ArgDecodeError::NegativeExtent {
            index,
            extent: extent as i64,
        })?;
        dims.push(extent);
    }

    Ok(unsafe { ArrayF64::from_raw_parts(data, dims) })
}
