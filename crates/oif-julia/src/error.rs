use std::fmt;

use oif_core::{ArgDecodeError, ArgType, DispatchLanguage, ImplId};
use thiserror::Error;

/// Which argument list an argument came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgDirection {
    Input,
    Output,
}

impl fmt::Display for ArgDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgDirection::Input => write!(f, "input"),
            ArgDirection::Output => write!(f, "output"),
        }
    }
}

/// Step of module resolution that faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStage {
    Include,
    Import,
    Lookup,
}

impl fmt::Display for ResolveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveStage::Include => write!(f, "include"),
            ResolveStage::Import => write!(f, "import"),
            ResolveStage::Lookup => write!(f, "lookup"),
        }
    }
}

/// Coarse classification of a [`DispatchError`] for structured reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ArgumentTypeUnsupported,
    InvalidArguments,
    InvalidDescriptor,
    ModuleResolutionFailed,
    CallableNotFound,
    CalleeException,
    CalleeSignaledFailure,
    UnexpectedReturn,
    AllocationFailed,
    InvalidHandle,
    Lifecycle,
    Library,
    Config,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("cannot convert {direction} argument #{index} with provided type {tag}")]
    ArgumentTypeUnsupported {
        index: usize,
        direction: ArgDirection,
        tag: ArgType,
    },

    #[error("invalid argument pack: {0}")]
    InvalidArguments(#[from] ArgDecodeError),

    #[error("too many arguments: {0} does not fit a 32-bit count")]
    TooManyArguments(usize),

    #[error("invalid implementation descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("module resolution failed during {stage}: {detail}")]
    ModuleResolutionFailed { stage: ResolveStage, detail: String },

    #[error("could not find method '{name}' in implementation {implementation}")]
    CallableNotFound { name: String, implementation: ImplId },

    #[error("callee raised: {0}")]
    CalleeException(String),

    #[error("callee signaled failure with code {0}")]
    CalleeSignaledFailure(i64),

    #[error("callee returned {0} instead of Int64")]
    UnexpectedReturn(String),

    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    #[error("handle belongs to the {found} backend, not {expected}")]
    HandleMismatch {
        expected: DispatchLanguage,
        found: DispatchLanguage,
    },

    #[error("no loaded implementation with id {0}")]
    UnknownImplementation(ImplId),

    #[error("embedded runtime is already initialized")]
    RuntimeAlreadyInitialized,

    #[error("embedded runtime has been finalized and cannot be used again")]
    RuntimeFinalized,

    #[error("embedded runtime is not initialized")]
    RuntimeNotInitialized,

    #[error("failed to open runtime library: {0}")]
    LibraryLoad(String),

    #[error("runtime library is missing symbol '{0}'")]
    MissingSymbol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    /// Whether the fault behind this error was already emitted by
    /// [`crate::exception`] when it was taken from the runtime.
    pub fn reported_by_runtime(&self) -> bool {
        matches!(
            self,
            DispatchError::CalleeException(_)
                | DispatchError::ModuleResolutionFailed { .. }
                | DispatchError::AllocationFailed(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::ArgumentTypeUnsupported { .. } => ErrorKind::ArgumentTypeUnsupported,
            DispatchError::InvalidArguments(_) | DispatchError::TooManyArguments(_) => {
                ErrorKind::InvalidArguments
            }
            DispatchError::InvalidDescriptor(_) => ErrorKind::InvalidDescriptor,
            DispatchError::ModuleResolutionFailed { .. } => ErrorKind::ModuleResolutionFailed,
            DispatchError::CallableNotFound { .. } => ErrorKind::CallableNotFound,
            DispatchError::CalleeException(_) => ErrorKind::CalleeException,
            DispatchError::CalleeSignaledFailure(_) => ErrorKind::CalleeSignaledFailure,
            DispatchError::UnexpectedReturn(_) => ErrorKind::UnexpectedReturn,
            DispatchError::AllocationFailed(_) => ErrorKind::AllocationFailed,
            DispatchError::HandleMismatch { .. } | DispatchError::UnknownImplementation(_) => {
                ErrorKind::InvalidHandle
            }
            DispatchError::RuntimeAlreadyInitialized
            | DispatchError::RuntimeFinalized
            | DispatchError::RuntimeNotInitialized => ErrorKind::Lifecycle,
            DispatchError::LibraryLoad(_) | DispatchError::MissingSymbol(_) => ErrorKind::Library,
            DispatchError::Config(_) | DispatchError::Io(_) => ErrorKind::Config,
        }
    }
}
