use std::ffi::c_int;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend family an implementation handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum DispatchLanguage {
    C = 1,
    Cpp = 2,
    Python = 3,
    Julia = 4,
    R = 5,
}

impl DispatchLanguage {
    pub fn from_raw(raw: c_int) -> Option<Self> {
        match raw {
            1 => Some(DispatchLanguage::C),
            2 => Some(DispatchLanguage::Cpp),
            3 => Some(DispatchLanguage::Python),
            4 => Some(DispatchLanguage::Julia),
            5 => Some(DispatchLanguage::R),
            _ => None,
        }
    }

    pub fn as_raw(self) -> c_int {
        self as c_int
    }
}

impl fmt::Display for DispatchLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchLanguage::C => write!(f, "c"),
            DispatchLanguage::Cpp => write!(f, "cpp"),
            DispatchLanguage::Python => write!(f, "python"),
            DispatchLanguage::Julia => write!(f, "julia"),
            DispatchLanguage::R => write!(f, "r"),
        }
    }
}

/// Backend-assigned implementation number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImplId(pub u32);

impl fmt::Display for ImplId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-held reference to a loaded implementation.
///
/// The language tag is fixed at creation; backends reject handles that carry
/// another family's tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImplHandle {
    language: DispatchLanguage,
    id: ImplId,
}

impl ImplHandle {
    pub fn new(language: DispatchLanguage, id: ImplId) -> Self {
        Self { language, id }
    }

    pub fn language(&self) -> DispatchLanguage {
        self.language
    }

    pub fn id(&self) -> ImplId {
        self.id
    }
}

/// Handle header shared with the dispatch library at the C boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ImplInfo {
    pub implh: c_int,
    pub dh: c_int,
}

impl From<ImplHandle> for ImplInfo {
    fn from(handle: ImplHandle) -> Self {
        Self {
            implh: handle.id.0 as c_int,
            dh: handle.language.as_raw(),
        }
    }
}
