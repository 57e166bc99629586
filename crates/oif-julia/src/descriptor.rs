use std::fmt;
use std::str::FromStr;

use crate::error::DispatchError;

/// Longest accepted source path or module identifier, in bytes.
pub const MAX_TOKEN_LEN: usize = 511;

/// Parsed `"<relative-source-path> <module-identifier>"` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplDescriptor {
    source_path: String,
    module_name: String,
}

impl ImplDescriptor {
    /// Split at the first space: the path is everything before it, the module
    /// identifier everything after it.
    pub fn parse(descriptor: &str) -> Result<Self, DispatchError> {
        let (source_path, module_name) = descriptor.split_once(' ').ok_or_else(|| {
            DispatchError::InvalidDescriptor(format!(
                "expected '<source-path> <module-name>', got {descriptor:?}"
            ))
        })?;

        check_token("source path", source_path)?;
        check_token("module name", module_name)?;
        if !is_identifier(module_name) {
            return Err(DispatchError::InvalidDescriptor(format!(
                "module name {module_name:?} is not a valid identifier"
            )));
        }

        Ok(Self {
            source_path: source_path.to_string(),
            module_name: module_name.to_string(),
        })
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }
}

impl FromStr for ImplDescriptor {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ImplDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.source_path, self.module_name)
    }
}

fn check_token(what: &str, token: &str) -> Result<(), DispatchError> {
    if token.is_empty() {
        return Err(DispatchError::InvalidDescriptor(format!("{what} is empty")));
    }
    if token.len() > MAX_TOKEN_LEN {
        return Err(DispatchError::InvalidDescriptor(format!(
            "{what} is {} bytes, limit is {MAX_TOKEN_LEN}",
            token.len()
        )));
    }
    if token.contains('\0') {
        return Err(DispatchError::InvalidDescriptor(format!("{what} contains a NUL byte")));
    }
    Ok(())
}

/// Identifier rule used for module and function names: a letter or `_`
/// followed by letters, digits, `_` or `!`.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '!')
}
