use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::dispatch::DEFAULT_MUTATING_SUFFIX;
use crate::error::DispatchError;

/// Environment variable naming a config file for the C entry points.
pub const CONFIG_ENV: &str = "OIF_JULIA_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JuliaConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default, rename = "impl")]
    pub implementation: ImplConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Path or loader name of the shared `libjulia`.
    #[serde(default = "default_library")]
    pub library: String,
    /// Directory holding the `julia` executable, for locating the system image.
    pub bindir: Option<PathBuf>,
    /// System image to boot instead of the default one.
    pub image: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            library: default_library(),
            bindir: None,
            image: None,
        }
    }
}

fn default_library() -> String {
    if cfg!(target_os = "macos") {
        "libjulia.dylib".into()
    } else if cfg!(windows) {
        "libjulia.dll".into()
    } else {
        "libjulia.so".into()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImplConfig {
    /// Directory that descriptor source paths are relative to.
    #[serde(default = "default_impl_root")]
    pub root: PathBuf,
}

impl Default for ImplConfig {
    fn default() -> Self {
        Self {
            root: default_impl_root(),
        }
    }
}

fn default_impl_root() -> PathBuf {
    PathBuf::from("oif_impl/impl")
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_mutating_suffix")]
    pub mutating_suffix: char,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mutating_suffix: default_mutating_suffix(),
        }
    }
}

fn default_mutating_suffix() -> char {
    DEFAULT_MUTATING_SUFFIX
}

impl JuliaConfig {
    pub fn from_file(path: &Path) -> Result<Self, DispatchError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| DispatchError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, DispatchError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DispatchError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `OIF_JULIA_LIBRARY`, `OIF_JULIA_BINDIR` and `OIF_IMPL_ROOT`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(library) = std::env::var("OIF_JULIA_LIBRARY") {
            self.runtime.library = library;
        }
        if let Ok(bindir) = std::env::var("OIF_JULIA_BINDIR") {
            self.runtime.bindir = Some(bindir.into());
        }
        if let Ok(root) = std::env::var("OIF_IMPL_ROOT") {
            self.implementation.root = root.into();
        }
        self
    }

    /// `<config dir>/oif/julia.toml`, when the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("oif").join("julia.toml"))
    }

    /// Config for a process that has no command line: the file named by
    /// `OIF_JULIA_CONFIG`, else the default path if it exists, else defaults.
    /// Environment overrides apply on top in every case.
    pub fn discover() -> Result<Self, DispatchError> {
        let base = if let Ok(path) = std::env::var(CONFIG_ENV) {
            Self::from_file(Path::new(&path))?
        } else {
            match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            }
        };
        Ok(base.with_env_overrides())
    }

    fn validate(&self) -> Result<(), DispatchError> {
        let suffix = self.dispatch.mutating_suffix;
        if suffix.is_whitespace() || suffix.is_alphanumeric() {
            return Err(DispatchError::Config(format!(
                "mutating_suffix {suffix:?} would be indistinguishable from the method name"
            )));
        }
        if self.runtime.library.is_empty() {
            return Err(DispatchError::Config("runtime.library is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = JuliaConfig::from_toml_str("").unwrap();
        assert_eq!(config.implementation.root, PathBuf::from("oif_impl/impl"));
        assert_eq!(config.dispatch.mutating_suffix, '!');
        assert!(config.runtime.library.starts_with("libjulia"));
        assert!(config.runtime.bindir.is_none());
    }

    #[test]
    fn parses_full_config() {
        let toml_str = r#"
[runtime]
library = "/opt/julia/lib/libjulia.so.1"
bindir = "/opt/julia/bin"
image = "/opt/julia/lib/julia/sys.so"

[impl]
root = "/srv/oif/impl"

[dispatch]
mutating_suffix = "_"
"#;
        let config = JuliaConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.runtime.library, "/opt/julia/lib/libjulia.so.1");
        assert_eq!(config.runtime.bindir, Some(PathBuf::from("/opt/julia/bin")));
        assert_eq!(config.runtime.image, Some(PathBuf::from("/opt/julia/lib/julia/sys.so")));
        assert_eq!(config.implementation.root, PathBuf::from("/srv/oif/impl"));
        assert_eq!(config.dispatch.mutating_suffix, '_');
    }

    #[test]
    fn rejects_alphanumeric_suffix() {
        let err = JuliaConfig::from_toml_str("[dispatch]\nmutating_suffix = \"x\"\n").unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            JuliaConfig::from_toml_str("[runtime\nlibrary = 3"),
            Err(DispatchError::Config(_))
        ));
    }

    #[test]
    fn reads_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[impl]\nroot = \"impls\"").unwrap();

        let config = JuliaConfig::from_file(file.path()).unwrap();
        assert_eq!(config.implementation.root, PathBuf::from("impls"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = JuliaConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, DispatchError::Io(_)));
    }

    #[test]
    fn env_overrides_file_values() {
        // SAFETY: no other test in this crate reads these variables.
        unsafe {
            std::env::set_var("OIF_JULIA_LIBRARY", "/custom/libjulia.so");
            std::env::set_var("OIF_IMPL_ROOT", "/custom/impl");
        }
        let config = JuliaConfig::from_toml_str("[impl]\nroot = \"from-file\"")
            .unwrap()
            .with_env_overrides();
        unsafe {
            std::env::remove_var("OIF_JULIA_LIBRARY");
            std::env::remove_var("OIF_IMPL_ROOT");
        }

        assert_eq!(config.runtime.library, "/custom/libjulia.so");
        assert_eq!(config.implementation.root, PathBuf::from("/custom/impl"));
    }
}
