//! Compiler configuration
//!
//! Tunables for code generation. Defaults produce the fastest code; the
//! register budget exists mainly to force the spilling paths, e.g. when
//! testing or when comparing generated code.
//!
//! # Example
//!
//! ```rust
//! use polishc::{CompilerConfig, PolishCompiler};
//!
//! let config = CompilerConfig::new().with_register_budget(2);
//! let compiler = PolishCompiler::with_config(config);
//! # let _ = compiler;
//! ```
//!
//! The same settings can come from a TOML file:
//!
//! ```toml
//! register_budget = 4
//! max_program_len = 100000
//! ```

use crate::codegen::platform::REGISTER_POOL;
use serde::Deserialize;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// How many registers may hold stack values (0 keeps every value in the
    /// stack frame). Values above the register pool size are clamped.
    pub register_budget: usize,

    /// Reject programs with more operations than this.
    pub max_program_len: Option<usize>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            register_budget: REGISTER_POOL.len(),
            max_program_len: None,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_register_budget(mut self, budget: usize) -> Self {
        self.register_budget = budget.min(REGISTER_POOL.len());
        self
    }

    pub fn with_max_program_len(mut self, len: usize) -> Self {
        self.max_program_len = Some(len);
        self
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: CompilerConfig = toml::from_str(source).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&source)
    }

    /// Check values that the builder methods would have clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.register_budget > REGISTER_POOL.len() {
            return Err(ConfigError::Invalid(format!(
                "register_budget {} exceeds the {} available registers",
                self.register_budget,
                REGISTER_POOL.len()
            )));
        }
        if self.max_program_len == Some(0) {
            return Err(ConfigError::Invalid(
                "max_program_len must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read config {}: {}", path, source)
            }
            ConfigError::Parse(e) => write!(f, "invalid config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uses_whole_pool() {
        let config = CompilerConfig::default();
        assert_eq!(config.register_budget, REGISTER_POOL.len());
        assert_eq!(config.max_program_len, None);
    }

    #[test]
    fn test_builder_clamps_budget() {
        let config = CompilerConfig::new().with_register_budget(100);
        assert_eq!(config.register_budget, REGISTER_POOL.len());
    }

    #[test]
    fn test_from_toml() {
        let config = CompilerConfig::from_toml_str("register_budget = 3\n").unwrap();
        assert_eq!(config.register_budget, 3);
        assert_eq!(config.max_program_len, None);

        let config = CompilerConfig::from_toml_str("max_program_len = 10").unwrap();
        assert_eq!(config.register_budget, REGISTER_POOL.len());
        assert_eq!(config.max_program_len, Some(10));
    }

    #[test]
    fn test_from_toml_rejects_bad_values() {
        assert!(matches!(
            CompilerConfig::from_toml_str("register_budget = 14"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            CompilerConfig::from_toml_str("max_program_len = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            CompilerConfig::from_toml_str("registers = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("polish.toml");
        std::fs::write(&path, "register_budget = 0\n").unwrap();
        let config = CompilerConfig::from_file(&path).unwrap();
        assert_eq!(config.register_budget, 0);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            CompilerConfig::from_file(&missing),
            Err(ConfigError::Io { .. })
        ));
    }
}
