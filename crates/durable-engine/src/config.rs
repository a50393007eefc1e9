//! Engine configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! [compiler]
//! max_instantiation_depth = 32
//!
//! [runtime]
//! max_frames = 1024
//! max_call_depth = 256
//! verify_checksum = true
//! ```
//!
//! Every key is optional and falls back to its default.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compiler::types::Type;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub compiler: CompilerOptions,
    pub runtime: RuntimeOptions,
}

impl EngineConfig {
    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse config from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compiler.max_instantiation_depth == 0 {
            return Err(ConfigError::ValidationError(
                "compiler.max_instantiation_depth must be at least 1".to_string(),
            ));
        }
        if self.runtime.max_frames == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.max_frames must be at least 1".to_string(),
            ));
        }
        if self.runtime.max_call_depth == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.max_call_depth must be at least 1".to_string(),
            ));
        }
        if self.runtime.max_value_depth == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.max_value_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A generic instantiation to compile even if no call site requests it
///
/// Lets a process that only resumes snapshots register keys it never reaches
/// from its own roots.
#[derive(Debug, Clone, PartialEq)]
pub struct InstantiationRequest {
    /// Short name of the generic declaration
    pub function: String,
    pub type_args: Vec<Type>,
}

impl InstantiationRequest {
    pub fn new(function: impl Into<String>, type_args: Vec<Type>) -> Self {
        Self {
            function: function.into(),
            type_args,
        }
    }
}

/// Compiler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Longest chain of generic instantiations requesting further instantiations
    pub max_instantiation_depth: u32,
    /// Extra instantiation roots
    #[serde(skip)]
    pub instantiations: Vec<InstantiationRequest>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            max_instantiation_depth: 32,
            instantiations: Vec::new(),
        }
    }
}

/// Runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Frames a coroutine stack may hold
    pub max_frames: usize,
    /// Nesting of non-suspending calls on the host stack
    pub max_call_depth: usize,
    /// Verify the SHA-256 trailer when unmarshaling
    pub verify_checksum: bool,
    /// Deepest nesting of lists, maps, structs, captures and boxed values a
    /// snapshot may carry. Heap references start a fresh count.
    pub max_value_depth: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_frames: 1024,
            max_call_depth: 256,
            verify_checksum: true,
            max_value_depth: crate::vm::snapshot::DEFAULT_MAX_DEPTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.runtime.max_frames, 1024);
        assert!(config.runtime.verify_checksum);
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_toml_str(
            r#"
            [runtime]
            max_frames = 16
            verify_checksum = false
            "#,
        )
        .unwrap();
        assert_eq!(config.runtime.max_frames, 16);
        assert!(!config.runtime.verify_checksum);
        assert_eq!(config.runtime.max_call_depth, 256);
        assert_eq!(config.runtime.max_value_depth, 512);
        assert_eq!(config.compiler.max_instantiation_depth, 32);
    }

    #[test]
    fn test_rejects_zero_limits() {
        let err = EngineConfig::from_toml_str("[runtime]\nmax_frames = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = EngineConfig::from_toml_str("[runtime]\nmax_value_depth = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(ref msg) if msg.contains("max_value_depth")));
    }

    #[test]
    fn test_parse_error() {
        let err = EngineConfig::from_toml_str("[runtime\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[compiler]\nmax_instantiation_depth = 4").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.compiler.max_instantiation_depth, 4);

        let missing = EngineConfig::from_file(Path::new("/nonexistent/durable.toml"));
        assert!(matches!(missing, Err(ConfigError::IoError(_))));
    }
}
