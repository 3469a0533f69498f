//! Compiler configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// JIT compilation mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitMode {
    /// JIT disabled, interpreter only
    Off,
    /// JIT required; fail if the platform cannot run generated code
    On,
    /// Automatic: JIT enabled if supported on this platform
    #[default]
    Auto,
}

/// Output format of the disassembly dump
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisasmFormat {
    #[default]
    Text,
    /// One JSON object per instruction
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Settings for the JIT and its diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JitConfig {
    pub jit_mode: JitMode,
    /// Size of the executable code buffer in bytes
    pub code_buffer_size: usize,
    /// Disassemble every placed range to stderr
    pub dump_disasm: bool,
    pub disasm_format: DisasmFormat,
    /// Emit `[JIT]` debug events
    pub trace_jit: bool,
    /// Longest chain of callees compiled from one compile request
    pub max_compile_depth: usize,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            jit_mode: JitMode::Auto,
            code_buffer_size: 1024 * 1024,
            dump_disasm: false,
            disasm_format: DisasmFormat::Text,
            trace_jit: false,
            max_compile_depth: 64,
        }
    }
}

impl JitConfig {
    /// Load a config file; keys that are absent keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: JitConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.code_buffer_size == 0 {
            return Err(ConfigError::Invalid("code_buffer_size must be positive".to_string()));
        }
        if self.max_compile_depth == 0 {
            return Err(ConfigError::Invalid("max_compile_depth must be positive".to_string()));
        }
        Ok(())
    }
}
