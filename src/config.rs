use std::path::Path;
use std::str::FromStr;

use target_lexicon::Triple;

use serde::{Deserialize, Serialize};

use crate::diagnostics::CompileError;

/// Cranelift optimization level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    #[default]
    None,
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    pub fn as_setting(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

/// Backend configuration, usually read from a `gocrane.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Define package functions sorted by name instead of program order.
    pub ordered_compilation: bool,
    /// `"host"` or a target triple understood by Cranelift.
    pub target: String,
    pub opt_level: OptLevel,
    /// Attach source locations and record local variable declarations.
    pub generate_debug: bool,
    /// Emit bounds, nil and division checks that raise recoverable panics.
    pub runtime_checks: bool,
    /// Package path that owns universe-scoped methods such as `error.Error`.
    pub runtime_package: String,
    /// Keep a copy of every defined function's IR in the output.
    pub retain_ir: bool,
    /// Worker threads used by `compile_program`.
    pub jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ordered_compilation: false,
            target: "host".to_string(),
            opt_level: OptLevel::None,
            generate_debug: false,
            runtime_checks: true,
            runtime_package: "runtime".to_string(),
            retain_ir: false,
            jobs: 1,
        }
    }
}

impl Config {
    pub fn from_toml_str(source: &str) -> Result<Self, CompileError> {
        let config: Config = toml::from_str(source)
            .map_err(|e| CompileError::config(format!("invalid configuration: {e}"), None))?;
        config.validate(None)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CompileError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CompileError::config(format!("cannot read config: {e}"), Some(path.to_path_buf()))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            CompileError::config(format!("invalid configuration: {e}"), Some(path.to_path_buf()))
        })?;
        config.validate(Some(path))?;
        Ok(config)
    }

    /// The target triple; `None` for the host.
    pub fn triple(&self) -> Result<Option<Triple>, String> {
        if self.target == "host" {
            return Ok(None);
        }
        Triple::from_str(&self.target).map(Some).map_err(|e| e.to_string())
    }

    pub(crate) fn validate(&self, path: Option<&Path>) -> Result<(), CompileError> {
        let path = path.map(Path::to_path_buf);
        if self.jobs == 0 {
            return Err(CompileError::config("jobs must be at least 1", path));
        }
        if self.target.trim().is_empty() {
            return Err(CompileError::config("target must not be empty", path));
        }
        if let Err(e) = self.triple() {
            return Err(CompileError::config(format!("invalid target {}: {e}", self.target), path));
        }
        if self.runtime_package.is_empty() {
            return Err(CompileError::config("runtime-package must not be empty", path));
        }
        Ok(())
    }
}
