use std::path::PathBuf;
use thiserror::Error;

/// Every failure of the backend. All variants are fatal: the translation of the
/// whole program is abandoned and no partial object is produced.
#[derive(Debug, Error)]
pub enum CompileError {
    /// An SSA construct with no lowering rule.
    #[error("unsupported {construct} at {location}")]
    Unsupported { construct: String, location: String },

    /// The input or the lowering broke an ordering/dominance invariant.
    #[error("internal error: {msg} at {location}")]
    Internal { msg: String, location: String },

    /// A construct the backend recognizes but deliberately refuses.
    #[error("not implemented: {feature} at {location}")]
    NotImplemented { feature: String, location: String },

    #[error("Codegen error: {msg}")]
    Codegen { msg: String },

    #[error("Config error: {msg}")]
    Config { msg: String, path: Option<PathBuf> },

    #[error("Input error: {msg}")]
    Input { msg: String },
}

impl CompileError {
    pub fn unsupported(construct: impl Into<String>, location: impl Into<String>) -> Self {
        Self::Unsupported { construct: construct.into(), location: location.into() }
    }

    pub fn internal(msg: impl Into<String>, location: impl Into<String>) -> Self {
        Self::Internal { msg: msg.into(), location: location.into() }
    }

    pub fn not_implemented(feature: impl Into<String>, location: impl Into<String>) -> Self {
        Self::NotImplemented { feature: feature.into(), location: location.into() }
    }

    pub fn codegen(msg: impl Into<String>) -> Self {
        Self::Codegen { msg: msg.into() }
    }

    pub fn config(msg: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::Config { msg: msg.into(), path }
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input { msg: msg.into() }
    }

    /// True for errors that come from a broken ordering or dominance invariant
    /// rather than from an unsupported input construct.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Render a CompileError for terminal output.
pub fn render_error(err: &CompileError) -> String {
    match err {
        CompileError::Unsupported { construct, location } => {
            format!("error[unsupported]: {construct}\n  --> {location}")
        }
        CompileError::Internal { msg, location } => {
            format!("error[internal]: {msg}\n  --> {location}")
        }
        CompileError::NotImplemented { feature, location } => {
            format!("error[not-implemented]: {feature}\n  --> {location}")
        }
        CompileError::Codegen { msg } => format!("error: {msg}"),
        CompileError::Config { msg, path: Some(path) } => {
            format!("error[config]: {msg}\n  --> {}", path.display())
        }
        CompileError::Config { msg, path: None } => format!("error[config]: {msg}"),
        CompileError::Input { msg } => format!("error[input]: {msg}"),
    }
}
