//! Compiler session state and options for TGC.
//!
//! This crate provides the session the driver threads through every
//! compilation: the options that steer shape resolution, and the operator
//! [`Context`] shared by every program compiled in the session.
//!
//! # Configuration
//!
//! Options are plain serde types and can be read from TOML:
//!
//! ```toml
//! alias_policy = "copy"
//! validate_outputs = true
//! dump_shapes = false
//! ```
//!
//! Missing keys take their defaults; unknown keys are rejected.

#![warn(missing_docs)]

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tgc_ops::Context;

/// What the compiler does when a reshape cannot alias its input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasPolicy {
    /// Report the aliasing failure as a compile error.
    #[default]
    Reject,
    /// Insert a `contiguous` copy in front of the reshape and retry.
    Copy,
}

/// Compiler options that can be set programmatically or from a config file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    /// Handling of reshapes whose input layout cannot be aliased.
    pub alias_policy: AliasPolicy,
    /// Check every run-time result against its compiled shape.
    pub validate_outputs: bool,
    /// Log each instruction's resolved shape at `info` level.
    pub dump_shapes: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            alias_policy: AliasPolicy::Reject,
            validate_outputs: true,
            dump_shapes: false,
        }
    }
}

impl Options {
    /// Parses options from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] if the text is not valid TOML
    /// or names an unknown option.
    pub fn from_toml_str(text: &str) -> Result<Self, SessionError> {
        toml::from_str(text).map_err(|e| SessionError::InvalidConfig(e.to_string()))
    }

    /// Reads options from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConfigNotFound`] if `path` does not exist, an
    /// IO error if it cannot be read, or [`SessionError::InvalidConfig`].
    pub fn load(path: &Utf8Path) -> Result<Self, SessionError> {
        if !path.exists() {
            return Err(SessionError::ConfigNotFound(path.to_owned()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Renders the options as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, SessionError> {
        toml::to_string(self).map_err(|e| SessionError::InvalidConfig(e.to_string()))
    }
}

/// Errors that can occur during session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Configuration file not found.
    #[error("configuration file not found: {0}")]
    ConfigNotFound(camino::Utf8PathBuf),
    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The compiler session holds all state shared across compilations.
#[derive(Debug, Default)]
pub struct Session {
    /// Compiler options.
    pub options: Options,
    context: Context,
}

impl Session {
    /// Create a new session with the given options.
    #[must_use]
    pub fn new(options: Options) -> Self {
        Self {
            options,
            context: Context::new(),
        }
    }

    /// Create a new session with default options.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(Options::default())
    }

    /// Create a session from a TOML config file.
    ///
    /// # Errors
    ///
    /// See [`Options::load`].
    pub fn from_config(path: &Utf8Path) -> Result<Self, SessionError> {
        Ok(Self::new(Options::load(path)?))
    }

    /// The operator context shared by every program in this session.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The configured aliasing policy.
    #[must_use]
    pub fn alias_policy(&self) -> AliasPolicy {
        self.options.alias_policy
    }
}

/// A shared, thread-safe reference to a session.
pub type SessionRef = Arc<Session>;

/// Create a shared session reference.
#[must_use]
pub fn create_session(options: Options) -> SessionRef {
    Arc::new(Session::new(options))
}
