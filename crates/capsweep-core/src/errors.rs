//! Structured error types shared across capsweep crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Code, message and context carried by every [`CapError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Dotted identifier such as `uq.unsupported_method`.
    pub code: String,
    /// Diagnostic shown to the user.
    pub message: String,
    /// Offending parameter ids, paths and tokens.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Suggested remedy, if one is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Payload with an empty context and no hint.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Records an entry naming the offending entity.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attaches a remedy.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Error families of a sweep, from setup through device stepping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum CapError {
    /// Missing keys, malformed values or paths that do not exist.
    #[error("configuration error: {0}")]
    Config(ErrorInfo),
    /// Unknown distribution, method or host token.
    #[error("unsupported variant: {0}")]
    Unsupported(ErrorInfo),
    /// A recognised capability that is deliberately not implemented.
    #[error("unimplemented capability: {0}")]
    Unimplemented(ErrorInfo),
    /// A single run exited abnormally or produced unparseable output.
    #[error("invocation failure: {0}")]
    Invocation(ErrorInfo),
    /// The execution backend could not enqueue work at all.
    #[error("submission failure: {0}")]
    Submission(ErrorInfo),
    /// Invalid device stepping requests.
    #[error("device error: {0}")]
    Device(ErrorInfo),
    /// Malformed YAML, JSON or CSV.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
    /// Reading or writing files and spawning processes.
    #[error("io error: {0}")]
    Io(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        let mut entries = self.context.iter();
        if let Some((key, value)) = entries.next() {
            write!(f, " ({key}={value}")?;
            for (key, value) in entries {
                write!(f, ", {key}={value}")?;
            }
            f.write_str(")")?;
        }
        match &self.hint {
            Some(hint) => write!(f, "; hint: {hint}"),
            None => Ok(()),
        }
    }
}

impl CapError {
    /// Payload shared by every family.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            CapError::Config(info)
            | CapError::Unsupported(info)
            | CapError::Unimplemented(info)
            | CapError::Invocation(info)
            | CapError::Submission(info)
            | CapError::Device(info)
            | CapError::Serde(info)
            | CapError::Io(info) => info,
        }
    }

    /// Returns true when the error must stop a sweep before any dispatch.
    pub fn is_setup_error(&self) -> bool {
        matches!(self, CapError::Config(_) | CapError::Unsupported(_))
    }

    /// Wraps an I/O error with the path it concerns.
    pub fn io(code: &str, path: impl Display, err: impl ToString) -> Self {
        CapError::Io(ErrorInfo::new(code, err.to_string()).with_context("path", path.to_string()))
    }
}
