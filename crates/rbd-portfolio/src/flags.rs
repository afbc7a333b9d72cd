//! Flag records.
//!
//! Every non-fatal condition in the pipeline surfaces as a `Flag` carried in
//! the tick diagnostics: `{code, level, message, observed}`.  Flags never
//! abort a tick by themselves; a small whitelist of codes (checked by the
//! engine) escalates to a blocking plan status.

use serde::{Deserialize, Serialize};

/// Severity of a flag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagLevel {
    Info,
    Warn,
    Error,
}

/// A structured diagnostic emitted by any pipeline stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    pub code: String,
    pub level: FlagLevel,
    pub message: String,
    /// Observed value(s) backing the flag, when useful to an operator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<String>,
}

impl Flag {
    pub fn info(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_level(FlagLevel::Info, code, message)
    }

    pub fn warn(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_level(FlagLevel::Warn, code, message)
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_level(FlagLevel::Error, code, message)
    }

    fn with_level(level: FlagLevel, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            level,
            message: message.into(),
            observed: None,
        }
    }

    /// Attach an observed-value string.
    pub fn observed(mut self, observed: impl Into<String>) -> Self {
        self.observed = Some(observed.into());
        self
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}: {}", self.level, self.code, self.message)?;
        if let Some(obs) = &self.observed {
            write!(f, " (observed: {obs})")?;
        }
        Ok(())
    }
}
