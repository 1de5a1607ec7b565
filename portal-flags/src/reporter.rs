//! Error-reporting collaborator for one-shot diagnostics.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::registry::FlagConflict;

/// A non-fatal condition worth surfacing to operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A second owner tried to register an existing flag name.
    FlagConflict(FlagConflict),
    /// A key outside the declared set was accessed in strict mode.
    UnregisteredKey { bucket: String, key: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::FlagConflict(conflict) => write!(
                f,
                "feature flag '{}' registered by '{}' was registered again by '{}'",
                conflict.name, conflict.registered_by, conflict.rejected_from
            ),
            Diagnostic::UnregisteredKey { bucket, key } => {
                write!(f, "access to unregistered key '{key}' in bucket '{bucket}'")
            }
        }
    }
}

/// Receives diagnostics. Implementations must be thread-safe and must not block.
pub trait ErrorReporter: Send + Sync {
    fn post(&self, diagnostic: Diagnostic);
}

/// Reports diagnostics as `tracing` warnings.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn post(&self, diagnostic: Diagnostic) {
        tracing::warn!(diagnostic = %diagnostic, "diagnostic posted");
    }
}

/// Keeps every posted diagnostic in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    posted: Mutex<Vec<Diagnostic>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posted(&self) -> Vec<Diagnostic> {
        self.posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ErrorReporter for RecordingReporter {
    fn post(&self, diagnostic: Diagnostic) {
        self.posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }
}
