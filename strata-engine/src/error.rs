//! Engine error types.

use std::fmt;

use url::Url;

use crate::state::DocumentState;

/// Errors surfaced by the engine's entry points.
///
/// Cancellation is part of the normal control flow: builds triggered by
/// rapid edits are expected to be superseded, so [`EngineError::Cancelled`]
/// is produced and consumed routinely and is never logged as a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The operation observed its cancellation token and stopped at the
    /// last completed phase.
    Cancelled,
    /// A URI was addressed that is not present in the registry.
    DocumentNotFound(Url),
    /// The text source could not supply content for a URI.
    Source { uri: Url, message: String },
    /// A collaborator failed while executing a build phase.
    Phase {
        phase: DocumentState,
        uri: Url,
        message: String,
    },
    /// The scheduler dropped a queued action before it reported a result
    /// (only possible during runtime teardown).
    Shutdown,
}

impl EngineError {
    /// Whether this is the quiet cancellation signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Cancelled => write!(f, "operation cancelled"),
            EngineError::DocumentNotFound(uri) => {
                write!(f, "no document in the workspace for {}", uri)
            }
            EngineError::Source { uri, message } => {
                write!(f, "failed to read {}: {}", uri, message)
            }
            EngineError::Phase {
                phase,
                uri,
                message,
            } => {
                write!(f, "{} phase failed for {}: {}", phase, uri, message)
            }
            EngineError::Shutdown => {
                write!(f, "workspace scheduler shut down before the action completed")
            }
        }
    }
}

impl std::error::Error for EngineError {}
