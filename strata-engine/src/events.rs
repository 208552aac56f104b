//! Build lifecycle notifications.

use url::Url;

use crate::state::DocumentState;

/// Broadcast by the builder so front ends can react to workspace progress
/// (publish diagnostics, refresh UI state). Subscribers are notified, never
/// awaited: a slow subscriber cannot extend a build pass, and a lagged one
/// misses events instead of blocking the builder.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    /// An update was accepted and the affected documents were invalidated,
    /// before any rebuild work started.
    UpdateScheduled { changed: Vec<Url>, deleted: Vec<Url> },
    /// A build phase finished for the listed documents.
    PhaseCompleted {
        phase: DocumentState,
        documents: Vec<Url>,
    },
}
