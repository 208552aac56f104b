//! Document lifecycle states.

use std::fmt;

/// The ordered analysis states a document moves through.
///
/// A document advances one state at a time, driven by the build loop in
/// [`DocumentBuilder`](crate::builder::DocumentBuilder). It can be moved
/// backward to an arbitrary earlier state by invalidation, which discards
/// every cache belonging to the states above the target. There is no
/// transition that skips a state forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocumentState {
    /// The text content has changed (or the document is brand new) and must
    /// be parsed before anything else can happen.
    Changed = 0,
    /// A syntax tree exists for the current content.
    Parsed = 1,
    /// The document's exported symbols are registered in the global index
    /// and can be resolved from other documents.
    IndexedContent = 2,
    /// The document's locally declared symbols are available.
    ComputedScopes = 3,
    /// All outgoing references have been resolved or marked as erroneous.
    Linked = 4,
    /// Resolved references are recorded for reverse lookup, so changes in
    /// other documents can be traced back to this one.
    IndexedReferences = 5,
    /// Validation has run; diagnostics are available. Terminal for the
    /// current content version.
    Validated = 6,
}

impl DocumentState {
    /// The build phases, i.e. every state a document can be advanced *to*,
    /// in execution order.
    pub const PHASES: [DocumentState; 6] = [
        DocumentState::Parsed,
        DocumentState::IndexedContent,
        DocumentState::ComputedScopes,
        DocumentState::Linked,
        DocumentState::IndexedReferences,
        DocumentState::Validated,
    ];

    /// The state following this one, or `None` for [`DocumentState::Validated`].
    pub fn next(self) -> Option<DocumentState> {
        match self {
            DocumentState::Changed => Some(DocumentState::Parsed),
            DocumentState::Parsed => Some(DocumentState::IndexedContent),
            DocumentState::IndexedContent => Some(DocumentState::ComputedScopes),
            DocumentState::ComputedScopes => Some(DocumentState::Linked),
            DocumentState::Linked => Some(DocumentState::IndexedReferences),
            DocumentState::IndexedReferences => Some(DocumentState::Validated),
            DocumentState::Validated => None,
        }
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentState::Changed => "changed",
            DocumentState::Parsed => "parsed",
            DocumentState::IndexedContent => "indexed-content",
            DocumentState::ComputedScopes => "computed-scopes",
            DocumentState::Linked => "linked",
            DocumentState::IndexedReferences => "indexed-references",
            DocumentState::Validated => "validated",
        };
        write!(f, "{}", name)
    }
}
