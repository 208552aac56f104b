//! Incremental document lifecycle engine.
//!
//! Strata keeps a workspace of interdependent documents analyzed correctly
//! and efficiently as they change. Each document moves through an ordered
//! sequence of analysis states (parse, index, scope, link, index
//! references, validate); when a document changes or disappears, the engine
//! works out which other documents are affected through their recorded
//! cross-references, resets exactly the caches that are now suspect, and
//! rebuilds from there.
//!
//! The engine does none of the language work itself. Parsing, indexing,
//! scoping, linking and validation are collaborator traits (see
//! [`services`]) implemented by a language front end; the engine decides
//! when and in what order they run, and what must be redone after a change.
//!
//! Concurrency follows a single-writer model: whole-workspace rebuilds are
//! write actions serialized by the [`lock::WorkspaceLock`], while queries
//! (hover, completion) are read actions that run batched between writes.
//! Queuing a new write cancels the previous one cooperatively — a rebuild
//! superseded by the next keystroke stops at its next phase boundary.
//!
//! Typical wiring:
//!
//! ```rust,ignore
//! let services = my_front_end.services(Box::new(text_source));
//! let workspace = Workspace::new(services);
//!
//! // Editor events are write actions:
//! workspace.update(vec![changed_uri], vec![]).await?;
//!
//! // Queries are read actions:
//! let names = workspace
//!     .query(ReadPriority::Normal, |registry| collect_names(registry))
//!     .await?;
//! ```

pub mod builder;
pub mod deps;
pub mod document;
pub mod error;
pub mod events;
pub mod lock;
pub mod options;
pub mod registry;
pub mod services;
pub mod state;
pub mod workspace;

#[cfg(any(test, feature = "test-support"))]
pub mod fixture;

#[cfg(test)]
mod tests;

pub use builder::DocumentBuilder;
pub use document::{
    Diagnostic, Document, ParseResult, ReferenceRecord, Resolution, Severity, SourceText, Symbol,
    SymbolTable, SYNTAX_CATEGORY,
};
pub use error::EngineError;
pub use events::BuildEvent;
pub use lock::{checkpoint, ReadPriority, WorkspaceLock};
pub use options::{BuildOptions, ValidationOptions};
pub use registry::DocumentRegistry;
pub use services::{
    ContentIndexer, LanguageServices, Linker, Parser, ReferenceIndexer, ScopeComputer, TextSource,
    ValidationRun, Validator,
};
pub use state::DocumentState;
pub use workspace::Workspace;
