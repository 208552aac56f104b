//! Collaborator interfaces invoked by the build loop.
//!
//! Each build phase delegates its actual work to one of these traits. A
//! language front end implements the full set and hands it to the engine at
//! construction; the engine stays generic over the syntax tree type `T`, so
//! substitutability costs neither runtime type inspection nor a fixed tree
//! shape.
//!
//! Collaborators receive the cancellation token of the surrounding write
//! action. They may return [`EngineError::Cancelled`] from a long-running
//! phase; the engine itself only polls the token at phase boundaries.

use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::document::{Diagnostic, Document, ParseResult, ReferenceRecord, SourceText, SymbolTable};
use crate::error::EngineError;
use crate::registry::DocumentRegistry;

/// Produces a syntax tree from text. Invoked at `Changed -> Parsed`.
pub trait Parser<T>: Send + Sync {
    fn parse(
        &self,
        uri: &Url,
        text: &str,
        token: &CancellationToken,
    ) -> Result<ParseResult<T>, EngineError>;
}

/// Registers a document's exported symbols in the front end's global
/// index. Invoked at `Parsed -> IndexedContent`; `remove_content` is called
/// when a document is deleted from the workspace.
pub trait ContentIndexer<T>: Send + Sync {
    fn index_content(
        &self,
        document: &Document<T>,
        token: &CancellationToken,
    ) -> Result<(), EngineError>;

    fn remove_content(&self, uri: &Url);
}

/// Computes the local declarations of a document. Invoked at
/// `IndexedContent -> ComputedScopes`.
pub trait ScopeComputer<T>: Send + Sync {
    fn compute_scopes(
        &self,
        document: &Document<T>,
        token: &CancellationToken,
    ) -> Result<SymbolTable, EngineError>;
}

/// Resolves cross-references against local symbols and the global index.
/// Invoked at `ComputedScopes -> Linked` (skipped when linking is
/// deferred). The registry is available read-only so linkers can inspect
/// other documents' declarations.
pub trait Linker<T>: Send + Sync {
    fn link(
        &self,
        document: &Document<T>,
        registry: &DocumentRegistry<T>,
        token: &CancellationToken,
    ) -> Result<Vec<ReferenceRecord>, EngineError>;
}

/// Records resolved references for reverse lookup. Invoked at
/// `Linked -> IndexedReferences`; `remove_references` is called when a
/// document is deleted.
pub trait ReferenceIndexer<T>: Send + Sync {
    fn index_references(
        &self,
        document: &Document<T>,
        token: &CancellationToken,
    ) -> Result<(), EngineError>;

    fn remove_references(&self, uri: &Url);
}

/// Parameters for one validator invocation: exactly the categories that
/// still need to run for the document's current content version.
#[derive(Debug, Clone)]
pub struct ValidationRun {
    pub categories: BTreeSet<String>,
    pub stop_after_linking_errors: bool,
}

/// Runs category-tagged checks. Invoked at
/// `IndexedReferences -> Validated`. Implementations must only report
/// diagnostics for the categories named in the run; the engine relies on
/// that to keep repeated validation free of duplicates.
pub trait Validator<T>: Send + Sync {
    /// Every category label this validator can run.
    fn categories(&self) -> Vec<String>;

    fn validate(
        &self,
        document: &Document<T>,
        run: &ValidationRun,
        token: &CancellationToken,
    ) -> Result<Vec<Diagnostic>, EngineError>;
}

/// Supplies the current text and version for a URI, from an editor buffer
/// or the file system.
pub trait TextSource: Send + Sync {
    fn fetch(&self, uri: &Url) -> Result<SourceText, EngineError>;
}

/// The full collaborator set for one workspace.
pub struct LanguageServices<T> {
    pub parser: Box<dyn Parser<T>>,
    pub content_indexer: Box<dyn ContentIndexer<T>>,
    pub scope_computer: Box<dyn ScopeComputer<T>>,
    pub linker: Box<dyn Linker<T>>,
    pub reference_indexer: Box<dyn ReferenceIndexer<T>>,
    pub validator: Box<dyn Validator<T>>,
    pub text_source: Box<dyn TextSource>,
}
