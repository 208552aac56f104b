//! Collaborator wrappers for observing or sabotaging individual phases.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::document::{Document, ParseResult, ReferenceRecord, SymbolTable};
use crate::error::EngineError;
use crate::fixture::FixtureTree;
use crate::registry::DocumentRegistry;
use crate::services::{Linker, Parser, ScopeComputer};

pub fn uri(name: &str) -> Url {
    Url::parse(&format!("inmemory:///{}", name)).expect("valid uri")
}

/// Delegates to the fixture parser and records the order of invocations.
pub struct RecordingParser {
    pub inner: Box<dyn Parser<FixtureTree>>,
    pub calls: Arc<Mutex<Vec<Url>>>,
}

impl Parser<FixtureTree> for RecordingParser {
    fn parse(
        &self,
        uri: &Url,
        text: &str,
        token: &CancellationToken,
    ) -> Result<ParseResult<FixtureTree>, EngineError> {
        self.calls.lock().push(uri.clone());
        self.inner.parse(uri, text, token)
    }
}

/// Cancels the given token once the scope phase has run for `remaining`
/// documents, simulating an edit arriving mid-build.
pub struct CancelAfterScopes {
    pub inner: Box<dyn ScopeComputer<FixtureTree>>,
    pub remaining: AtomicUsize,
    pub cancel: CancellationToken,
}

impl ScopeComputer<FixtureTree> for CancelAfterScopes {
    fn compute_scopes(
        &self,
        document: &Document<FixtureTree>,
        token: &CancellationToken,
    ) -> Result<SymbolTable, EngineError> {
        let result = self.inner.compute_scopes(document, token);
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.cancel.cancel();
        }
        result
    }
}

/// Fails the link phase for one document, leaving the rest untouched.
pub struct FailingLinker {
    pub inner: Box<dyn Linker<FixtureTree>>,
    pub fail_for: Url,
}

impl Linker<FixtureTree> for FailingLinker {
    fn link(
        &self,
        document: &Document<FixtureTree>,
        registry: &DocumentRegistry<FixtureTree>,
        token: &CancellationToken,
    ) -> Result<Vec<ReferenceRecord>, EngineError> {
        if document.uri() == &self.fail_for {
            return Err(EngineError::Source {
                uri: self.fail_for.clone(),
                message: "injected linker failure".into(),
            });
        }
        self.inner.link(document, registry, token)
    }
}
