//! The lifecycle orchestrator.
//!
//! `build` drives documents through the phase sequence one state at a time;
//! `update` performs dependency-aware invalidation and then rebuilds what
//! the invalidation touched. Both must run inside a workspace write action
//! (see [`Workspace`](crate::workspace::Workspace)); nothing here takes its
//! own lock on the scheduling level, only on the registry storage.
//!
//! Cancellation is cooperative: the token is polled at every phase
//! boundary, and a cancelled pass leaves each document at the state it last
//! fully completed, which is a valid starting point for the next pass.

use std::collections::{BTreeSet, HashSet};

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::deps;
use crate::document::{Diagnostic, Document, ParseResult, ReferenceRecord, SymbolTable};
use crate::error::EngineError;
use crate::events::BuildEvent;
use crate::lock::checkpoint;
use crate::options::BuildOptions;
use crate::registry::DocumentRegistry;
use crate::services::{LanguageServices, ValidationRun};
use crate::state::DocumentState;

const EVENT_CHANNEL_CAPACITY: usize = 128;

struct StateWaiter {
    state: DocumentState,
    uri: Option<Url>,
    sender: oneshot::Sender<Result<(), EngineError>>,
}

/// What one phase produced for one document, applied after the collaborator
/// call so the registry borrow stays immutable while collaborators look at
/// other documents.
enum PhaseOutput<T> {
    Parsed(ParseResult<T>),
    Indexed,
    Scopes(SymbolTable),
    Links(Vec<ReferenceRecord>),
    Validation {
        diagnostics: Vec<Diagnostic>,
        categories: BTreeSet<String>,
    },
}

pub struct DocumentBuilder<T> {
    registry: RwLock<DocumentRegistry<T>>,
    services: LanguageServices<T>,
    /// Options applied to documents picked up by `update` that carry no
    /// previously recorded options. Updates come from editors, so the
    /// default asks for full validation.
    update_build_options: BuildOptions,
    events: broadcast::Sender<BuildEvent>,
    waiters: Mutex<Vec<StateWaiter>>,
}

impl<T> DocumentBuilder<T> {
    pub fn new(services: LanguageServices<T>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry: RwLock::new(DocumentRegistry::new()),
            services,
            update_build_options: BuildOptions::validate_all(),
            events,
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Replace the options applied to documents swept up by `update`.
    pub fn with_update_options(mut self, options: BuildOptions) -> Self {
        self.update_build_options = options;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.events.subscribe()
    }

    /// Run a closure against the registry. This is the read surface; pair
    /// it with [`WorkspaceLock::read`](crate::lock::WorkspaceLock::read) to
    /// stay ordered against writes.
    pub async fn inspect<R>(&self, f: impl FnOnce(&DocumentRegistry<T>) -> R) -> R {
        let registry = self.registry.read().await;
        f(&registry)
    }

    /// Execute all necessary build phases for the given documents. Unknown
    /// URIs are fetched from the text source and enter the workspace as new
    /// documents. Must be called inside a write action.
    pub async fn build(
        &self,
        uris: &[Url],
        options: BuildOptions,
        token: &CancellationToken,
    ) -> Result<(), EngineError> {
        {
            let mut registry = self.registry.write().await;
            for uri in uris {
                self.ensure_document(&mut registry, uri)?;
                if let Some(doc) = registry.get_mut(uri) {
                    let merged = match doc.pending_build() {
                        Some(previous) => previous.merged_with(&options),
                        None => options.clone(),
                    };
                    doc.set_pending_build(merged);
                }
            }
        }
        self.build_documents(uris, token).await
    }

    /// Invalidate after workspace changes and rebuild what was affected.
    /// Must be called inside a write action.
    pub async fn update(
        &self,
        changed: &[Url],
        deleted: &[Url],
        token: &CancellationToken,
    ) -> Result<(), EngineError> {
        let rebuild: Vec<Url> = {
            let mut registry = self.registry.write().await;

            // Snapshot the affected set from the reference records as they
            // were before any reset: every document that linked into the
            // change set, plus documents whose previous linking attempt
            // failed (the change may have made those references
            // resolvable).
            let mut change_set: HashSet<Url> = changed.iter().cloned().collect();
            change_set.extend(deleted.iter().cloned());
            let mut affected = deps::dependents_of(&registry, &change_set);
            for uri in deps::documents_with_link_errors(&registry) {
                if !change_set.contains(&uri) && !affected.contains(&uri) {
                    affected.push(uri);
                }
            }

            for uri in deleted {
                if registry.remove(uri).is_some() {
                    tracing::debug!(%uri, "document removed from workspace");
                }
                self.services.content_indexer.remove_content(uri);
                self.services.reference_indexer.remove_references(uri);
                self.cancel_waiters_for(uri);
            }

            for uri in changed {
                if let Some(doc) = registry.get_mut(uri) {
                    let source = self.services.text_source.fetch(uri)?;
                    if source.version > doc.version() {
                        tracing::debug!(%uri, version = source.version, "document invalidated");
                        doc.refresh(source);
                    } else {
                        tracing::trace!(%uri, version = source.version, "update is not newer, keeping document");
                    }
                } else {
                    self.ensure_document(&mut registry, uri)?;
                }
            }

            // Dependents keep their local declarations; only their link
            // results are suspect.
            for uri in &affected {
                if let Some(doc) = registry.get_mut(uri) {
                    doc.reset_to(DocumentState::ComputedScopes);
                }
            }

            let _ = self.events.send(BuildEvent::UpdateScheduled {
                changed: changed.to_vec(),
                deleted: deleted.to_vec(),
            });

            // Rebuild everything below Linked (changed documents and reset
            // dependents) plus documents whose previous build pass was
            // cancelled. Open documents go first to keep interactive
            // editing responsive; ties are arbitrary.
            let mut list: Vec<Url> = registry
                .documents()
                .filter(|doc| {
                    doc.state() < DocumentState::Linked || doc.pending_build().is_some()
                })
                .map(|doc| doc.uri().clone())
                .collect();
            list.sort_by_key(|uri| registry.get(uri).map_or(true, |doc| !doc.is_open()));
            for uri in &list {
                if let Some(doc) = registry.get_mut(uri) {
                    let merged = match doc.pending_build() {
                        Some(previous) => previous.merged_with(&self.update_build_options),
                        None => self.update_build_options.clone(),
                    };
                    doc.set_pending_build(merged);
                }
            }
            list
        };

        // Interruption is only allowed once every state change is in place.
        checkpoint(token).await?;
        self.build_documents(&rebuild, token).await
    }

    /// Resolves once the named document (or any document, if none is given)
    /// reaches at least the given state, including states reached before
    /// this call. Resolves with [`EngineError::Cancelled`] if the awaited
    /// document is deleted from the workspace.
    pub async fn wait_until(
        &self,
        state: DocumentState,
        uri: Option<&Url>,
    ) -> Result<(), EngineError> {
        {
            let registry = self.registry.read().await;
            let reached = match uri {
                Some(uri) => registry.get(uri).map_or(false, |doc| doc.state() >= state),
                None => registry.documents().any(|doc| doc.state() >= state),
            };
            if reached {
                return Ok(());
            }
        }
        let (sender, receiver) = oneshot::channel();
        self.waiters.lock().push(StateWaiter {
            state,
            uri: uri.cloned(),
            sender,
        });
        receiver.await.unwrap_or(Err(EngineError::Shutdown))
    }

    /// Force a document back to an earlier state, e.g. after a
    /// configuration change that affects later phases. Must be called
    /// inside a write action.
    pub async fn reset_to_state(
        &self,
        uri: &Url,
        state: DocumentState,
    ) -> Result<(), EngineError> {
        let mut registry = self.registry.write().await;
        let doc = registry
            .get_mut(uri)
            .ok_or_else(|| EngineError::DocumentNotFound(uri.clone()))?;
        doc.reset_to(state);
        Ok(())
    }

    /// Record whether an editor has the document open. Creates the document
    /// if the URI is unknown. Must be called inside a write action.
    pub async fn mark_opened(&self, uri: &Url, open: bool) -> Result<(), EngineError> {
        let mut registry = self.registry.write().await;
        self.ensure_document(&mut registry, uri)?;
        if let Some(doc) = registry.get_mut(uri) {
            doc.set_open(open);
        }
        Ok(())
    }

    fn ensure_document(
        &self,
        registry: &mut DocumentRegistry<T>,
        uri: &Url,
    ) -> Result<(), EngineError> {
        if !registry.contains(uri) {
            let source = self.services.text_source.fetch(uri)?;
            tracing::debug!(%uri, version = source.version, "document added to workspace");
            registry.insert(Document::new(uri.clone(), source.text, source.version));
        }
        Ok(())
    }

    /// The phase loop. Each phase runs for every listed document sitting
    /// exactly one state below it, then the token is polled at the phase
    /// boundary. Documents already at or past their target are skipped
    /// entirely.
    async fn build_documents(
        &self,
        uris: &[Url],
        token: &CancellationToken,
    ) -> Result<(), EngineError> {
        if uris.is_empty() {
            return Ok(());
        }
        for phase in DocumentState::PHASES {
            checkpoint(token).await?;
            let progressed = {
                let mut registry = self.registry.write().await;
                self.run_phase(&mut registry, uris, phase, token)?
            };
            if !progressed.is_empty() {
                tracing::debug!(phase = %phase, documents = progressed.len(), "phase completed");
                let _ = self.events.send(BuildEvent::PhaseCompleted {
                    phase,
                    documents: progressed.clone(),
                });
                self.wake_waiters(phase, &progressed);
            }
        }
        let mut registry = self.registry.write().await;
        for uri in uris {
            if let Some(doc) = registry.get_mut(uri) {
                doc.clear_pending_build();
            }
        }
        Ok(())
    }

    fn run_phase(
        &self,
        registry: &mut DocumentRegistry<T>,
        uris: &[Url],
        phase: DocumentState,
        token: &CancellationToken,
    ) -> Result<Vec<Url>, EngineError> {
        let mut progressed = Vec::new();
        for uri in uris {
            let Some(doc) = registry.get(uri) else {
                continue;
            };
            if doc.state().next() != Some(phase) {
                continue;
            }
            let options = doc.pending_build().cloned().unwrap_or_default();
            if options.target_state() < phase {
                continue;
            }
            let output = match phase {
                DocumentState::Parsed => {
                    let parse = self
                        .services
                        .parser
                        .parse(uri, doc.content(), token)
                        .map_err(|err| phase_error(phase, uri, err))?;
                    PhaseOutput::Parsed(parse)
                }
                DocumentState::IndexedContent => {
                    self.services
                        .content_indexer
                        .index_content(doc, token)
                        .map_err(|err| phase_error(phase, uri, err))?;
                    PhaseOutput::Indexed
                }
                DocumentState::ComputedScopes => {
                    let symbols = self
                        .services
                        .scope_computer
                        .compute_scopes(doc, token)
                        .map_err(|err| phase_error(phase, uri, err))?;
                    PhaseOutput::Scopes(symbols)
                }
                DocumentState::Linked => {
                    if options.eager_linking {
                        let records = self
                            .services
                            .linker
                            .link(doc, &*registry, token)
                            .map_err(|err| phase_error(phase, uri, err))?;
                        PhaseOutput::Links(records)
                    } else {
                        // Deferred linking: mark Linked without eager
                        // resolution; queries resolve on demand.
                        PhaseOutput::Links(Vec::new())
                    }
                }
                DocumentState::IndexedReferences => {
                    self.services
                        .reference_indexer
                        .index_references(doc, token)
                        .map_err(|err| phase_error(phase, uri, err))?;
                    PhaseOutput::Indexed
                }
                DocumentState::Validated => {
                    let Some(validation) = options.validation.as_ref() else {
                        continue;
                    };
                    let requested: BTreeSet<String> = match &validation.categories {
                        Some(categories) => categories.clone(),
                        None => self.services.validator.categories().into_iter().collect(),
                    };
                    let to_run: BTreeSet<String> = requested
                        .difference(doc.executed_validation_categories())
                        .cloned()
                        .collect();
                    let diagnostics = if to_run.is_empty() {
                        Vec::new()
                    } else {
                        let run = ValidationRun {
                            categories: to_run.clone(),
                            stop_after_linking_errors: validation.stop_after_linking_errors,
                        };
                        self.services
                            .validator
                            .validate(doc, &run, token)
                            .map_err(|err| phase_error(phase, uri, err))?
                    };
                    PhaseOutput::Validation {
                        diagnostics,
                        categories: to_run,
                    }
                }
                DocumentState::Changed => continue,
            };
            let Some(doc) = registry.get_mut(uri) else {
                continue;
            };
            match output {
                PhaseOutput::Parsed(parse) => doc.set_parse(parse),
                PhaseOutput::Indexed => {}
                PhaseOutput::Scopes(symbols) => doc.set_local_symbols(symbols),
                PhaseOutput::Links(records) => doc.set_outgoing_references(records),
                PhaseOutput::Validation {
                    diagnostics,
                    categories,
                } => doc.record_validation(diagnostics, categories),
            }
            doc.advance_to(phase);
            tracing::trace!(%uri, state = %phase, "document advanced");
            progressed.push(uri.clone());
        }
        Ok(progressed)
    }

    fn wake_waiters(&self, phase: DocumentState, progressed: &[Url]) {
        let mut waiters = self.waiters.lock();
        if waiters.is_empty() {
            return;
        }
        let mut remaining = Vec::with_capacity(waiters.len());
        for waiter in waiters.drain(..) {
            let satisfied = waiter.state <= phase
                && match &waiter.uri {
                    Some(uri) => progressed.contains(uri),
                    None => true,
                };
            if satisfied {
                let _ = waiter.sender.send(Ok(()));
            } else {
                remaining.push(waiter);
            }
        }
        *waiters = remaining;
    }

    fn cancel_waiters_for(&self, uri: &Url) {
        let mut waiters = self.waiters.lock();
        let mut remaining = Vec::with_capacity(waiters.len());
        for waiter in waiters.drain(..) {
            if waiter.uri.as_ref() == Some(uri) {
                let _ = waiter.sender.send(Err(EngineError::Cancelled));
            } else {
                remaining.push(waiter);
            }
        }
        *waiters = remaining;
    }
}

fn phase_error(phase: DocumentState, uri: &Url, err: EngineError) -> EngineError {
    match err {
        EngineError::Cancelled | EngineError::Phase { .. } => err,
        other => EngineError::Phase {
            phase,
            uri: uri.clone(),
            message: other.to_string(),
        },
    }
}
