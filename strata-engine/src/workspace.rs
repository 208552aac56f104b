//! The workspace facade: one builder behind one lock.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use url::Url;

use crate::builder::DocumentBuilder;
use crate::error::EngineError;
use crate::events::BuildEvent;
use crate::lock::{ReadPriority, WorkspaceLock};
use crate::options::BuildOptions;
use crate::registry::DocumentRegistry;
use crate::services::LanguageServices;

/// Couples a [`DocumentBuilder`] with a [`WorkspaceLock`] so front ends
/// enqueue builds and queries without handling the lock discipline
/// themselves: every mutating entry point goes through the write slot,
/// every query through the read slot.
///
/// The futures returned by [`build`](Workspace::build) and
/// [`update`](Workspace::update) settle when the queued action completes;
/// dropping them does not cancel the action, so fire-and-forget callers
/// (editor notification handlers) can spawn and move on.
pub struct Workspace<T> {
    lock: WorkspaceLock,
    builder: Arc<DocumentBuilder<T>>,
}

impl<T> Workspace<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(services: LanguageServices<T>) -> Self {
        Self {
            lock: WorkspaceLock::new(),
            builder: Arc::new(DocumentBuilder::new(services)),
        }
    }

    pub fn with_builder(builder: DocumentBuilder<T>) -> Self {
        Self {
            lock: WorkspaceLock::new(),
            builder: Arc::new(builder),
        }
    }

    pub fn builder(&self) -> &Arc<DocumentBuilder<T>> {
        &self.builder
    }

    pub fn lock(&self) -> &WorkspaceLock {
        &self.lock
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.builder.subscribe()
    }

    /// Queue a full build of the given documents as a write action.
    pub fn build(
        &self,
        uris: Vec<Url>,
        options: BuildOptions,
    ) -> impl Future<Output = Result<(), EngineError>> {
        let builder = Arc::clone(&self.builder);
        self.lock
            .write(move |token| async move { builder.build(&uris, options, &token).await })
    }

    /// Queue a change/deletion update as a write action.
    pub fn update(
        &self,
        changed: Vec<Url>,
        deleted: Vec<Url>,
    ) -> impl Future<Output = Result<(), EngineError>> {
        let builder = Arc::clone(&self.builder);
        self.lock
            .write(move |token| async move { builder.update(&changed, &deleted, &token).await })
    }

    /// Queue a read-only query against the registry.
    pub fn query<R, F>(
        &self,
        priority: ReadPriority,
        f: F,
    ) -> impl Future<Output = Result<R, EngineError>>
    where
        F: FnOnce(&DocumentRegistry<T>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let builder = Arc::clone(&self.builder);
        self.lock
            .read(move || async move { Ok(builder.inspect(f).await) }, priority)
    }

    /// Cancel the most recently queued write action.
    pub fn cancel_pending_write(&self) {
        self.lock.cancel_write();
    }
}
