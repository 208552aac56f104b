//! URI-keyed document storage.

use std::collections::HashMap;

use url::Url;

use crate::document::Document;

/// Pure storage for the workspace's documents. One registry per workspace,
/// created at initialization and torn down with it. All mutation is
/// crate-internal: callers outside the engine only ever observe documents
/// through read actions.
#[derive(Debug)]
pub struct DocumentRegistry<T> {
    documents: HashMap<Url, Document<T>>,
}

impl<T> DocumentRegistry<T> {
    pub fn new() -> Self {
        Self {
            documents: HashMap::new(),
        }
    }

    pub fn get(&self, uri: &Url) -> Option<&Document<T>> {
        self.documents.get(uri)
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.documents.contains_key(uri)
    }

    /// Iterate over all documents. Order is unspecified.
    pub fn documents(&self) -> impl Iterator<Item = &Document<T>> {
        self.documents.values()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub(crate) fn get_mut(&mut self, uri: &Url) -> Option<&mut Document<T>> {
        self.documents.get_mut(uri)
    }

    pub(crate) fn insert(&mut self, document: Document<T>) {
        self.documents.insert(document.uri().clone(), document);
    }

    pub(crate) fn remove(&mut self, uri: &Url) -> Option<Document<T>> {
        self.documents.remove(uri)
    }
}

impl<T> Default for DocumentRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
