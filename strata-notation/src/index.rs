//! Workspace-global symbol and reference records.
//!
//! The engine treats both indexes as collaborator-owned state: the content
//! indexer writes exports, the reference indexer writes reverse reference
//! records, and deletion removes a document from both. Everything is keyed
//! by document so one document's update replaces exactly its own entries.

use std::collections::HashMap;

use parking_lot::RwLock;
use url::Url;

/// One resolved reference, recorded for reverse lookup ("who references
/// this symbol?").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedReference {
    pub source: Url,
    /// Line of the reference in the source document.
    pub line: u32,
    pub target: Url,
    pub symbol: String,
}

#[derive(Default)]
struct IndexInner {
    exported: HashMap<String, Url>,
    exports_by_uri: HashMap<Url, Vec<String>>,
    references_by_source: HashMap<Url, Vec<RecordedReference>>,
}

/// Shared between the notation collaborators and any front end that wants
/// symbol queries (completion, find-references).
#[derive(Default)]
pub struct SymbolIndex {
    inner: RwLock<IndexInner>,
}

impl SymbolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The document exporting `name`, if any. When two documents export the
    /// same name the most recently indexed one wins.
    pub fn owner_of(&self, name: &str) -> Option<Url> {
        self.inner.read().exported.get(name).cloned()
    }

    pub fn exported_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().exported.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// All recorded references to `symbol` as exported by `target`.
    pub fn find_references(&self, target: &Url, symbol: &str) -> Vec<RecordedReference> {
        let inner = self.inner.read();
        let mut found: Vec<RecordedReference> = inner
            .references_by_source
            .values()
            .flatten()
            .filter(|record| &record.target == target && record.symbol == symbol)
            .cloned()
            .collect();
        found.sort_by(|a, b| (&a.source, a.line).cmp(&(&b.source, b.line)));
        found
    }

    pub(crate) fn set_exports(&self, uri: &Url, names: Vec<String>) {
        let mut inner = self.inner.write();
        remove_exports_locked(&mut inner, uri);
        for name in &names {
            inner.exported.insert(name.clone(), uri.clone());
        }
        inner.exports_by_uri.insert(uri.clone(), names);
    }

    pub(crate) fn remove_exports(&self, uri: &Url) {
        remove_exports_locked(&mut self.inner.write(), uri);
    }

    pub(crate) fn set_references(&self, source: &Url, records: Vec<RecordedReference>) {
        self.inner
            .write()
            .references_by_source
            .insert(source.clone(), records);
    }

    pub(crate) fn remove_references(&self, uri: &Url) {
        let mut inner = self.inner.write();
        inner.references_by_source.remove(uri);
    }
}

fn remove_exports_locked(inner: &mut IndexInner, uri: &Url) {
    if let Some(names) = inner.exports_by_uri.remove(uri) {
        for name in names {
            if inner.exported.get(&name).map_or(false, |owner| owner == uri) {
                inner.exported.remove(&name);
            }
        }
    }
}
