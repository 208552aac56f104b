//! Test support: an in-memory text source and a minimal fixture language.
//!
//! The fixture language is two statements, one per line: `def name`
//! declares a symbol, `use name` references one, `#` starts a comment.
//! Defined names are exported workspace-wide, so `use` resolves locally
//! first and through the shared index second. Small as it is, it exercises
//! every collaborator seam, which is all the lifecycle tests need.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::document::{
    Diagnostic, Document, ParseResult, ReferenceRecord, Resolution, Severity, SourceText, Symbol,
    SymbolTable, SYNTAX_CATEGORY,
};
use crate::error::EngineError;
use crate::registry::DocumentRegistry;
use crate::services::{
    ContentIndexer, LanguageServices, Linker, Parser, ReferenceIndexer, ScopeComputer, TextSource,
    ValidationRun, Validator,
};

pub const REFERENCES_CATEGORY: &str = "references";
pub const STYLE_CATEGORY: &str = "style";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureKeyword {
    Def,
    Use,
}

#[derive(Debug, Clone)]
pub struct FixtureStatement {
    pub keyword: FixtureKeyword,
    pub name: String,
    pub line: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FixtureTree {
    pub statements: Vec<FixtureStatement>,
}

/// Editable in-memory text store, standing in for editor buffers. Versions
/// increase automatically with every `insert`.
#[derive(Default)]
pub struct MemoryTextSource {
    entries: Mutex<HashMap<Url, SourceText>>,
}

impl MemoryTextSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store text under the next version number and return that version.
    pub fn insert(&self, uri: &Url, text: impl Into<String>) -> i32 {
        let mut entries = self.entries.lock();
        let version = entries.get(uri).map_or(1, |entry| entry.version + 1);
        entries.insert(
            uri.clone(),
            SourceText {
                text: text.into(),
                version,
            },
        );
        version
    }

    /// Store text under an explicit version, for staleness tests.
    pub fn insert_versioned(&self, uri: &Url, text: impl Into<String>, version: i32) {
        self.entries.lock().insert(
            uri.clone(),
            SourceText {
                text: text.into(),
                version,
            },
        );
    }

    pub fn remove(&self, uri: &Url) {
        self.entries.lock().remove(uri);
    }
}

impl TextSource for MemoryTextSource {
    fn fetch(&self, uri: &Url) -> Result<SourceText, EngineError> {
        self.entries
            .lock()
            .get(uri)
            .cloned()
            .ok_or_else(|| EngineError::Source {
                uri: uri.clone(),
                message: "no such document".into(),
            })
    }
}

#[derive(Default)]
struct IndexInner {
    exported: HashMap<String, Url>,
    by_uri: HashMap<Url, Vec<String>>,
    references: HashMap<Url, Vec<Url>>,
}

/// The fixture front end's global index: exported symbol names and the
/// reverse reference records written by the reference indexer.
#[derive(Default)]
pub struct FixtureIndex {
    inner: RwLock<IndexInner>,
}

impl FixtureIndex {
    pub fn owner_of(&self, name: &str) -> Option<Url> {
        self.inner.read().exported.get(name).cloned()
    }

    pub fn exported_names(&self) -> Vec<String> {
        self.inner.read().exported.keys().cloned().collect()
    }

    /// Sources that referenced the given target, as recorded by the
    /// reference indexer.
    pub fn referencing_documents(&self, target: &Url) -> Vec<Url> {
        self.inner
            .read()
            .references
            .get(target)
            .cloned()
            .unwrap_or_default()
    }

    fn put_exports(&self, uri: &Url, names: Vec<String>) {
        let mut inner = self.inner.write();
        if let Some(old) = inner.by_uri.remove(uri) {
            for name in old {
                if inner.exported.get(&name).is_some_and(|owner| owner == uri) {
                    inner.exported.remove(&name);
                }
            }
        }
        for name in &names {
            inner.exported.insert(name.clone(), uri.clone());
        }
        inner.by_uri.insert(uri.clone(), names);
    }

    fn remove_exports(&self, uri: &Url) {
        let mut inner = self.inner.write();
        if let Some(old) = inner.by_uri.remove(uri) {
            for name in old {
                if inner.exported.get(&name).is_some_and(|owner| owner == uri) {
                    inner.exported.remove(&name);
                }
            }
        }
    }

    fn put_references(&self, source: &Url, targets: Vec<Url>) {
        let mut inner = self.inner.write();
        for sources in inner.references.values_mut() {
            sources.retain(|existing| existing != source);
        }
        for target in targets {
            inner
                .references
                .entry(target)
                .or_default()
                .push(source.clone());
        }
    }

    fn remove_references(&self, uri: &Url) {
        let mut inner = self.inner.write();
        inner.references.remove(uri);
        for sources in inner.references.values_mut() {
            sources.retain(|existing| existing != uri);
        }
    }
}

pub struct FixtureParser;

impl Parser<FixtureTree> for FixtureParser {
    fn parse(
        &self,
        _uri: &Url,
        text: &str,
        _token: &CancellationToken,
    ) -> Result<ParseResult<FixtureTree>, EngineError> {
        let mut statements = Vec::new();
        let mut syntax_errors = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line_no = line_no as u32;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut words = trimmed.split_whitespace();
            let keyword = match words.next() {
                Some("def") => Some(FixtureKeyword::Def),
                Some("use") => Some(FixtureKeyword::Use),
                _ => None,
            };
            match (keyword, words.next(), words.next()) {
                (Some(keyword), Some(name), None) => statements.push(FixtureStatement {
                    keyword,
                    name: name.to_string(),
                    line: line_no,
                }),
                _ => syntax_errors.push(Diagnostic {
                    severity: Severity::Error,
                    category: SYNTAX_CATEGORY.to_string(),
                    message: format!("unrecognized statement: {}", trimmed),
                    line: line_no,
                    col_start: 0,
                    col_end: line.len() as u32,
                }),
            }
        }
        Ok(ParseResult {
            tree: FixtureTree { statements },
            syntax_errors,
        })
    }
}

pub struct FixtureContentIndexer {
    index: Arc<FixtureIndex>,
}

impl ContentIndexer<FixtureTree> for FixtureContentIndexer {
    fn index_content(
        &self,
        document: &Document<FixtureTree>,
        _token: &CancellationToken,
    ) -> Result<(), EngineError> {
        let names = document
            .tree()
            .map(|tree| {
                tree.statements
                    .iter()
                    .filter(|statement| statement.keyword == FixtureKeyword::Def)
                    .map(|statement| statement.name.clone())
                    .collect()
            })
            .unwrap_or_default();
        self.index.put_exports(document.uri(), names);
        Ok(())
    }

    fn remove_content(&self, uri: &Url) {
        self.index.remove_exports(uri);
    }
}

pub struct FixtureScopeComputer;

impl ScopeComputer<FixtureTree> for FixtureScopeComputer {
    fn compute_scopes(
        &self,
        document: &Document<FixtureTree>,
        _token: &CancellationToken,
    ) -> Result<SymbolTable, EngineError> {
        let symbols = document
            .tree()
            .map(|tree| {
                tree.statements
                    .iter()
                    .filter(|statement| statement.keyword == FixtureKeyword::Def)
                    .map(|statement| Symbol {
                        name: statement.name.clone(),
                        line: statement.line,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(SymbolTable::new(symbols))
    }
}

pub struct FixtureLinker {
    index: Arc<FixtureIndex>,
}

impl Linker<FixtureTree> for FixtureLinker {
    fn link(
        &self,
        document: &Document<FixtureTree>,
        _registry: &DocumentRegistry<FixtureTree>,
        _token: &CancellationToken,
    ) -> Result<Vec<ReferenceRecord>, EngineError> {
        let Some(tree) = document.tree() else {
            return Ok(Vec::new());
        };
        let local = document.local_symbols();
        let mut records = Vec::new();
        for statement in &tree.statements {
            if statement.keyword != FixtureKeyword::Use {
                continue;
            }
            let resolution = if local.is_some_and(|table| table.contains(&statement.name)) {
                Resolution::Resolved {
                    uri: document.uri().clone(),
                    symbol: statement.name.clone(),
                }
            } else if let Some(owner) = self.index.owner_of(&statement.name) {
                Resolution::Resolved {
                    uri: owner,
                    symbol: statement.name.clone(),
                }
            } else {
                Resolution::Error {
                    message: format!("unresolved reference: {}", statement.name),
                }
            };
            records.push(ReferenceRecord {
                name: statement.name.clone(),
                line: statement.line,
                resolution,
            });
        }
        Ok(records)
    }
}

pub struct FixtureReferenceIndexer {
    index: Arc<FixtureIndex>,
}

impl ReferenceIndexer<FixtureTree> for FixtureReferenceIndexer {
    fn index_references(
        &self,
        document: &Document<FixtureTree>,
        _token: &CancellationToken,
    ) -> Result<(), EngineError> {
        let targets = document
            .outgoing_references()
            .map(|records| {
                records
                    .iter()
                    .filter_map(|record| record.resolved_uri().cloned())
                    .collect()
            })
            .unwrap_or_default();
        self.index.put_references(document.uri(), targets);
        Ok(())
    }

    fn remove_references(&self, uri: &Url) {
        self.index.remove_references(uri);
    }
}

pub struct FixtureValidator;

impl Validator<FixtureTree> for FixtureValidator {
    fn categories(&self) -> Vec<String> {
        vec![REFERENCES_CATEGORY.to_string(), STYLE_CATEGORY.to_string()]
    }

    fn validate(
        &self,
        document: &Document<FixtureTree>,
        run: &ValidationRun,
        _token: &CancellationToken,
    ) -> Result<Vec<Diagnostic>, EngineError> {
        let mut diagnostics = Vec::new();
        if run.categories.contains(REFERENCES_CATEGORY) {
            if let Some(records) = document.outgoing_references() {
                for record in records {
                    if let Resolution::Error { message } = &record.resolution {
                        diagnostics.push(Diagnostic {
                            severity: Severity::Error,
                            category: REFERENCES_CATEGORY.to_string(),
                            message: message.clone(),
                            line: record.line,
                            col_start: 0,
                            col_end: 0,
                        });
                    }
                }
            }
        }
        if run.stop_after_linking_errors && document.has_link_errors() {
            return Ok(diagnostics);
        }
        if run.categories.contains(STYLE_CATEGORY) {
            if let Some(symbols) = document.local_symbols() {
                for symbol in symbols.iter() {
                    if symbol.name.chars().any(|c| c.is_ascii_uppercase()) {
                        diagnostics.push(Diagnostic {
                            severity: Severity::Warning,
                            category: STYLE_CATEGORY.to_string(),
                            message: format!("symbol `{}` should be lower-case", symbol.name),
                            line: symbol.line,
                            col_start: 0,
                            col_end: 0,
                        });
                    }
                }
            }
        }
        Ok(diagnostics)
    }
}

/// Handles shared between the fixture collaborators and a test.
pub struct Fixture {
    pub texts: Arc<MemoryTextSource>,
    pub index: Arc<FixtureIndex>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            texts: Arc::new(MemoryTextSource::new()),
            index: Arc::new(FixtureIndex::default()),
        }
    }

    /// A linker over the shared index, for tests that wrap the link phase.
    pub fn linker(&self) -> FixtureLinker {
        FixtureLinker {
            index: Arc::clone(&self.index),
        }
    }

    /// A full collaborator set over the shared handles. Tests that need to
    /// observe or sabotage a phase replace individual boxes.
    pub fn services(&self) -> LanguageServices<FixtureTree> {
        LanguageServices {
            parser: Box::new(FixtureParser),
            content_indexer: Box::new(FixtureContentIndexer {
                index: Arc::clone(&self.index),
            }),
            scope_computer: Box::new(FixtureScopeComputer),
            linker: Box::new(FixtureLinker {
                index: Arc::clone(&self.index),
            }),
            reference_indexer: Box::new(FixtureReferenceIndexer {
                index: Arc::clone(&self.index),
            }),
            validator: Box::new(FixtureValidator),
            text_source: Box::new(SharedTextSource(Arc::clone(&self.texts))),
        }
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapter so the shared [`MemoryTextSource`] handle can be boxed as the
/// engine's text source while the test keeps editing it.
pub struct SharedTextSource(pub Arc<MemoryTextSource>);

impl TextSource for SharedTextSource {
    fn fetch(&self, uri: &Url) -> Result<SourceText, EngineError> {
        self.0.fetch(uri)
    }
}
