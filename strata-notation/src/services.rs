//! Collaborator implementations binding the notation to the engine.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use strata_engine::{
    ContentIndexer, Diagnostic, Document, DocumentRegistry, EngineError, LanguageServices, Linker,
    ParseResult, Parser, ReferenceIndexer, ReferenceRecord, Resolution, ScopeComputer, Severity,
    SourceText, Symbol, SymbolTable, TextSource, ValidationRun, Validator,
};

use crate::ast::NotationTree;
use crate::index::{RecordedReference, SymbolIndex};
use crate::parser::parse_text;

pub const REFERENCES_CATEGORY: &str = "references";
pub const DUPLICATES_CATEGORY: &str = "duplicates";
pub const STYLE_CATEGORY: &str = "style";

/// File-system text source. Versions are synthesized: the version bumps
/// only when the file content actually differs from the last fetch, so
/// spurious change notifications fall into the engine's "already up to
/// date" fast path.
#[derive(Default)]
pub struct FileTextSource {
    seen: Mutex<HashMap<Url, SourceText>>,
}

impl FileTextSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TextSource for FileTextSource {
    fn fetch(&self, uri: &Url) -> Result<SourceText, EngineError> {
        let path = uri.to_file_path().map_err(|_| EngineError::Source {
            uri: uri.clone(),
            message: "not a file url".into(),
        })?;
        let text = fs::read_to_string(&path).map_err(|err| EngineError::Source {
            uri: uri.clone(),
            message: err.to_string(),
        })?;
        let mut seen = self.seen.lock();
        if let Some(previous) = seen.get(uri) {
            if previous.text == text {
                return Ok(previous.clone());
            }
        }
        let version = seen.get(uri).map_or(1, |previous| previous.version + 1);
        let source = SourceText { text, version };
        seen.insert(uri.clone(), source.clone());
        Ok(source)
    }
}

pub struct NotationParser;

impl Parser<NotationTree> for NotationParser {
    fn parse(
        &self,
        _uri: &Url,
        text: &str,
        _token: &CancellationToken,
    ) -> Result<ParseResult<NotationTree>, EngineError> {
        Ok(parse_text(text))
    }
}

pub struct NotationContentIndexer {
    index: Arc<SymbolIndex>,
}

impl ContentIndexer<NotationTree> for NotationContentIndexer {
    fn index_content(
        &self,
        document: &Document<NotationTree>,
        _token: &CancellationToken,
    ) -> Result<(), EngineError> {
        let names = document
            .tree()
            .map(|tree| {
                tree.definitions()
                    .map(|statement| statement.name.clone())
                    .collect()
            })
            .unwrap_or_default();
        self.index.set_exports(document.uri(), names);
        Ok(())
    }

    fn remove_content(&self, uri: &Url) {
        self.index.remove_exports(uri);
    }
}

pub struct NotationScopeComputer;

impl ScopeComputer<NotationTree> for NotationScopeComputer {
    fn compute_scopes(
        &self,
        document: &Document<NotationTree>,
        _token: &CancellationToken,
    ) -> Result<SymbolTable, EngineError> {
        let symbols = document
            .tree()
            .map(|tree| {
                tree.definitions()
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

pub struct NotationLinker {
    index: Arc<SymbolIndex>,
}

impl Linker<NotationTree> for NotationLinker {
    fn link(
        &self,
        document: &Document<NotationTree>,
        _registry: &DocumentRegistry<NotationTree>,
        _token: &CancellationToken,
    ) -> Result<Vec<ReferenceRecord>, EngineError> {
        let Some(tree) = document.tree() else {
            return Ok(Vec::new());
        };
        let local = document.local_symbols();
        let mut records = Vec::new();
        for statement in tree.references() {
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
                    message: format!("unresolved reference `{}`", statement.name),
                }
            };
            records.push(ReferenceRecord {
                name: statement.name.clone(),
                line: statement.line,
                resolution,
            });
        }
        tracing::trace!(uri = %document.uri(), references = records.len(), "linked document");
        Ok(records)
    }
}

pub struct NotationReferenceIndexer {
    index: Arc<SymbolIndex>,
}

impl ReferenceIndexer<NotationTree> for NotationReferenceIndexer {
    fn index_references(
        &self,
        document: &Document<NotationTree>,
        _token: &CancellationToken,
    ) -> Result<(), EngineError> {
        let records = document
            .outgoing_references()
            .map(|records| {
                records
                    .iter()
                    .filter_map(|record| match &record.resolution {
                        Resolution::Resolved { uri, symbol } => Some(RecordedReference {
                            source: document.uri().clone(),
                            line: record.line,
                            target: uri.clone(),
                            symbol: symbol.clone(),
                        }),
                        Resolution::Error { .. } => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.index.set_references(document.uri(), records);
        Ok(())
    }

    fn remove_references(&self, uri: &Url) {
        self.index.remove_references(uri);
    }
}

pub struct NotationValidator;

impl Validator<NotationTree> for NotationValidator {
    fn categories(&self) -> Vec<String> {
        vec![
            REFERENCES_CATEGORY.to_string(),
            DUPLICATES_CATEGORY.to_string(),
            STYLE_CATEGORY.to_string(),
        ]
    }

    fn validate(
        &self,
        document: &Document<NotationTree>,
        run: &ValidationRun,
        _token: &CancellationToken,
    ) -> Result<Vec<Diagnostic>, EngineError> {
        let mut diagnostics = Vec::new();
        if run.categories.contains(REFERENCES_CATEGORY) {
            if let Some(records) = document.outgoing_references() {
                for record in records {
                    if let Resolution::Error { message } = &record.resolution {
                        diagnostics.push(diagnostic_for(
                            document,
                            record.line,
                            Severity::Error,
                            REFERENCES_CATEGORY,
                            message.clone(),
                        ));
                    }
                }
            }
        }
        if run.stop_after_linking_errors && document.has_link_errors() {
            return Ok(diagnostics);
        }
        if run.categories.contains(DUPLICATES_CATEGORY) {
            if let Some(tree) = document.tree() {
                let mut seen = HashSet::new();
                for statement in tree.definitions() {
                    if !seen.insert(statement.name.as_str()) {
                        diagnostics.push(diagnostic_for(
                            document,
                            statement.line,
                            Severity::Error,
                            DUPLICATES_CATEGORY,
                            format!("`{}` is already defined in this document", statement.name),
                        ));
                    }
                }
            }
        }
        if run.categories.contains(STYLE_CATEGORY) {
            if let Some(symbols) = document.local_symbols() {
                for symbol in symbols.iter() {
                    if symbol.name.chars().any(|c| c.is_ascii_uppercase()) {
                        diagnostics.push(diagnostic_for(
                            document,
                            symbol.line,
                            Severity::Warning,
                            STYLE_CATEGORY,
                            format!("`{}` should be lower_snake_case", symbol.name),
                        ));
                    }
                }
            }
        }
        Ok(diagnostics)
    }
}

/// Attach name columns when the line still carries the reported statement,
/// falling back to the whole line otherwise.
fn diagnostic_for(
    document: &Document<NotationTree>,
    line: u32,
    severity: Severity,
    category: &str,
    message: String,
) -> Diagnostic {
    let span = document
        .tree()
        .and_then(|tree| {
            tree.statements
                .iter()
                .find(|statement| statement.line == line)
        })
        .map(|statement| (statement.name_start, statement.name_end));
    let (col_start, col_end) = span.unwrap_or((0, 0));
    Diagnostic {
        severity,
        category: category.to_string(),
        message,
        line,
        col_start,
        col_end,
    }
}

/// Wires the notation collaborators over one shared index.
pub struct NotationFrontEnd {
    index: Arc<SymbolIndex>,
}

impl NotationFrontEnd {
    pub fn new() -> Self {
        Self {
            index: Arc::new(SymbolIndex::new()),
        }
    }

    pub fn index(&self) -> &Arc<SymbolIndex> {
        &self.index
    }

    /// The full collaborator set, reading text through `text_source`.
    pub fn services(&self, text_source: Box<dyn TextSource>) -> LanguageServices<NotationTree> {
        LanguageServices {
            parser: Box::new(NotationParser),
            content_indexer: Box::new(NotationContentIndexer {
                index: Arc::clone(&self.index),
            }),
            scope_computer: Box::new(NotationScopeComputer),
            linker: Box::new(NotationLinker {
                index: Arc::clone(&self.index),
            }),
            reference_indexer: Box::new(NotationReferenceIndexer {
                index: Arc::clone(&self.index),
            }),
            validator: Box::new(NotationValidator),
            text_source,
        }
    }
}

impl Default for NotationFrontEnd {
    fn default() -> Self {
        Self::new()
    }
}
