//! The document record and its state-gated caches.
//!
//! A [`Document`] is the unit of analysis. Every cache it carries (syntax
//! tree, local symbols, reference records, diagnostics) is tied to the
//! lifecycle state that produces it: the cache is present exactly when the
//! state has been reached, and is discarded exactly when the state is reset
//! below that point. Mutation happens only through `pub(crate)` methods so
//! that all writes funnel through the builder, which in turn runs inside a
//! workspace write action.

use std::collections::BTreeSet;

use serde::Serialize;
use url::Url;

use crate::options::BuildOptions;
use crate::state::DocumentState;

/// Text plus the version number assigned by whoever owns the text (editor
/// buffer or file system watcher). Versions are expected to increase with
/// every real change; stale versions are ignored on update.
#[derive(Debug, Clone)]
pub struct SourceText {
    pub text: String,
    pub version: i32,
}

/// A symbol declared by a single document.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub line: u32,
}

/// The local declarations of one document, produced by the scope computer.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new(symbols: Vec<Symbol>) -> Self {
        Self { symbols }
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|symbol| symbol.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Outcome of one cross-document link attempt.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The reference resolved to a symbol owned by the given document
    /// (possibly this one).
    Resolved { uri: Url, symbol: String },
    /// The reference could not be resolved; the message is surfaced by the
    /// validator as a diagnostic.
    Error { message: String },
}

/// One entry in a document's outgoing reference list.
#[derive(Debug, Clone)]
pub struct ReferenceRecord {
    /// The referenced name as written.
    pub name: String,
    /// Line the reference occurs on.
    pub line: u32,
    pub resolution: Resolution,
}

impl ReferenceRecord {
    pub fn is_error(&self) -> bool {
        matches!(self.resolution, Resolution::Error { .. })
    }

    /// The target document, when resolution succeeded.
    pub fn resolved_uri(&self) -> Option<&Url> {
        match &self.resolution {
            Resolution::Resolved { uri, .. } => Some(uri),
            Resolution::Error { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Information,
}

/// A single validation or syntax finding, tagged with the category that
/// produced it so categories can be re-run independently without
/// duplicating results.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub category: String,
    pub message: String,
    pub line: u32,
    pub col_start: u32,
    pub col_end: u32,
}

/// Category label attached to diagnostics produced by the parser itself.
pub const SYNTAX_CATEGORY: &str = "syntax";

/// What the parser collaborator hands back: the tree plus any syntax
/// findings, which travel with the tree rather than with the validation
/// diagnostics so they survive validation resets.
#[derive(Debug, Clone)]
pub struct ParseResult<T> {
    pub tree: T,
    pub syntax_errors: Vec<Diagnostic>,
}

/// The document record stored in the registry. Updated in place, never
/// replaced, so URIs handed out to collaborators stay valid across edits.
#[derive(Debug)]
pub struct Document<T> {
    uri: Url,
    state: DocumentState,
    content: String,
    version: i32,
    parse: Option<ParseResult<T>>,
    local_symbols: Option<SymbolTable>,
    outgoing_references: Option<Vec<ReferenceRecord>>,
    diagnostics: Option<Vec<Diagnostic>>,
    executed_validation_categories: BTreeSet<String>,
    is_open: bool,
    pending_build: Option<BuildOptions>,
}

impl<T> Document<T> {
    pub(crate) fn new(uri: Url, text: String, version: i32) -> Self {
        Self {
            uri,
            state: DocumentState::Changed,
            content: text,
            version,
            parse: None,
            local_symbols: None,
            outgoing_references: None,
            diagnostics: None,
            executed_validation_categories: BTreeSet::new(),
            is_open: false,
            pending_build: None,
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    /// The syntax tree, present iff `state >= Parsed`.
    pub fn tree(&self) -> Option<&T> {
        self.parse.as_ref().map(|parse| &parse.tree)
    }

    pub fn parse_result(&self) -> Option<&ParseResult<T>> {
        self.parse.as_ref()
    }

    /// Local declarations, present iff `state >= ComputedScopes`.
    pub fn local_symbols(&self) -> Option<&SymbolTable> {
        self.local_symbols.as_ref()
    }

    /// Outgoing reference records, present iff `state >= Linked`. An empty
    /// slice is a legitimate result for a document without references.
    pub fn outgoing_references(&self) -> Option<&[ReferenceRecord]> {
        self.outgoing_references.as_deref()
    }

    pub fn has_link_errors(&self) -> bool {
        self.outgoing_references
            .as_deref()
            .is_some_and(|records| records.iter().any(ReferenceRecord::is_error))
    }

    /// Accumulated diagnostics, present iff `state >= Validated`.
    pub fn diagnostics(&self) -> Option<&[Diagnostic]> {
        self.diagnostics.as_deref()
    }

    pub fn executed_validation_categories(&self) -> &BTreeSet<String> {
        &self.executed_validation_categories
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Build options recorded when the document was queued. A surviving
    /// value marks a document whose previous build pass was cancelled.
    pub fn pending_build(&self) -> Option<&BuildOptions> {
        self.pending_build.as_ref()
    }

    pub(crate) fn set_open(&mut self, open: bool) {
        self.is_open = open;
    }

    pub(crate) fn set_pending_build(&mut self, options: BuildOptions) {
        self.pending_build = Some(options);
    }

    pub(crate) fn clear_pending_build(&mut self) {
        self.pending_build = None;
    }

    /// Force the document back to `target`, discarding every cache that
    /// belongs to a later state. A target at or above the current state is
    /// a no-op: reset never advances.
    pub(crate) fn reset_to(&mut self, target: DocumentState) {
        if target >= self.state {
            return;
        }
        self.state = target;
        if target < DocumentState::Validated {
            self.diagnostics = None;
            self.executed_validation_categories.clear();
        }
        if target < DocumentState::Linked {
            self.outgoing_references = None;
        }
        if target < DocumentState::ComputedScopes {
            self.local_symbols = None;
        }
        if target < DocumentState::Parsed {
            self.parse = None;
        }
    }

    /// Replace the content after an edit. Resets to `Changed`, which also
    /// eagerly discards the outgoing references so no concurrent reader can
    /// observe stale cross-document pointers.
    pub(crate) fn refresh(&mut self, source: SourceText) {
        self.reset_to(DocumentState::Changed);
        self.content = source.text;
        self.version = source.version;
    }

    pub(crate) fn set_parse(&mut self, parse: ParseResult<T>) {
        self.parse = Some(parse);
    }

    pub(crate) fn set_local_symbols(&mut self, symbols: SymbolTable) {
        self.local_symbols = Some(symbols);
    }

    pub(crate) fn set_outgoing_references(&mut self, records: Vec<ReferenceRecord>) {
        self.outgoing_references = Some(records);
    }

    /// Append validation results and mark their categories as executed.
    /// Ensures the diagnostics cache exists even when nothing was reported,
    /// since reaching `Validated` implies the cache is present.
    pub(crate) fn record_validation(
        &mut self,
        diagnostics: Vec<Diagnostic>,
        categories: BTreeSet<String>,
    ) {
        self.diagnostics
            .get_or_insert_with(Vec::new)
            .extend(diagnostics);
        self.executed_validation_categories.extend(categories);
    }

    pub(crate) fn advance_to(&mut self, state: DocumentState) {
        debug_assert_eq!(self.state.next(), Some(state));
        self.state = state;
    }
}
