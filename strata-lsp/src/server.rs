//! The notation language server.
//!
//! Editor notifications are translated into workspace write actions and
//! queries into read actions; the server itself holds no document state
//! beyond the open-buffer overlay. Diagnostics publishing is driven by the
//! engine's build events, so the editor sees results exactly when a
//! document finishes validating, including documents that were rebuilt only
//! because a dependency changed.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::broadcast;
use tower_lsp::jsonrpc;
use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, CompletionParams, CompletionResponse,
    DiagnosticSeverity, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, GotoDefinitionParams, GotoDefinitionResponse, Hover,
    HoverContents, HoverParams, HoverProviderCapability, InitializeParams, InitializeResult,
    InitializedParams, Location, MarkedString, NumberOrString, OneOf, Position, Range,
    ReferenceParams, ServerCapabilities, ServerInfo, TextDocumentSyncCapability,
    TextDocumentSyncKind, Url,
};
use tower_lsp::{async_trait, Client, LanguageServer};

use strata_engine::{
    BuildEvent, Diagnostic, DocumentState, ReadPriority, Resolution, Severity, Workspace,
};
use strata_notation::{Keyword, NotationFrontEnd, NotationTree, Statement, SymbolIndex};

use crate::buffers::{BufferStore, OverlayTextSource};

/// Where published diagnostics go. Abstracted from [`Client`] so the server
/// can be driven in tests without a live editor connection.
#[async_trait]
pub trait DiagnosticsSink: Send + Sync + 'static {
    async fn publish(
        &self,
        uri: Url,
        diagnostics: Vec<tower_lsp::lsp_types::Diagnostic>,
        version: Option<i32>,
    );
}

#[async_trait]
impl DiagnosticsSink for Client {
    async fn publish(
        &self,
        uri: Url,
        diagnostics: Vec<tower_lsp::lsp_types::Diagnostic>,
        version: Option<i32>,
    ) {
        self.publish_diagnostics(uri, diagnostics, version).await;
    }
}

pub struct NotationLanguageServer {
    workspace: Arc<Workspace<NotationTree>>,
    index: Arc<SymbolIndex>,
    buffers: Arc<BufferStore>,
}

impl NotationLanguageServer {
    pub fn new(client: Client) -> Self {
        Self::with_sink(client)
    }

    /// Build a server around any diagnostics sink. Must be called from
    /// within a tokio runtime: the diagnostics forwarder is spawned here.
    pub fn with_sink<S: DiagnosticsSink>(sink: S) -> Self {
        let buffers = Arc::new(BufferStore::default());
        let front_end = NotationFrontEnd::new();
        let index = Arc::clone(front_end.index());
        let services = front_end.services(Box::new(OverlayTextSource::new(Arc::clone(&buffers))));
        let server = Self {
            workspace: Arc::new(Workspace::new(services)),
            index,
            buffers,
        };
        server.spawn_diagnostics_forwarder(Arc::new(sink));
        server
    }

    pub fn workspace(&self) -> &Arc<Workspace<NotationTree>> {
        &self.workspace
    }

    /// Forward validation results to the sink whenever documents finish
    /// validating, and clear diagnostics for deleted documents.
    fn spawn_diagnostics_forwarder<S: DiagnosticsSink>(&self, sink: Arc<S>) {
        let workspace = Arc::clone(&self.workspace);
        let mut events = workspace.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(BuildEvent::PhaseCompleted {
                        phase: DocumentState::Validated,
                        documents,
                    }) => {
                        let batch = workspace
                            .query(ReadPriority::Normal, move |registry| {
                                documents
                                    .into_iter()
                                    .filter_map(|uri| {
                                        let doc = registry.get(&uri)?;
                                        let mut diagnostics: Vec<_> = doc
                                            .parse_result()
                                            .map(|parse| {
                                                parse
                                                    .syntax_errors
                                                    .iter()
                                                    .map(to_lsp_diagnostic)
                                                    .collect()
                                            })
                                            .unwrap_or_default();
                                        diagnostics.extend(
                                            doc.diagnostics()
                                                .unwrap_or_default()
                                                .iter()
                                                .map(to_lsp_diagnostic),
                                        );
                                        Some((uri, doc.version(), diagnostics))
                                    })
                                    .collect::<Vec<_>>()
                            })
                            .await;
                        match batch {
                            Ok(batch) => {
                                for (uri, version, diagnostics) in batch {
                                    sink.publish(uri, diagnostics, Some(version)).await;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "diagnostics query failed")
                            }
                        }
                    }
                    Ok(BuildEvent::UpdateScheduled { deleted, .. }) => {
                        for uri in deleted {
                            sink.publish(uri, Vec::new(), None).await;
                        }
                    }
                    Ok(BuildEvent::PhaseCompleted { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "diagnostics forwarder lagged behind builds");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Queue a workspace write and detach: notification handlers must not
    /// wait for the rebuild they trigger.
    fn schedule_update(&self, opened: Option<(Url, bool)>, changed: Vec<Url>, deleted: Vec<Url>) {
        let builder = Arc::clone(self.workspace.builder());
        let pending = self.workspace.lock().write(move |token| async move {
            if let Some((uri, open)) = &opened {
                builder.mark_opened(uri, *open).await?;
            }
            builder.update(&changed, &deleted, &token).await
        });
        tokio::spawn(async move {
            if let Err(err) = pending.await {
                tracing::error!(error = %err, "workspace update failed");
            }
        });
    }
}

#[async_trait]
impl LanguageServer for NotationLanguageServer {
    async fn initialize(&self, _: InitializeParams) -> jsonrpc::Result<InitializeResult> {
        let capabilities = ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::FULL)),
            hover_provider: Some(HoverProviderCapability::Simple(true)),
            completion_provider: Some(lsp_types::CompletionOptions::default()),
            definition_provider: Some(OneOf::Left(true)),
            references_provider: Some(OneOf::Left(true)),
            ..ServerCapabilities::default()
        };
        Ok(InitializeResult {
            capabilities,
            server_info: Some(ServerInfo {
                name: "strata-lsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        tracing::debug!("language server initialized");
    }

    async fn shutdown(&self) -> jsonrpc::Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let doc = params.text_document;
        self.buffers.set(&doc.uri, doc.text, doc.version);
        self.schedule_update(Some((doc.uri.clone(), true)), vec![doc.uri], Vec::new());
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        // Full sync: the last change carries the whole document.
        if let Some(change) = params.content_changes.into_iter().last() {
            let uri = params.text_document.uri;
            self.buffers
                .set(&uri, change.text, params.text_document.version);
            self.schedule_update(None, vec![uri], Vec::new());
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.buffers.close(&uri);
        let on_disk = uri
            .to_file_path()
            .map(|path| path.exists())
            .unwrap_or(false);
        if on_disk {
            // Re-read from disk; the document stays in the workspace.
            self.schedule_update(Some((uri.clone(), false)), vec![uri], Vec::new());
        } else {
            self.schedule_update(None, Vec::new(), vec![uri]);
        }
    }

    async fn hover(&self, params: HoverParams) -> jsonrpc::Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let hover = self
            .workspace
            .query(ReadPriority::Normal, move |registry| {
                let doc = registry.get(&uri)?;
                let statement = doc
                    .tree()?
                    .statement_at(position.line, position.character)?;
                let contents = match statement.keyword {
                    Keyword::Def => {
                        format!("Defines `{}`.", statement.name)
                    }
                    Keyword::Use => match reference_resolution(doc, statement) {
                        Some(Resolution::Resolved { uri: target, .. }) => {
                            format!("Resolves to `{}` in {}.", statement.name, target)
                        }
                        Some(Resolution::Error { message }) => message,
                        None => format!("Reference to `{}`.", statement.name),
                    },
                };
                Some((contents, name_range(statement)))
            })
            .await
            .map_err(internal_error)?;
        Ok(hover.map(|(contents, range)| Hover {
            contents: HoverContents::Scalar(MarkedString::String(contents)),
            range: Some(range),
        }))
    }

    async fn completion(
        &self,
        params: CompletionParams,
    ) -> jsonrpc::Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let index = Arc::clone(&self.index);
        let names = self
            .workspace
            .query(ReadPriority::Immediate, move |registry| {
                let mut names: BTreeSet<String> = index.exported_names().into_iter().collect();
                if let Some(symbols) = registry.get(&uri).and_then(|doc| doc.local_symbols()) {
                    names.extend(symbols.iter().map(|symbol| symbol.name.clone()));
                }
                names
            })
            .await
            .map_err(internal_error)?;
        let items: Vec<CompletionItem> = names
            .into_iter()
            .map(|label| CompletionItem {
                label,
                kind: Some(CompletionItemKind::VALUE),
                ..CompletionItem::default()
            })
            .collect();
        Ok(Some(CompletionResponse::Array(items)))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> jsonrpc::Result<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let location = self
            .workspace
            .query(ReadPriority::Normal, move |registry| {
                let doc = registry.get(&uri)?;
                let statement = doc
                    .tree()?
                    .statement_at(position.line, position.character)?;
                let (target_uri, symbol) = match statement.keyword {
                    Keyword::Def => (uri.clone(), statement.name.clone()),
                    Keyword::Use => match reference_resolution(doc, statement) {
                        Some(Resolution::Resolved { uri, symbol }) => (uri, symbol),
                        _ => return None,
                    },
                };
                definition_location(registry, &target_uri, &symbol)
            })
            .await
            .map_err(internal_error)?;
        Ok(location.map(GotoDefinitionResponse::Scalar))
    }

    async fn references(&self, params: ReferenceParams) -> jsonrpc::Result<Option<Vec<Location>>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let include_declaration = params.context.include_declaration;
        let index = Arc::clone(&self.index);
        let locations = self
            .workspace
            .query(ReadPriority::Normal, move |registry| {
                let doc = registry.get(&uri)?;
                let statement = doc
                    .tree()?
                    .statement_at(position.line, position.character)?;
                let (target_uri, symbol) = match statement.keyword {
                    Keyword::Def => (uri.clone(), statement.name.clone()),
                    Keyword::Use => match reference_resolution(doc, statement) {
                        Some(Resolution::Resolved { uri, symbol }) => (uri, symbol),
                        _ => return None,
                    },
                };
                let mut locations = Vec::new();
                if include_declaration {
                    locations.extend(definition_location(registry, &target_uri, &symbol));
                }
                for record in index.find_references(&target_uri, &symbol) {
                    let range = registry
                        .get(&record.source)
                        .and_then(|source| source.tree())
                        .and_then(|tree| {
                            tree.statements.iter().find(|candidate| {
                                candidate.line == record.line && candidate.name == record.symbol
                            })
                        })
                        .map(name_range)
                        .unwrap_or_else(|| line_range(record.line));
                    locations.push(Location {
                        uri: record.source,
                        range,
                    });
                }
                Some(locations)
            })
            .await
            .map_err(internal_error)?;
        Ok(locations)
    }
}

fn reference_resolution(
    doc: &strata_engine::Document<NotationTree>,
    statement: &Statement,
) -> Option<Resolution> {
    doc.outgoing_references()?
        .iter()
        .find(|record| record.line == statement.line && record.name == statement.name)
        .map(|record| record.resolution.clone())
}

fn definition_location(
    registry: &strata_engine::DocumentRegistry<NotationTree>,
    target_uri: &Url,
    symbol: &str,
) -> Option<Location> {
    let target = registry.get(target_uri)?;
    let declared = target.local_symbols()?.get(symbol)?;
    let range = target
        .tree()
        .and_then(|tree| {
            tree.definitions()
                .find(|candidate| candidate.line == declared.line && candidate.name == symbol)
        })
        .map(name_range)
        .unwrap_or_else(|| line_range(declared.line));
    Some(Location {
        uri: target_uri.clone(),
        range,
    })
}

fn name_range(statement: &Statement) -> Range {
    Range::new(
        Position::new(statement.line, statement.name_start),
        Position::new(statement.line, statement.name_end),
    )
}

fn line_range(line: u32) -> Range {
    Range::new(Position::new(line, 0), Position::new(line, 0))
}

fn to_lsp_diagnostic(diagnostic: &Diagnostic) -> tower_lsp::lsp_types::Diagnostic {
    let severity = match diagnostic.severity {
        Severity::Error => DiagnosticSeverity::ERROR,
        Severity::Warning => DiagnosticSeverity::WARNING,
        Severity::Information => DiagnosticSeverity::INFORMATION,
    };
    tower_lsp::lsp_types::Diagnostic {
        range: Range::new(
            Position::new(diagnostic.line, diagnostic.col_start),
            Position::new(diagnostic.line, diagnostic.col_end),
        ),
        severity: Some(severity),
        code: Some(NumberOrString::String(diagnostic.category.clone())),
        source: Some("strata".to_string()),
        message: diagnostic.message.clone(),
        ..tower_lsp::lsp_types::Diagnostic::default()
    }
}

fn internal_error(err: strata_engine::EngineError) -> jsonrpc::Error {
    let mut error = jsonrpc::Error::internal_error();
    error.message = err.to_string().into();
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tower_lsp::lsp_types::{
        PartialResultParams, ReferenceContext, TextDocumentIdentifier, TextDocumentItem,
        TextDocumentPositionParams, VersionedTextDocumentIdentifier, WorkDoneProgressParams,
    };

    #[derive(Default)]
    struct RecordingSink {
        published: Mutex<Vec<(Url, Vec<tower_lsp::lsp_types::Diagnostic>, Option<i32>)>>,
    }

    impl RecordingSink {
        fn latest_for(&self, uri: &Url) -> Option<Vec<tower_lsp::lsp_types::Diagnostic>> {
            self.published
                .lock()
                .iter()
                .rev()
                .find(|(published, _, _)| published == uri)
                .map(|(_, diagnostics, _)| diagnostics.clone())
        }
    }

    #[async_trait]
    impl DiagnosticsSink for Arc<RecordingSink> {
        async fn publish(
            &self,
            uri: Url,
            diagnostics: Vec<tower_lsp::lsp_types::Diagnostic>,
            version: Option<i32>,
        ) {
            self.published.lock().push((uri, diagnostics, version));
        }
    }

    fn uri(name: &str) -> Url {
        Url::parse(&format!("inmemory:///{}.ntn", name)).expect("valid uri")
    }

    fn server_with_sink() -> (NotationLanguageServer, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let server = NotationLanguageServer::with_sink(Arc::clone(&sink));
        (server, sink)
    }

    async fn open(server: &NotationLanguageServer, uri: &Url, text: &str) {
        server
            .did_open(DidOpenTextDocumentParams {
                text_document: TextDocumentItem {
                    uri: uri.clone(),
                    language_id: "strata".into(),
                    version: 1,
                    text: text.into(),
                },
            })
            .await;
        server
            .workspace()
            .builder()
            .wait_until(DocumentState::Validated, Some(uri))
            .await
            .expect("document validates");
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within the timeout");
    }

    fn position_params(uri: &Url, line: u32, character: u32) -> TextDocumentPositionParams {
        TextDocumentPositionParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            position: Position::new(line, character),
        }
    }

    #[tokio::test]
    async fn publishes_diagnostics_for_unresolved_references() {
        let (server, sink) = server_with_sink();
        let app = uri("app");
        open(&server, &app, "use greeting\n").await;

        wait_for(|| {
            sink.latest_for(&app)
                .is_some_and(|diagnostics| diagnostics.len() == 1)
        })
        .await;
        let diagnostics = sink.latest_for(&app).expect("diagnostics published");
        assert!(diagnostics[0].message.contains("greeting"));
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::ERROR));
    }

    #[tokio::test]
    async fn edits_resolve_previously_broken_references() {
        let (server, sink) = server_with_sink();
        let app = uri("app");
        open(&server, &app, "use greeting\n").await;
        wait_for(|| sink.latest_for(&app).is_some_and(|d| d.len() == 1)).await;

        server
            .did_change(DidChangeTextDocumentParams {
                text_document: VersionedTextDocumentIdentifier {
                    uri: app.clone(),
                    version: 2,
                },
                content_changes: vec![tower_lsp::lsp_types::TextDocumentContentChangeEvent {
                    range: None,
                    range_length: None,
                    text: "def greeting\nuse greeting\n".into(),
                }],
            })
            .await;

        wait_for(|| sink.latest_for(&app).is_some_and(|d| d.is_empty())).await;
    }

    #[tokio::test]
    async fn hover_describes_definitions_and_references() {
        let (server, _sink) = server_with_sink();
        let lib = uri("lib");
        open(&server, &lib, "def greeting\nuse greeting\n").await;

        let hover = server
            .hover(HoverParams {
                text_document_position_params: position_params(&lib, 0, 6),
                work_done_progress_params: WorkDoneProgressParams::default(),
            })
            .await
            .expect("hover call succeeds")
            .expect("hover result");
        match hover.contents {
            HoverContents::Scalar(MarkedString::String(text)) => {
                assert!(text.contains("greeting"));
            }
            other => panic!("unexpected hover contents: {:?}", other),
        }
    }

    #[tokio::test]
    async fn completion_offers_symbols_across_documents() {
        let (server, _sink) = server_with_sink();
        let lib = uri("lib");
        let app = uri("app");
        open(&server, &lib, "def greeting\n").await;
        open(&server, &app, "use greeting\n").await;

        let completion = server
            .completion(CompletionParams {
                text_document_position: position_params(&app, 0, 4),
                work_done_progress_params: WorkDoneProgressParams::default(),
                partial_result_params: PartialResultParams::default(),
                context: None,
            })
            .await
            .expect("completion call succeeds")
            .expect("completion result");
        let labels: Vec<String> = match completion {
            CompletionResponse::Array(items) => {
                items.into_iter().map(|item| item.label).collect()
            }
            other => panic!("unexpected completion response: {:?}", other),
        };
        assert!(labels.contains(&"greeting".to_string()));
    }

    #[tokio::test]
    async fn goto_definition_crosses_documents() {
        let (server, _sink) = server_with_sink();
        let lib = uri("lib");
        let app = uri("app");
        open(&server, &lib, "def greeting\n").await;
        open(&server, &app, "use greeting\n").await;

        let response = server
            .goto_definition(GotoDefinitionParams {
                text_document_position_params: position_params(&app, 0, 5),
                work_done_progress_params: WorkDoneProgressParams::default(),
                partial_result_params: PartialResultParams::default(),
            })
            .await
            .expect("definition call succeeds")
            .expect("definition found");
        match response {
            GotoDefinitionResponse::Scalar(location) => {
                assert_eq!(location.uri, lib);
                assert_eq!(location.range.start.line, 0);
                assert_eq!(location.range.start.character, 4);
            }
            other => panic!("unexpected definition response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn closing_a_disk_backed_document_reverts_to_disk_content() {
        let (server, sink) = server_with_sink();
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("lib.ntn");
        std::fs::write(&path, "def greeting\n").expect("fixture file written");
        let lib = Url::from_file_path(&path).expect("file url");

        // The open buffer shadows the file with broken content.
        open(&server, &lib, "use missing\n").await;
        wait_for(|| sink.latest_for(&lib).is_some_and(|d| d.len() == 1)).await;

        server
            .did_close(DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier { uri: lib.clone() },
            })
            .await;

        // After the close, fetches fall back to the clean on-disk text.
        wait_for(|| sink.latest_for(&lib).is_some_and(|d| d.is_empty())).await;
        let still_tracked = server
            .workspace()
            .query(ReadPriority::Normal, {
                let lib = lib.clone();
                move |registry| registry.contains(&lib)
            })
            .await
            .expect("query succeeds");
        assert!(still_tracked);
    }

    #[tokio::test]
    async fn closing_an_in_memory_document_deletes_it() {
        let (server, sink) = server_with_sink();
        let app = uri("app");
        open(&server, &app, "use missing\n").await;
        wait_for(|| sink.latest_for(&app).is_some_and(|d| d.len() == 1)).await;

        server
            .did_close(DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier { uri: app.clone() },
            })
            .await;

        wait_for(|| sink.latest_for(&app).is_some_and(|d| d.is_empty())).await;
        let tracked = server
            .workspace()
            .query(ReadPriority::Normal, {
                let app = app.clone();
                move |registry| registry.contains(&app)
            })
            .await
            .expect("query succeeds");
        assert!(!tracked);
    }

    #[tokio::test]
    async fn references_list_every_recorded_use() {
        let (server, _sink) = server_with_sink();
        let lib = uri("lib");
        let app = uri("app");
        open(&server, &lib, "def greeting\n").await;
        open(&server, &app, "use greeting\n").await;

        let locations = server
            .references(ReferenceParams {
                text_document_position: position_params(&lib, 0, 5),
                work_done_progress_params: WorkDoneProgressParams::default(),
                partial_result_params: PartialResultParams::default(),
                context: ReferenceContext {
                    include_declaration: true,
                },
            })
            .await
            .expect("references call succeeds")
            .expect("references found");
        assert_eq!(locations.len(), 2);
        assert!(locations.iter().any(|location| location.uri == lib));
        assert!(locations.iter().any(|location| location.uri == app));
    }
}
