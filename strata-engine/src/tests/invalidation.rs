use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::support::{uri, CancelAfterScopes, RecordingParser};
use crate::builder::DocumentBuilder;
use crate::fixture::{Fixture, FixtureTree};
use crate::options::BuildOptions;
use crate::state::DocumentState;

fn setup() -> (Fixture, DocumentBuilder<FixtureTree>) {
    let fixture = Fixture::new();
    let builder = DocumentBuilder::new(fixture.services());
    (fixture, builder)
}

async fn build_validated(
    fixture: &Fixture,
    builder: &DocumentBuilder<FixtureTree>,
    docs: &[(&url::Url, &str)],
) {
    let mut uris = Vec::new();
    for (uri, text) in docs {
        fixture.texts.insert(uri, *text);
        uris.push((*uri).clone());
    }
    builder
        .build(&uris, BuildOptions::validate_all(), &CancellationToken::new())
        .await
        .expect("initial build succeeds");
}

#[tokio::test]
async fn dependents_are_reset_before_the_rebuild_starts() {
    let (fixture, builder) = setup();
    let a = uri("a");
    let b = uri("b");
    build_validated(&fixture, &builder, &[(&a, "def shared\n"), (&b, "use shared\n")]).await;

    // Cancel immediately after the invalidation step: the update call must
    // reject, with the dependent already pulled back from Validated.
    fixture.texts.insert(&a, "def renamed\n");
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let err = builder
        .update(std::slice::from_ref(&a), &[], &cancelled)
        .await
        .expect_err("cancellation surfaces");
    assert!(err.is_cancelled());

    builder
        .inspect(|registry| {
            assert_eq!(
                registry.get(&a).expect("a exists").state(),
                DocumentState::Changed
            );
            assert_eq!(
                registry.get(&b).expect("b exists").state(),
                DocumentState::ComputedScopes
            );
            // The dependent's local declarations survive; its link results
            // do not.
            assert!(registry.get(&b).expect("b exists").local_symbols().is_some());
            assert!(registry
                .get(&b)
                .expect("b exists")
                .outgoing_references()
                .is_none());
        })
        .await;
}

#[tokio::test]
async fn renaming_a_symbol_breaks_its_dependents() {
    let (fixture, builder) = setup();
    let a = uri("a");
    let b = uri("b");
    build_validated(&fixture, &builder, &[(&a, "def shared\n"), (&b, "use shared\n")]).await;

    builder
        .inspect(|registry| {
            assert_eq!(
                registry
                    .get(&b)
                    .expect("b exists")
                    .diagnostics()
                    .map(<[_]>::len),
                Some(0)
            );
        })
        .await;

    fixture.texts.insert(&a, "def renamed\n");
    builder
        .update(std::slice::from_ref(&a), &[], &CancellationToken::new())
        .await
        .expect("update succeeds");

    builder
        .inspect(|registry| {
            let a_doc = registry.get(&a).expect("a exists");
            let b_doc = registry.get(&b).expect("b exists");
            assert_eq!(a_doc.state(), DocumentState::Validated);
            assert_eq!(b_doc.state(), DocumentState::Validated);
            assert_eq!(a_doc.diagnostics().map(<[_]>::len), Some(0));
            let diagnostics = b_doc.diagnostics().expect("b validated");
            assert_eq!(diagnostics.len(), 1);
            assert!(diagnostics[0].message.contains("shared"));
        })
        .await;
}

#[tokio::test]
async fn deleting_a_document_clears_dangling_references() {
    let (fixture, builder) = setup();
    let a = uri("a");
    let b = uri("b");
    build_validated(&fixture, &builder, &[(&a, "def shared\n"), (&b, "use shared\n")]).await;

    fixture.texts.remove(&a);
    builder
        .update(&[], std::slice::from_ref(&a), &CancellationToken::new())
        .await
        .expect("update succeeds");

    assert_eq!(fixture.index.owner_of("shared"), None);
    assert!(fixture.index.referencing_documents(&a).is_empty());
    builder
        .inspect(|registry| {
            assert!(registry.get(&a).is_none());
            let b_doc = registry.get(&b).expect("b exists");
            assert_eq!(b_doc.state(), DocumentState::Validated);
            let diagnostics = b_doc.diagnostics().expect("b validated");
            assert_eq!(diagnostics.len(), 1);
            assert!(diagnostics[0].message.contains("unresolved"));
        })
        .await;
}

#[tokio::test]
async fn documents_with_link_errors_are_relinked_on_any_update() {
    let (fixture, builder) = setup();
    let a = uri("a");
    let b = uri("b");
    build_validated(&fixture, &builder, &[(&b, "use shared\n")]).await;
    builder
        .inspect(|registry| {
            assert!(registry.get(&b).expect("b exists").has_link_errors());
        })
        .await;

    // A new document provides the missing symbol; b carries no dependency
    // edge to it, but its recorded link errors make it a relink candidate.
    fixture.texts.insert(&a, "def shared\n");
    builder
        .update(std::slice::from_ref(&a), &[], &CancellationToken::new())
        .await
        .expect("update succeeds");

    builder
        .inspect(|registry| {
            let b_doc = registry.get(&b).expect("b exists");
            assert_eq!(b_doc.state(), DocumentState::Validated);
            assert!(!b_doc.has_link_errors());
            assert_eq!(b_doc.diagnostics().map(<[_]>::len), Some(0));
        })
        .await;
}

#[tokio::test]
async fn update_cancelled_after_scopes_leaves_both_documents_there() {
    let fixture = Fixture::new();
    let cancel = CancellationToken::new();
    let mut services = fixture.services();
    services.scope_computer = Box::new(CancelAfterScopes {
        inner: Box::new(crate::fixture::FixtureScopeComputer),
        remaining: AtomicUsize::new(2),
        cancel: cancel.clone(),
    });
    let builder = DocumentBuilder::new(services);

    let a = uri("a");
    let b = uri("b");
    fixture.texts.insert(&a, "def alpha\n");
    fixture.texts.insert(&b, "use alpha\n");

    let err = builder
        .update(&[a.clone(), b.clone()], &[], &cancel)
        .await
        .expect_err("cancellation surfaces");
    assert!(err.is_cancelled());

    builder
        .inspect(|registry| {
            assert_eq!(
                registry.get(&a).expect("a exists").state(),
                DocumentState::ComputedScopes
            );
            assert_eq!(
                registry.get(&b).expect("b exists").state(),
                DocumentState::ComputedScopes
            );
        })
        .await;

    // A later update with no new changes picks the interrupted documents
    // up again through their pending build markers.
    builder
        .update(&[], &[], &CancellationToken::new())
        .await
        .expect("resumed update succeeds");
    builder
        .inspect(|registry| {
            assert_eq!(
                registry.get(&a).expect("a exists").state(),
                DocumentState::Validated
            );
            assert_eq!(
                registry.get(&b).expect("b exists").state(),
                DocumentState::Validated
            );
        })
        .await;
}

#[tokio::test]
async fn open_documents_are_rebuilt_first() {
    let fixture = Fixture::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut services = fixture.services();
    services.parser = Box::new(RecordingParser {
        inner: Box::new(crate::fixture::FixtureParser),
        calls: Arc::clone(&calls),
    });
    let builder = DocumentBuilder::new(services);

    let closed = uri("closed");
    let open = uri("open");
    fixture.texts.insert(&closed, "def one\n");
    fixture.texts.insert(&open, "def two\n");
    builder
        .mark_opened(&open, true)
        .await
        .expect("document opens");

    builder
        .update(&[closed.clone(), open.clone()], &[], &CancellationToken::new())
        .await
        .expect("update succeeds");

    let order = calls.lock().clone();
    assert_eq!(order, vec![open.clone(), closed.clone()]);
}

#[tokio::test]
async fn stale_versions_do_not_clobber_newer_content() {
    let (fixture, builder) = setup();
    let a = uri("a");
    build_validated(&fixture, &builder, &[(&a, "def alpha\n")]).await;

    // Same version number as the build above: not newer, so ignored.
    fixture.texts.insert_versioned(&a, "def beta\n", 1);
    builder
        .update(std::slice::from_ref(&a), &[], &CancellationToken::new())
        .await
        .expect("update succeeds");

    builder
        .inspect(|registry| {
            let doc = registry.get(&a).expect("a exists");
            assert_eq!(doc.state(), DocumentState::Validated);
            assert_eq!(doc.content(), "def alpha\n");
            assert_eq!(doc.version(), 1);
        })
        .await;
}
