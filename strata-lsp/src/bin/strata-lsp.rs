use strata_lsp::NotationLanguageServer;
use tokio::io::{stdin, stdout};
use tower_lsp::{LspService, Server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Stdout carries the LSP protocol; logs must go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let (service, socket) = LspService::new(NotationLanguageServer::new);
    Server::new(stdin(), stdout(), socket).serve(service).await;
}
