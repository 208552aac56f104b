//! The notation front end: a deliberately small language that exercises
//! every collaborator seam of the strata engine.
//!
//! A notation document is a sequence of lines:
//!
//! ```text
//! # a comment
//! def greeting
//! use greeting
//! use other_document_symbol
//! ```
//!
//! `def` declares a symbol and exports it workspace-wide; `use` references
//! a symbol, resolving locally first and through the global index second.
//! That is just enough surface for cross-document links, invalidation and
//! category-tagged validation to be observable end to end, which is what
//! the LSP server, the CLI and the integration tests need.
//!
//! Module layout mirrors the processing order: [`lexer`] tokenizes a line,
//! [`parser`] assembles the tree, [`index`] holds the workspace-global
//! symbol and reference records, [`services`] adapts everything to the
//! engine's collaborator traits.

pub mod ast;
pub mod index;
pub mod lexer;
pub mod parser;
pub mod services;

pub use ast::{Keyword, NotationTree, Statement};
pub use index::{RecordedReference, SymbolIndex};
pub use services::{
    FileTextSource, NotationFrontEnd, DUPLICATES_CATEGORY, REFERENCES_CATEGORY, STYLE_CATEGORY,
};
