//! Language Server Protocol front end for the strata engine.
//!
//! The server is a thin adapter: editor notifications become workspace
//! write actions (document sync, invalidation, rebuild), requests become
//! read actions (hover, completion, definitions, references), and build
//! events drive diagnostics publishing. All document state lives in the
//! engine; the only state kept here is the open-buffer overlay that feeds
//! the engine's text source.
//!
//! Latency model: completion runs as an immediate-priority read so a
//! completion popup does not wait behind a queued rebuild; everything else
//! queues normally, which guarantees it observes a consistent workspace.

pub mod buffers;
pub mod server;

pub use buffers::{BufferStore, OverlayTextSource};
pub use server::{DiagnosticsSink, NotationLanguageServer};
