//! Editor buffer overlay for the text source.
//!
//! Open editor buffers shadow the file system: while a document is open,
//! its text comes from the editor's change notifications; once it closes,
//! fetches fall back to disk.
//!
//! Version handling needs one normalization step. Editor versions order
//! change notifications for a single buffer, and disk reads carry their own
//! synthesized versions; the two sequences are unrelated, so neither can be
//! handed to the engine directly when a document moves between domains
//! (open, edit, close). The overlay therefore issues its own monotonically
//! increasing version per document, bumped exactly when the served text
//! changes, and uses the editor's numbers only to drop out-of-order buffer
//! updates.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use url::Url;

use strata_engine::{EngineError, SourceText, TextSource};
use strata_notation::FileTextSource;

#[derive(Default)]
pub struct BufferStore {
    inner: RwLock<HashMap<Url, SourceText>>,
}

impl BufferStore {
    /// Store an editor buffer. Updates carrying a version at or below the
    /// stored one are dropped as out of order.
    pub fn set(&self, uri: &Url, text: String, version: i32) {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.get(uri) {
            if existing.version >= version {
                tracing::trace!(%uri, version, "ignoring out-of-order buffer update");
                return;
            }
        }
        inner.insert(uri.clone(), SourceText { text, version });
    }

    pub fn close(&self, uri: &Url) {
        self.inner.write().remove(uri);
    }

    pub fn get(&self, uri: &Url) -> Option<SourceText> {
        self.inner.read().get(uri).cloned()
    }
}

/// Editor buffers first, file system second, with overlay-owned versions.
pub struct OverlayTextSource {
    buffers: Arc<BufferStore>,
    fallback: FileTextSource,
    served: Mutex<HashMap<Url, SourceText>>,
}

impl OverlayTextSource {
    pub fn new(buffers: Arc<BufferStore>) -> Self {
        Self {
            buffers,
            fallback: FileTextSource::new(),
            served: Mutex::new(HashMap::new()),
        }
    }
}

impl TextSource for OverlayTextSource {
    fn fetch(&self, uri: &Url) -> Result<SourceText, EngineError> {
        let text = match self.buffers.get(uri) {
            Some(buffered) => buffered.text,
            None => self.fallback.fetch(uri)?.text,
        };
        let mut served = self.served.lock();
        if let Some(previous) = served.get(uri) {
            if previous.text == text {
                return Ok(previous.clone());
            }
        }
        let version = served.get(uri).map_or(1, |previous| previous.version + 1);
        let source = SourceText { text, version };
        served.insert(uri.clone(), source.clone());
        Ok(source)
    }
}
