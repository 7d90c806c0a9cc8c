//! Keyed document storage behind a trait so the indexers stay independent
//! of the backing store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::indexer::documents::Document;

#[async_trait]
pub trait DocumentStore<D: Document>: Send + Sync {
    async fn find_by_key(&self, key: &str) -> Option<D>;

    /// Upserts the document under its own key.
    async fn save(&self, document: D);

    async fn count(&self) -> usize;
}

/// Process-local store used by the default wiring and the tests.
pub struct InMemoryStore<D: Document> {
    documents: Mutex<HashMap<String, D>>,
}

impl<D: Document> InMemoryStore<D> {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
        }
    }
}

impl<D: Document> Default for InMemoryStore<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<D: Document> DocumentStore<D> for InMemoryStore<D> {
    async fn find_by_key(&self, key: &str) -> Option<D> {
        self.documents
            .lock()
            .expect("store lock poisoned")
            .get(key)
            .cloned()
    }

    async fn save(&self, document: D) {
        self.documents
            .lock()
            .expect("store lock poisoned")
            .insert(document.key().to_string(), document);
    }

    async fn count(&self) -> usize {
        self.documents.lock().expect("store lock poisoned").len()
    }
}
