//! The backend-neutral entry point to gist search.
//!
//! The registry owns the currently active engine behind a shared handle.
//! Every operation clones the handle and then runs without holding any
//! lock, so a concurrent [`IndexerRegistry::initialize`] never blocks
//! readers; they finish against the engine they started with.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::IndexSettings,
    document::{Document, DocumentId, SearchFilter, SearchResults},
    engine::{EmbeddedEngine, Engine, EngineKind, RemoteEngine},
    error::{Error, Result},
};

/// Outcome of [`IndexerRegistry::add_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkSummary {
    pub added: usize,
    /// Documents rejected before reaching the engine, with the reason.
    pub skipped: Vec<(DocumentId, String)>,
}

pub struct IndexerRegistry {
    settings: IndexSettings,
    active: RwLock<Option<Arc<dyn Engine>>>,
}

impl IndexerRegistry {
    /// Create a registry with no active engine. Call
    /// [`initialize_configured`](Self::initialize_configured) or
    /// [`initialize`](Self::initialize) before use.
    pub fn new(settings: IndexSettings) -> Self {
        Self {
            settings,
            active: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    /// Whether configuration selects a known engine. When false every
    /// operation is a no-op and searches return nothing.
    pub fn is_enabled(&self) -> bool {
        self.settings.is_enabled()
    }

    /// Kind of the currently published engine, if any.
    pub fn active_kind(&self) -> Option<EngineKind> {
        self.snapshot().map(|engine| engine.kind())
    }

    /// Initialize the engine selected by configuration. Does nothing when
    /// search is disabled.
    pub fn initialize_configured(&self) -> Result<()> {
        match self.settings.engine {
            Some(kind) => self.initialize(kind),
            None => {
                info!("search indexing is disabled");
                Ok(())
            }
        }
    }

    /// Open an engine of the given kind and publish it, replacing the active
    /// one. If opening fails the active engine stays in place.
    pub fn initialize(&self, kind: EngineKind) -> Result<()> {
        let opened: Result<Arc<dyn Engine>> = match kind {
            EngineKind::Embedded => EmbeddedEngine::open(&self.settings.index_dir)
                .map(|engine| Arc::new(engine) as Arc<dyn Engine>),
            EngineKind::Remote => RemoteEngine::connect(&self.settings.remote)
                .map(|engine| Arc::new(engine) as Arc<dyn Engine>),
        };
        let engine = opened.map_err(|e| {
            Error::backend("initialize", format!("{kind} engine"), e)
        })?;

        self.publish(engine);
        Ok(())
    }

    /// Publish an already opened engine, replacing the active one.
    pub fn install(&self, engine: Arc<dyn Engine>) {
        self.publish(engine);
    }

    fn publish(&self, engine: Arc<dyn Engine>) {
        let kind = engine.kind();
        let previous = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(engine);
        info!(%kind, "search engine published");

        if let Some(previous) = previous {
            if let Err(e) = previous.close() {
                warn!(kind = %previous.kind(), error = %e, "failed to close replaced engine");
            }
        }
    }

    /// Detach the active engine and release its resources.
    pub fn shutdown(&self) -> Result<()> {
        let detached = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match detached {
            Some(engine) => {
                let kind = engine.kind();
                engine.close().map_err(|e| {
                    Error::backend("shutdown", format!("{kind} engine"), e)
                })?;
                info!(%kind, "search engine shut down");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn snapshot(&self) -> Option<Arc<dyn Engine>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `Ok(None)` when disabled, the active engine otherwise.
    fn engine(&self) -> Result<Option<Arc<dyn Engine>>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        self.snapshot().map(Some).ok_or(Error::NotInitialized)
    }

    pub fn add(&self, document: &Document) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        validate(document)?;
        let Some(engine) = self.engine()? else {
            return Ok(());
        };
        engine
            .add(document)
            .map_err(wrap("add", || format!("gist {}", document.id)))
    }

    /// Add many documents, skipping (and reporting) those that fail
    /// validation.
    pub fn add_all(&self, documents: &[Document]) -> Result<BulkSummary> {
        let mut summary = BulkSummary::default();
        if !self.is_enabled() {
            return Ok(summary);
        }

        let mut valid = Vec::with_capacity(documents.len());
        for document in documents {
            match validate(document) {
                Ok(()) => valid.push(document.clone()),
                Err(e) => {
                    warn!(id = document.id, error = %e, "skipping gist");
                    summary.skipped.push((document.id, e.to_string()));
                }
            }
        }

        let Some(engine) = self.engine()? else {
            return Ok(summary);
        };
        engine
            .add_all(&valid)
            .map_err(wrap("add", || format!("{} gists", valid.len())))?;
        summary.added = valid.len();
        debug!(
            added = summary.added,
            skipped = summary.skipped.len(),
            "bulk add finished"
        );
        Ok(summary)
    }

    pub fn remove(&self, id: DocumentId) -> Result<()> {
        let Some(engine) = self.engine()? else {
            return Ok(());
        };
        engine.remove(id).map_err(wrap("remove", || format!("gist {id}")))
    }

    /// Search gists visible to `user_id`. `page` is 1-based.
    pub fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
        user_id: u64,
        page: usize,
    ) -> Result<SearchResults> {
        let Some(engine) = self.engine()? else {
            return Ok(SearchResults::default());
        };
        engine
            .search(query, filter, user_id, page)
            .map_err(wrap("search", || format!("query {query:?} page {page}")))
    }
}

impl std::fmt::Debug for IndexerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerRegistry")
            .field("settings", &self.settings)
            .field("active", &self.active_kind())
            .finish()
    }
}

fn validate(document: &Document) -> Result<()> {
    if document.id == 0 {
        return Err(Error::InvalidInput("gist document has no ID".to_string()));
    }
    Ok(())
}

/// Attach operation context to engine failures. An engine closed under an
/// in-flight call reports `NotInitialized`, which passes through unchanged.
fn wrap(
    operation: &'static str,
    subject: impl FnOnce() -> String,
) -> impl FnOnce(Error) -> Error {
    move |e| match e {
        Error::NotInitialized => Error::NotInitialized,
        e => Error::backend(operation, subject(), e),
    }
}
