//! gistindex - access-controlled, faceted search over gists.
//!
//! Gists are indexed through an [`IndexerRegistry`] that forwards to one of
//! two engines: an embedded [Tantivy](https://github.com/quickwit-oss/tantivy)
//! index on local disk, or a remote Meilisearch-compatible service. Every
//! search is restricted to gists the caller may see, is paginated ten hits
//! at a time and reports how many matches each language has.
//!
//! # Quick start
//!
//! ```no_run
//! use gistindex::{ConfigDb, DataDir, IndexSettings, IndexerRegistry};
//! use gistindex::{Document, SearchFilter};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let config_db = ConfigDb::open(&data_dir.config_db()).unwrap();
//! let settings = IndexSettings::load(&config_db, &data_dir).unwrap();
//!
//! let registry = IndexerRegistry::new(settings);
//! registry.initialize_configured().unwrap();
//!
//! registry
//!     .add(&Document {
//!         id: 1,
//!         title: "Hello".to_string(),
//!         ..Default::default()
//!     })
//!     .unwrap();
//!
//! let results = registry
//!     .search("hello", &SearchFilter::default(), 0, 1)
//!     .unwrap();
//! println!("{} matches: {:?}", results.total, results.ids);
//! ```

pub mod config;
pub mod config_db;
pub mod data_dir;
pub mod document;
pub mod engine;
pub mod error;
pub mod registry;
pub mod tokenizer;

pub use config::{IndexSettings, RemoteSettings};
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use document::{
    Document,
    DocumentId,
    GistFile,
    SearchFilter,
    SearchMode,
    SearchResults,
};
pub use engine::{EmbeddedEngine, Engine, EngineKind, PAGE_SIZE, RemoteEngine};
pub use error::{Error, Result};
pub use registry::{BulkSummary, IndexerRegistry};
