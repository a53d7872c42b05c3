//! Search engines behind the indexer registry.
//!
//! Both engines answer the same contract: upsert by document ID, delete by
//! document ID, and an access-filtered, paginated search that reports a
//! total and a language facet.

pub mod embedded;
pub mod remote;

use std::{fmt, str::FromStr};

pub use embedded::EmbeddedEngine;
pub use remote::RemoteEngine;

use crate::{
    document::{Document, DocumentId, SearchFilter, SearchResults},
    error::{Error, Result},
};

/// Hits per page. Engines fetch one extra hit beyond this.
pub const PAGE_SIZE: usize = 10;

/// Number of distinct languages reported in the facet.
pub const LANGUAGE_FACET_LIMIT: usize = 10;

/// Offset of the first hit of a 1-based page. Page 0 is treated as page 1.
pub fn page_offset(page: usize) -> usize {
    page.max(1).saturating_sub(1).saturating_mul(PAGE_SIZE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Embedded,
    Remote,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Embedded => "embedded",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embedded" => Ok(Self::Embedded),
            "remote" => Ok(Self::Remote),
            other => Err(Error::Config(format!("unknown engine type: {other}"))),
        }
    }
}

/// A concrete search backend.
///
/// Implementations are shared between threads behind an `Arc` and must
/// tolerate concurrent calls. `close` may run while other threads still hold
/// the engine; writes after `close` fail with [`Error::NotInitialized`].
pub trait Engine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Insert the document, replacing any document with the same ID.
    fn add(&self, document: &Document) -> Result<()>;

    /// Insert a batch of documents with the same replace semantics as
    /// [`Engine::add`].
    fn add_all(&self, documents: &[Document]) -> Result<()> {
        for document in documents {
            self.add(document)?;
        }
        Ok(())
    }

    /// Delete a document. Deleting an unknown ID succeeds.
    fn remove(&self, id: DocumentId) -> Result<()>;

    fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
        user_id: u64,
        page: usize,
    ) -> Result<SearchResults>;

    fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_offsets() {
        assert_eq!(page_offset(0), 0);
        assert_eq!(page_offset(1), 0);
        assert_eq!(page_offset(2), 10);
        assert_eq!(page_offset(5), 40);
    }

    #[test]
    fn page_offset_saturates() {
        assert_eq!(page_offset(usize::MAX), usize::MAX);
        assert_eq!(page_offset(usize::MAX / 2), usize::MAX);
    }

    #[test]
    fn engine_kind_parses_case_insensitively() {
        assert_eq!(
            "Embedded".parse::<EngineKind>().unwrap(),
            EngineKind::Embedded
        );
        assert_eq!(" remote ".parse::<EngineKind>().unwrap(), EngineKind::Remote);
        assert!("bleve".parse::<EngineKind>().is_err());
    }
}
