use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

/// Stable identity of an indexed gist. Re-adding the same ID replaces the
/// previous document.
pub type DocumentId = u64;

/// Filter value that callers send when a field was left blank in a form.
pub const SENTINEL: &str = ".";

/// Visibility value for gists anyone may see. Every other value restricts
/// the gist to its owner.
pub const VISIBILITY_PUBLIC: u64 = 0;

/// The indexed representation of a gist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Document {
    pub id: DocumentId,
    pub owner_id: u64,
    pub visibility: u64,
    pub owner_name: String,
    pub title: String,
    pub body: String,
    pub filenames: Vec<String>,
    pub extensions: Vec<String>,
    pub languages: Vec<String>,
    pub topics: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One file of a gist, as handed over by the repository layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GistFile {
    pub filename: String,
    pub language: String,
    pub content: String,
}

impl Document {
    /// Fill the per-file fields and the body from the gist's files.
    ///
    /// Extensions keep their leading dot (`main.rs` gives `.rs`); files
    /// without an extension contribute an empty string so the sequences stay
    /// aligned with `filenames`.
    pub fn with_files(mut self, files: &[GistFile]) -> Self {
        self.filenames = files.iter().map(|f| f.filename.clone()).collect();
        self.extensions = files
            .iter()
            .map(|f| {
                Path::new(&f.filename)
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| format!(".{e}"))
                    .unwrap_or_default()
            })
            .collect();
        self.languages = files.iter().map(|f| f.language.clone()).collect();
        self.body = files
            .iter()
            .map(|f| f.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self
    }

    pub fn is_public(&self) -> bool {
        self.visibility == VISIBILITY_PUBLIC
    }
}

/// Per-request filter metadata.
///
/// When `all` is set it overrides every per-field filter: the text is
/// matched against every text-bearing field with OR semantics. Otherwise
/// each set field constrains the results and all of them must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilter {
    pub all: String,
    pub owner_name: String,
    pub title: String,
    pub content: String,
    pub filename: String,
    pub extension: String,
    pub language: String,
    pub topic: String,
}

/// Which of the two mutually exclusive search modes a filter selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode<'a> {
    All(&'a str),
    Fields,
}

impl SearchFilter {
    pub fn mode(&self) -> SearchMode<'_> {
        if is_set(&self.all) {
            SearchMode::All(&self.all)
        } else {
            SearchMode::Fields
        }
    }
}

/// A filter value constrains the query unless it is empty or the sentinel.
pub fn is_set(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != SENTINEL
}

/// Extensions are indexed with their leading dot; accept either form from
/// callers.
pub fn dotted_extension(value: &str) -> String {
    let value = value.trim();
    if value.starts_with('.') {
        value.to_string()
    } else {
        format!(".{value}")
    }
}

/// One page of search hits, normalized across engines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResults {
    /// Hits of the requested page, plus at most one extra hit so callers can
    /// tell whether a next page exists.
    pub ids: Vec<DocumentId>,
    /// Exact (embedded) or estimated (remote) number of matching documents.
    pub total: u64,
    pub language_facets: HashMap<String, u64>,
}

impl SearchResults {
    pub fn has_next_page(&self, page_size: usize) -> bool {
        self.ids.len() > page_size
    }
}
