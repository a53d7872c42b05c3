use std::{
    collections::HashMap,
    path::Path,
    sync::{Mutex, PoisonError},
};

use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    TantivyDocument,
    Term,
    collector::{Count, FacetCollector, FacetCounts, TopDocs},
    directory::MmapDirectory,
    query::{
        BooleanQuery,
        EmptyQuery,
        FuzzyTermQuery,
        Occur,
        PhraseQuery,
        Query,
        TermQuery,
    },
    schema::*,
};
use tracing::{debug, info};

use super::{
    Engine,
    EngineKind,
    LANGUAGE_FACET_LIMIT,
    PAGE_SIZE,
    page_offset,
};
use crate::{
    document::{
        Document,
        DocumentId,
        SearchFilter,
        SearchMode,
        SearchResults,
        VISIBILITY_PUBLIC,
        dotted_extension,
        is_set,
    },
    error::{Error, Result},
    tokenizer::{self, GIST_TOKENIZER},
};

/// Field names used in the schema.
pub mod fields {
    pub const KEY: &str = "key";
    pub const GIST_ID: &str = "gist_id";
    pub const OWNER_ID: &str = "owner_id";
    pub const VISIBILITY: &str = "visibility";
    pub const OWNER_NAME: &str = "owner_name";
    pub const TITLE: &str = "title";
    pub const BODY: &str = "body";
    pub const FILENAMES: &str = "filenames";
    pub const EXTENSIONS: &str = "extensions";
    pub const LANGUAGES: &str = "languages";
    pub const TOPICS: &str = "topics";
    pub const LANGUAGE_FACET: &str = "language_facet";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
}

/// Levenshtein distance tolerated by fuzzy field matches.
const FUZZINESS: u8 = 2;

const WRITER_MEMORY_BUDGET: usize = 15_000_000;

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
pub struct SchemaFields {
    pub key: Field,
    pub gist_id: Field,
    pub owner_id: Field,
    pub visibility: Field,
    pub owner_name: Field,
    pub title: Field,
    pub body: Field,
    pub filenames: Field,
    pub extensions: Field,
    pub languages: Field,
    pub topics: Field,
    pub language_facet: Field,
    pub created_at: Field,
    pub updated_at: Field,
}

impl SchemaFields {
    fn resolve(schema: &Schema) -> Result<Self> {
        Ok(Self {
            key: schema.get_field(fields::KEY)?,
            gist_id: schema.get_field(fields::GIST_ID)?,
            owner_id: schema.get_field(fields::OWNER_ID)?,
            visibility: schema.get_field(fields::VISIBILITY)?,
            owner_name: schema.get_field(fields::OWNER_NAME)?,
            title: schema.get_field(fields::TITLE)?,
            body: schema.get_field(fields::BODY)?,
            filenames: schema.get_field(fields::FILENAMES)?,
            extensions: schema.get_field(fields::EXTENSIONS)?,
            languages: schema.get_field(fields::LANGUAGES)?,
            topics: schema.get_field(fields::TOPICS)?,
            language_facet: schema.get_field(fields::LANGUAGE_FACET)?,
            created_at: schema.get_field(fields::CREATED_AT)?,
            updated_at: schema.get_field(fields::UPDATED_AT)?,
        })
    }
}

fn text_options() -> TextOptions {
    TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(GIST_TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    )
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    builder.add_text_field(fields::KEY, STRING);
    builder.add_u64_field(fields::GIST_ID, FAST);
    builder.add_u64_field(fields::OWNER_ID, INDEXED | FAST);
    builder.add_u64_field(fields::VISIBILITY, INDEXED | FAST);
    for name in [
        fields::OWNER_NAME,
        fields::TITLE,
        fields::BODY,
        fields::FILENAMES,
        fields::EXTENSIONS,
        fields::LANGUAGES,
        fields::TOPICS,
    ] {
        builder.add_text_field(name, text_options());
    }
    builder.add_facet_field(fields::LANGUAGE_FACET, FacetOptions::default());
    builder.add_i64_field(fields::CREATED_AT, FAST);
    builder.add_i64_field(fields::UPDATED_AT, FAST);

    builder.build()
}

enum WriterSlot {
    /// No write has happened yet; the writer lock is not held.
    Idle,
    Open(IndexWriter),
    Closed,
}

/// Gist search over a local Tantivy index.
///
/// The index writer is created on the first write so that a replacement
/// engine can open the same directory while the engine it replaces is still
/// published.
pub struct EmbeddedEngine {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
    writer: Mutex<WriterSlot>,
}

impl EmbeddedEngine {
    /// Open the index at `dir`, creating it if it does not exist yet.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let directory = MmapDirectory::open(dir)?;
        let exists = Index::exists(&directory)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if exists {
            Index::open(directory)?
        } else {
            Index::create(
                directory,
                build_schema(),
                tantivy::IndexSettings::default(),
            )?
        };

        info!(path = %dir.display(), created = !exists, "opened embedded index");
        Self::from_index(index)
    }

    /// Create an in-memory index (for testing).
    pub fn open_in_ram() -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    fn from_index(index: Index) -> Result<Self> {
        tokenizer::register(&index);
        let fields = SchemaFields::resolve(&index.schema())?;
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            fields,
            writer: Mutex::new(WriterSlot::Idle),
        })
    }

    fn with_writer<T>(
        &self,
        f: impl FnOnce(&mut IndexWriter) -> Result<T>,
    ) -> Result<T> {
        let mut slot = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*slot, WriterSlot::Idle) {
            *slot = WriterSlot::Open(self.index.writer(WRITER_MEMORY_BUDGET)?);
        }
        match &mut *slot {
            WriterSlot::Open(writer) => f(writer),
            _ => Err(Error::NotInitialized),
        }
    }

    /// Queue the replacement of `document` on the writer. Nothing is visible
    /// until the writer commits.
    fn stage(&self, writer: &IndexWriter, document: &Document) -> Result<()> {
        let f = self.fields;
        let key = document.id.to_string();

        // Delete any existing document with this ID first.
        writer.delete_term(Term::from_field_text(f.key, &key));

        let mut doc = TantivyDocument::default();
        doc.add_text(f.key, &key);
        doc.add_u64(f.gist_id, document.id);
        doc.add_u64(f.owner_id, document.owner_id);
        doc.add_u64(f.visibility, document.visibility);
        doc.add_text(f.owner_name, &document.owner_name);
        doc.add_text(f.title, &document.title);
        doc.add_text(f.body, &document.body);
        for filename in &document.filenames {
            doc.add_text(f.filenames, filename);
        }
        for extension in &document.extensions {
            doc.add_text(f.extensions, extension);
        }
        for language in &document.languages {
            doc.add_text(f.languages, language);
        }
        for topic in &document.topics {
            doc.add_text(f.topics, topic);
        }

        // A gist with several files in one language counts once.
        let mut languages: Vec<&str> = document
            .languages
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect();
        languages.sort_unstable();
        languages.dedup();
        for language in languages {
            doc.add_facet(f.language_facet, Facet::from_path([language]));
        }

        doc.add_i64(f.created_at, document.created_at);
        doc.add_i64(f.updated_at, document.updated_at);

        writer.add_document(doc)?;
        Ok(())
    }

    fn build_query(
        &self,
        text: &str,
        filter: &SearchFilter,
        user_id: u64,
    ) -> Box<dyn Query> {
        let f = self.fields;
        let mut clauses: Vec<(Occur, Box<dyn Query>)> =
            vec![(Occur::Must, access_query(f, user_id))];

        match filter.mode() {
            SearchMode::All(value) => {
                let alternatives: Vec<(Occur, Box<dyn Query>)> = [
                    phrase_query(f.owner_name, value),
                    fuzzy_query(f.title, value),
                    fuzzy_query(f.body, value),
                    phrase_query(f.extensions, &dotted_extension(value)),
                    fuzzy_query(f.filenames, value),
                    phrase_query(f.languages, value),
                    phrase_query(f.topics, value),
                ]
                .into_iter()
                .flatten()
                .map(|q| (Occur::Should, q))
                .collect();

                let any_field: Box<dyn Query> = if alternatives.is_empty() {
                    Box::new(EmptyQuery)
                } else {
                    Box::new(BooleanQuery::new(alternatives))
                };
                clauses.push((Occur::Must, any_field));
            }
            SearchMode::Fields => {
                let per_field = [
                    (filter.owner_name.as_str(), f.owner_name, Match::Phrase),
                    (filter.title.as_str(), f.title, Match::Fuzzy),
                    (filter.content.as_str(), f.body, Match::Fuzzy),
                    (filter.filename.as_str(), f.filenames, Match::Fuzzy),
                    (filter.extension.as_str(), f.extensions, Match::Phrase),
                    (filter.language.as_str(), f.languages, Match::Phrase),
                    (filter.topic.as_str(), f.topics, Match::Phrase),
                ];
                for (value, field, kind) in per_field {
                    if !is_set(value) {
                        continue;
                    }
                    let value = if field == f.extensions {
                        dotted_extension(value)
                    } else {
                        value.to_string()
                    };
                    let query = match kind {
                        Match::Phrase => phrase_query(field, &value),
                        Match::Fuzzy => fuzzy_query(field, &value),
                    };
                    clauses.push((Occur::Must, or_nothing(query)));
                }
            }
        }

        if is_set(text) {
            clauses.push((Occur::Must, or_nothing(fuzzy_query(f.body, text))));
        }

        Box::new(BooleanQuery::new(clauses))
    }
}

#[derive(Clone, Copy)]
enum Match {
    Phrase,
    Fuzzy,
}

/// `visibility == public OR owner_id == user_id`.
fn access_query(f: SchemaFields, user_id: u64) -> Box<dyn Query> {
    let public = TermQuery::new(
        Term::from_field_u64(f.visibility, VISIBILITY_PUBLIC),
        IndexRecordOption::Basic,
    );
    let owned = TermQuery::new(
        Term::from_field_u64(f.owner_id, user_id),
        IndexRecordOption::Basic,
    );
    Box::new(BooleanQuery::new(vec![
        (Occur::Should, Box::new(public)),
        (Occur::Should, Box::new(owned)),
    ]))
}

/// Exact token sequence match. `None` when `value` has no tokens.
fn phrase_query(field: Field, value: &str) -> Option<Box<dyn Query>> {
    let mut terms: Vec<(usize, Term)> = tokenizer::analyze(value)
        .into_iter()
        .map(|(position, text)| (position, Term::from_field_text(field, &text)))
        .collect();

    match terms.len() {
        0 => None,
        1 => {
            let (_, term) = terms.remove(0);
            Some(Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs)))
        }
        _ => Some(Box::new(PhraseQuery::new_with_offset(terms))),
    }
}

/// Any token of `value` within [`FUZZINESS`] edits. `None` when `value` has
/// no tokens.
fn fuzzy_query(field: Field, value: &str) -> Option<Box<dyn Query>> {
    let clauses: Vec<(Occur, Box<dyn Query>)> = tokenizer::analyze(value)
        .into_iter()
        .map(|(_, text)| {
            let term = Term::from_field_text(field, &text);
            let fuzzy: Box<dyn Query> =
                Box::new(FuzzyTermQuery::new(term, FUZZINESS, true));
            (Occur::Should, fuzzy)
        })
        .collect();

    if clauses.is_empty() {
        None
    } else {
        Some(Box::new(BooleanQuery::new(clauses)))
    }
}

/// A filter that analyzes to nothing cannot match any document.
fn or_nothing(query: Option<Box<dyn Query>>) -> Box<dyn Query> {
    query.unwrap_or_else(|| Box::new(EmptyQuery))
}

fn language_facets(counts: &FacetCounts) -> HashMap<String, u64> {
    counts
        .top_k("/", LANGUAGE_FACET_LIMIT)
        .into_iter()
        .filter_map(|(facet, count)| {
            facet
                .to_path()
                .last()
                .map(|language| (language.to_string(), count))
        })
        .collect()
}

impl Engine for EmbeddedEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Embedded
    }

    fn add(&self, document: &Document) -> Result<()> {
        self.with_writer(|writer| {
            self.stage(writer, document)?;
            writer.commit()?;
            Ok(())
        })?;
        debug!(id = document.id, "indexed gist");
        Ok(())
    }

    fn add_all(&self, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        self.with_writer(|writer| {
            for document in documents {
                self.stage(writer, document)?;
            }
            writer.commit()?;
            Ok(())
        })?;
        debug!(count = documents.len(), "indexed gist batch");
        Ok(())
    }

    fn remove(&self, id: DocumentId) -> Result<()> {
        let f = self.fields;
        self.with_writer(|writer| {
            writer.delete_term(Term::from_field_text(f.key, &id.to_string()));
            writer.commit()?;
            Ok(())
        })?;
        debug!(id, "removed gist");
        Ok(())
    }

    fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
        user_id: u64,
        page: usize,
    ) -> Result<SearchResults> {
        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let query = self.build_query(query, filter, user_id);

        let mut facets = FacetCollector::for_field(fields::LANGUAGE_FACET);
        facets.add_facet("/");

        // Past the last document no hit can land on the page, and TopDocs
        // would still size its heap by the offset.
        let offset = page_offset(page);
        if offset as u64 >= searcher.num_docs() {
            let (total, facet_counts) =
                searcher.search(&*query, &(Count, facets))?;
            return Ok(SearchResults {
                ids: Vec::new(),
                total: total as u64,
                language_facets: language_facets(&facet_counts),
            });
        }

        let collectors = (
            TopDocs::with_limit(PAGE_SIZE + 1).and_offset(offset),
            Count,
            facets,
        );
        let (top_docs, total, facet_counts) =
            searcher.search(&*query, &collectors)?;

        let mut ids = Vec::with_capacity(top_docs.len());
        for (_score, doc_address) in top_docs {
            let gist_ids = searcher
                .segment_reader(doc_address.segment_ord)
                .fast_fields()
                .u64(fields::GIST_ID)?;
            if let Some(id) = gist_ids.first(doc_address.doc_id) {
                ids.push(id);
            }
        }

        Ok(SearchResults {
            ids,
            total: total as u64,
            language_facets: language_facets(&facet_counts),
        })
    }

    fn close(&self) -> Result<()> {
        let mut slot = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let WriterSlot::Open(writer) =
            std::mem::replace(&mut *slot, WriterSlot::Closed)
        {
            writer.wait_merging_threads()?;
        }
        info!("closed embedded index");
        Ok(())
    }
}

impl std::fmt::Debug for EmbeddedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedEngine").finish_non_exhaustive()
    }
}
