use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use reqwest::{
    Method,
    StatusCode,
    blocking::{Client, RequestBuilder, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    Engine,
    EngineKind,
    LANGUAGE_FACET_LIMIT,
    PAGE_SIZE,
    page_offset,
};
use crate::{
    config::RemoteSettings,
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
};

/// Attribute names on the remote index. They match the JSON encoding of
/// [`Document`].
pub mod attributes {
    pub const ID: &str = "id";
    pub const OWNER_ID: &str = "owner_id";
    pub const VISIBILITY: &str = "visibility";
    pub const OWNER_NAME: &str = "owner_name";
    pub const TITLE: &str = "title";
    pub const BODY: &str = "body";
    pub const FILENAMES: &str = "filenames";
    pub const EXTENSIONS: &str = "extensions";
    pub const LANGUAGES: &str = "languages";
    pub const TOPICS: &str = "topics";

    pub const FILTERABLE: [&str; 8] = [
        OWNER_ID, VISIBILITY, OWNER_NAME, TITLE, FILENAMES, EXTENSIONS,
        LANGUAGES, TOPICS,
    ];

    pub const SEARCHABLE: [&str; 7] = [
        BODY, OWNER_NAME, TITLE, FILENAMES, EXTENSIONS, LANGUAGES, TOPICS,
    ];
}

const TASK_POLL_START: Duration = Duration::from_millis(10);
const TASK_POLL_MAX: Duration = Duration::from_millis(250);

/// Gist search delegated to a Meilisearch-compatible HTTP service.
pub struct RemoteEngine {
    client: Client,
    host: String,
    api_key: Option<String>,
    index: String,
    task_timeout: Duration,
    closed: AtomicBool,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRef {
    task_uid: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TaskStatus {
    Enqueued,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

#[derive(Debug, Deserialize)]
struct Task {
    status: TaskStatus,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateIndex<'a> {
    uid: &'a str,
    primary_key: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AttributeSettings<'a> {
    filterable_attributes: &'a [&'a str],
    searchable_attributes: &'a [&'a str],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    q: &'a str,
    filter: &'a str,
    offset: usize,
    limit: usize,
    facets: &'a [&'a str],
    attributes_to_retrieve: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    attributes_to_search_on: Option<&'a [&'a str]>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    id: DocumentId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    hits: Vec<Hit>,
    #[serde(default)]
    estimated_total_hits: u64,
    #[serde(default)]
    facet_distribution: HashMap<String, HashMap<String, u64>>,
}

/// Escape a value for use inside a double-quoted filter string.
pub fn escape_filter_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Build the filter expression for a search.
///
/// The access clause is always present. In per-field mode every set filter
/// adds an equality clause; all clauses are joined with `AND`. In "all" mode
/// only the access clause is emitted because the text goes to the native
/// text query instead (see [`search_text`]).
pub fn build_filter(filter: &SearchFilter, user_id: u64) -> String {
    let mut clauses = vec![format!(
        "({} = {VISIBILITY_PUBLIC} OR {} = {user_id})",
        attributes::VISIBILITY,
        attributes::OWNER_ID,
    )];

    if filter.mode() == SearchMode::Fields {
        let extension = dotted_extension(&filter.extension);
        let per_field = [
            (attributes::OWNER_NAME, filter.owner_name.as_str()),
            (attributes::TITLE, filter.title.as_str()),
            (attributes::FILENAMES, filter.filename.as_str()),
            (
                attributes::EXTENSIONS,
                if is_set(&filter.extension) {
                    extension.as_str()
                } else {
                    ""
                },
            ),
            (attributes::LANGUAGES, filter.language.as_str()),
            (attributes::TOPICS, filter.topic.as_str()),
        ];
        for (attribute, value) in per_field {
            if is_set(value) {
                clauses.push(format!(
                    "{attribute} = \"{}\"",
                    escape_filter_value(value.trim())
                ));
            }
        }
    }

    clauses.join(" AND ")
}

/// The native text query and the attributes it searches.
///
/// Per-field mode searches the body only; the content filter joins the free
/// text because the body is not filterable. "All" mode searches the value on
/// every searchable attribute.
pub fn search_text(
    query: &str,
    filter: &SearchFilter,
) -> (String, Option<&'static [&'static str]>) {
    const BODY_ONLY: &[&str] = &[attributes::BODY];

    let (extra, restrict) = match filter.mode() {
        SearchMode::All(value) => (value, None),
        SearchMode::Fields => (filter.content.as_str(), Some(BODY_ONLY)),
    };
    let text = [query, extra]
        .into_iter()
        .filter(|part| is_set(part))
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ");
    (text, restrict)
}

fn top_languages(
    mut distribution: HashMap<String, HashMap<String, u64>>,
) -> HashMap<String, u64> {
    let mut counts: Vec<(String, u64)> = distribution
        .remove(attributes::LANGUAGES)
        .unwrap_or_default()
        .into_iter()
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts.truncate(LANGUAGE_FACET_LIMIT);
    counts.into_iter().collect()
}

impl RemoteEngine {
    /// Connect to the service and make sure the gist index exists.
    pub fn connect(settings: &RemoteSettings) -> Result<Self> {
        if settings.host.trim().is_empty() {
            return Err(Error::Config(format!(
                "{} is required for the remote engine",
                crate::config::keys::REMOTE_HOST
            )));
        }
        let index = settings.index_name.clone();
        if index.is_empty()
            || !index
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Config(format!(
                "invalid remote index name: {index:?}"
            )));
        }

        let client = Client::builder().timeout(settings.timeout).build()?;
        let engine = Self {
            client,
            host: settings.host.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
            index,
            task_timeout: settings.timeout,
            closed: AtomicBool::new(false),
        };
        engine.ensure_index()?;
        Ok(engine)
    }

    fn ensure_index(&self) -> Result<()> {
        let response = self
            .request(Method::GET, &format!("/indexes/{}", self.index))
            .send()?;
        if response.status() != StatusCode::NOT_FOUND {
            check(response)?;
            info!(host = %self.host, index = %self.index, "opened remote index");
            return Ok(());
        }

        let created = self
            .request(Method::POST, "/indexes")
            .json(&CreateIndex {
                uid: &self.index,
                primary_key: attributes::ID,
            })
            .send()?;
        self.wait_for(created)?;

        let configured = self
            .request(Method::PATCH, &format!("/indexes/{}/settings", self.index))
            .json(&AttributeSettings {
                filterable_attributes: &attributes::FILTERABLE,
                searchable_attributes: &attributes::SEARCHABLE,
            })
            .send()?;
        self.wait_for(configured)?;

        info!(host = %self.host, index = %self.index, "created remote index");
        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder =
            self.client.request(method, format!("{}{}", self.host, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::NotInitialized)
        } else {
            Ok(())
        }
    }

    /// Writes are queued as tasks on the service; block until the task
    /// finishes so failures reach the caller.
    fn wait_for(&self, response: Response) -> Result<()> {
        let TaskRef { task_uid } = check(response)?.json()?;
        let deadline = Instant::now() + self.task_timeout;
        let mut delay = TASK_POLL_START;

        loop {
            let task: Task = check(
                self.request(Method::GET, &format!("/tasks/{task_uid}"))
                    .send()?,
            )?
            .json()?;

            match task.status {
                TaskStatus::Succeeded => return Ok(()),
                TaskStatus::Failed | TaskStatus::Canceled => {
                    let message = task
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| format!("{:?}", task.status));
                    return Err(Error::RemoteTask {
                        task: task_uid,
                        message,
                    });
                }
                TaskStatus::Enqueued | TaskStatus::Processing => {}
            }

            if Instant::now() >= deadline {
                return Err(Error::RemoteTask {
                    task: task_uid,
                    message: "timed out waiting for task".to_string(),
                });
            }
            thread::sleep(delay);
            delay = (delay * 2).min(TASK_POLL_MAX);
        }
    }
}

fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body: ApiError = response.json().unwrap_or_default();
    Err(Error::Remote {
        status: status.as_u16(),
        code: body.code,
        message: body.message,
    })
}

impl Engine for RemoteEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Remote
    }

    fn add(&self, document: &Document) -> Result<()> {
        self.add_all(std::slice::from_ref(document))
    }

    fn add_all(&self, documents: &[Document]) -> Result<()> {
        self.ensure_open()?;
        if documents.is_empty() {
            return Ok(());
        }
        let response = self
            .request(
                Method::POST,
                &format!(
                    "/indexes/{}/documents?primaryKey={}",
                    self.index,
                    attributes::ID
                ),
            )
            .json(documents)
            .send()?;
        self.wait_for(response)?;
        debug!(count = documents.len(), "indexed gists remotely");
        Ok(())
    }

    fn remove(&self, id: DocumentId) -> Result<()> {
        self.ensure_open()?;
        let response = self
            .request(
                Method::DELETE,
                &format!("/indexes/{}/documents/{id}", self.index),
            )
            .send()?;
        self.wait_for(response)?;
        debug!(id, "removed gist remotely");
        Ok(())
    }

    fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
        user_id: u64,
        page: usize,
    ) -> Result<SearchResults> {
        let filter_expression = build_filter(filter, user_id);
        let (text, restrict) = search_text(query, filter);

        let request = SearchRequest {
            q: &text,
            filter: &filter_expression,
            offset: page_offset(page),
            limit: PAGE_SIZE + 1,
            facets: &[attributes::LANGUAGES],
            attributes_to_retrieve: &[attributes::ID, attributes::LANGUAGES],
            attributes_to_search_on: restrict,
        };
        debug!(filter = %filter_expression, q = %text, "remote search");

        let response: SearchResponse = check(
            self.request(Method::POST, &format!("/indexes/{}/search", self.index))
                .json(&request)
                .send()?,
        )?
        .json()?;

        Ok(SearchResults {
            ids: response.hits.into_iter().map(|hit| hit.id).collect(),
            total: response.estimated_total_hits,
            language_facets: top_languages(response.facet_distribution),
        })
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        info!(index = %self.index, "closed remote index");
        Ok(())
    }
}

impl std::fmt::Debug for RemoteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEngine")
            .field("host", &self.host)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Split a filter expression into its top-level `AND` clauses, honoring
    /// quoted strings and escapes.
    fn top_level_clauses(expression: &str) -> Vec<String> {
        let mut clauses = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut escaped = false;
        let mut depth = 0usize;
        let mut rest = expression;

        while let Some(c) = rest.chars().next() {
            if !in_quotes && depth == 0 && rest.starts_with(" AND ") {
                clauses.push(std::mem::take(&mut current));
                rest = &rest[" AND ".len()..];
                continue;
            }
            match c {
                _ if escaped => escaped = false,
                '\\' if in_quotes => escaped = true,
                '"' => in_quotes = !in_quotes,
                '(' if !in_quotes => depth += 1,
                ')' if !in_quotes => depth -= 1,
                _ => {}
            }
            current.push(c);
            rest = &rest[c.len_utf8()..];
        }
        clauses.push(current);
        clauses
    }

    #[test]
    fn access_clause_is_always_present() {
        let expression = build_filter(&SearchFilter::default(), 11);
        assert_eq!(expression, "(visibility = 0 OR owner_id = 11)");
    }

    #[test]
    fn per_field_clauses_are_anded() {
        let filter = SearchFilter {
            owner_name: "alice".to_string(),
            extension: "rs".to_string(),
            language: "Rust".to_string(),
            topic: ".".to_string(),
            ..Default::default()
        };
        let expression = build_filter(&filter, 3);
        assert_eq!(
            expression,
            "(visibility = 0 OR owner_id = 3) AND owner_name = \"alice\" \
             AND extensions = \".rs\" AND languages = \"Rust\""
        );
    }

    #[test]
    fn escaping_keeps_injection_inside_one_clause() {
        let filter = SearchFilter {
            title: "x\" OR visibility = 1 OR title = \"y".to_string(),
            ..Default::default()
        };
        let expression = build_filter(&filter, 3);
        let clauses = top_level_clauses(&expression);

        assert_eq!(clauses.len(), 2, "{expression}");
        assert_eq!(
            clauses[1],
            "title = \"x\\\" OR visibility = 1 OR title = \\\"y\""
        );
    }

    #[test]
    fn escaping_doubles_backslashes_first() {
        assert_eq!(escape_filter_value(r#"a\"b"#), r#"a\\\"b"#);
        assert_eq!(escape_filter_value(r"C:\dir\"), r"C:\\dir\\");

        let filter = SearchFilter {
            filename: "trailing\\".to_string(),
            ..Default::default()
        };
        let clauses = top_level_clauses(&build_filter(&filter, 0));
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[1], "filenames = \"trailing\\\\\"");
    }

    #[test]
    fn all_mode_moves_text_to_query() {
        let filter = SearchFilter {
            all: "tokio".to_string(),
            title: "ignored".to_string(),
            ..Default::default()
        };
        assert_eq!(
            build_filter(&filter, 1),
            "(visibility = 0 OR owner_id = 1)"
        );
        let (text, restrict) = search_text("runtime", &filter);
        assert_eq!(text, "runtime tokio");
        assert!(restrict.is_none());
    }

    #[test]
    fn content_filter_joins_body_query() {
        let filter = SearchFilter {
            content: "spawn".to_string(),
            ..Default::default()
        };
        let (text, restrict) = search_text("", &filter);
        assert_eq!(text, "spawn");
        assert_eq!(restrict, Some(&[attributes::BODY][..]));
    }

    #[test]
    fn facets_are_capped() {
        let languages: HashMap<String, u64> =
            (0..15).map(|i| (format!("lang{i:02}"), i as u64)).collect();
        let distribution =
            HashMap::from([(attributes::LANGUAGES.to_string(), languages)]);

        let top = top_languages(distribution);
        assert_eq!(top.len(), LANGUAGE_FACET_LIMIT);
        assert!(top.contains_key("lang14"));
        assert!(!top.contains_key("lang00"));
    }
}
