use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
};

use gistindex::{
    DataDir,
    Document,
    EngineKind,
    Error,
    IndexSettings,
    IndexerRegistry,
    SearchFilter,
};

fn embedded_registry(tmp: &tempfile::TempDir) -> IndexerRegistry {
    let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
    let registry = IndexerRegistry::new(IndexSettings::embedded(data_dir.index_dir()));
    registry.initialize_configured().unwrap();
    registry
}

fn gist(id: u64, owner_id: u64, visibility: u64, title: &str) -> Document {
    Document {
        id,
        owner_id,
        visibility,
        owner_name: format!("user{owner_id}"),
        title: title.to_string(),
        body: format!("{title} snippet"),
        ..Default::default()
    }
}

fn by_title(title: &str) -> SearchFilter {
    SearchFilter {
        title: title.to_string(),
        ..Default::default()
    }
}

#[test]
fn upsert_leaves_one_document_with_latest_title() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = embedded_registry(&tmp);

    registry.add(&gist(42, 1, 0, "original")).unwrap();
    registry.add(&gist(42, 1, 0, "replacement")).unwrap();

    let all = registry.search("snippet", &SearchFilter::default(), 0, 1).unwrap();
    assert_eq!(all.ids, vec![42]);
    assert_eq!(all.total, 1);

    assert_eq!(
        registry.search("", &by_title("replacement"), 0, 1).unwrap().ids,
        vec![42]
    );
    assert!(
        registry
            .search("", &by_title("original"), 0, 1)
            .unwrap()
            .ids
            .is_empty()
    );
}

#[test]
fn private_gist_is_visible_to_owner_only() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = embedded_registry(&tmp);

    registry.add(&gist(1, 11, 1, "private dotfiles")).unwrap();
    registry.add(&gist(2, 11, 0, "public dotfiles")).unwrap();

    let filter = by_title("dotfiles");

    let mut owner = registry.search("", &filter, 11, 1).unwrap().ids;
    owner.sort_unstable();
    assert_eq!(owner, vec![1, 2]);

    let other = registry.search("", &filter, 999, 1).unwrap();
    assert_eq!(other.ids, vec![2]);
    assert_eq!(other.total, 1);
}

#[test]
fn facets_count_only_visible_gists() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = embedded_registry(&tmp);

    let languages = ["Go", "Rust", "Python"];
    let documents: Vec<Document> = (1..=1000)
        .map(|id| {
            let language = languages[(id % 3) as usize];
            Document {
                languages: vec![language.to_string()],
                ..gist(id, 1, u64::from(language != "Rust"), "sample")
            }
        })
        .collect();
    let public_rust = documents
        .iter()
        .filter(|d| d.is_public())
        .count() as u64;

    let summary = registry.add_all(&documents).unwrap();
    assert_eq!(summary.added, 1000);
    assert!(summary.skipped.is_empty());

    let results = registry.search("", &SearchFilter::default(), 999, 1).unwrap();
    assert_eq!(results.total, public_rust);
    assert_eq!(
        results.language_facets,
        HashMap::from([("Rust".to_string(), public_rust)])
    );

    // The owner sees every language.
    let owner = registry.search("", &SearchFilter::default(), 1, 1).unwrap();
    assert_eq!(owner.total, 1000);
    assert_eq!(owner.language_facets.len(), 3);
}

#[test]
fn pagination_is_deterministic() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = embedded_registry(&tmp);

    let documents: Vec<Document> =
        (1..=25).map(|id| gist(id, 1, 0, "paged")).collect();
    registry.add_all(&documents).unwrap();

    let filter = by_title("paged");
    let first = registry.search("", &filter, 0, 1).unwrap();
    let second = registry.search("", &filter, 0, 2).unwrap();

    assert_eq!(first.total, 25);
    assert_eq!(second.total, 25);
    assert_eq!(first.ids.len(), 11);
    assert!(first.has_next_page(10));

    let first_page: HashSet<u64> = first.ids.iter().take(10).copied().collect();
    let second_page: HashSet<u64> = second.ids.iter().take(10).copied().collect();
    assert_eq!(first_page.len(), 10);
    assert_eq!(second_page.len(), 10);
    assert!(first_page.is_disjoint(&second_page));

    // The lookahead hit of page 1 is the first hit of page 2.
    assert_eq!(first.ids[10], second.ids[0]);

    let third = registry.search("", &filter, 0, 3).unwrap();
    assert_eq!(third.ids.len(), 5);
    assert!(!third.has_next_page(10));

    let beyond = registry.search("", &filter, 0, 4).unwrap();
    assert!(beyond.ids.is_empty());
    assert_eq!(beyond.total, 25);

    let absurd = registry.search("", &filter, 0, usize::MAX / 2).unwrap();
    assert!(absurd.ids.is_empty());
    assert_eq!(absurd.total, 25);

    // Page 0 is treated as page 1.
    assert_eq!(registry.search("", &filter, 0, 0).unwrap().ids, first.ids);
}

#[test]
fn blank_and_sentinel_filters_do_not_constrain() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = embedded_registry(&tmp);
    for id in 1..=3 {
        registry.add(&gist(id, 1, 0, "anything")).unwrap();
    }

    let unfiltered = registry.search("", &SearchFilter::default(), 0, 1).unwrap();
    let sentinel = SearchFilter {
        all: ".".to_string(),
        owner_name: String::new(),
        title: ".".to_string(),
        content: "  ".to_string(),
        filename: ".".to_string(),
        extension: ".".to_string(),
        language: String::new(),
        topic: ".".to_string(),
    };
    let filtered = registry.search("", &sentinel, 0, 1).unwrap();
    assert_eq!(unfiltered.total, 3);
    assert_eq!(filtered.total, unfiltered.total);
}

#[test]
fn disabled_registry_accepts_everything_and_finds_nothing() {
    let registry = IndexerRegistry::new(IndexSettings::disabled());
    registry.initialize_configured().unwrap();

    registry.add(&gist(1, 1, 0, "ignored")).unwrap();
    registry.add(&Document::default()).unwrap();
    registry.remove(1).unwrap();

    let results = registry
        .search("ignored", &by_title("ignored"), 1, 3)
        .unwrap();
    assert!(results.ids.is_empty());
    assert_eq!(results.total, 0);
    assert!(results.language_facets.is_empty());
}

#[test]
fn operations_fail_until_initialized_and_after_shutdown() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
    let registry = IndexerRegistry::new(IndexSettings::embedded(data_dir.index_dir()));
    assert!(registry.is_enabled());

    assert!(
        registry
            .search("", &SearchFilter::default(), 0, 1)
            .unwrap_err()
            .is_not_initialized()
    );
    assert!(registry.remove(1).unwrap_err().is_not_initialized());

    registry.initialize_configured().unwrap();
    registry.add(&gist(1, 1, 0, "alive")).unwrap();
    registry.shutdown().unwrap();

    assert!(registry.is_enabled());
    assert!(
        registry
            .add(&gist(2, 1, 0, "late"))
            .unwrap_err()
            .is_not_initialized()
    );

    // Data written before shutdown survives re-initialization.
    registry.initialize(EngineKind::Embedded).unwrap();
    assert_eq!(
        registry.search("", &by_title("alive"), 0, 1).unwrap().ids,
        vec![1]
    );
}

#[test]
fn nil_document_is_invalid_input() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = embedded_registry(&tmp);

    let err = registry.add(&Document::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn reinitialize_while_searching() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = Arc::new(embedded_registry(&tmp));
    registry.add(&gist(1, 1, 0, "stable")).unwrap();

    let stop = AtomicBool::new(false);
    let searches = AtomicUsize::new(0);
    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                while !stop.load(Ordering::Relaxed) {
                    let results = registry
                        .search("", &by_title("stable"), 0, 1)
                        .unwrap();
                    assert_eq!(results.ids, vec![1]);
                    searches.fetch_add(1, Ordering::Relaxed);
                }
            });
        }

        for _ in 0..5 {
            registry.initialize(EngineKind::Embedded).unwrap();
        }
        while searches.load(Ordering::Relaxed) < 20 {
            thread::yield_now();
        }
        stop.store(true, Ordering::Relaxed);
    });

    // The last engine published can write to the shared directory.
    registry.add(&gist(2, 1, 0, "stable")).unwrap();
    assert_eq!(
        registry.search("", &by_title("stable"), 0, 1).unwrap().total,
        2
    );
}

#[test]
fn failed_reinitialize_keeps_serving() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = embedded_registry(&tmp);
    registry.add(&gist(5, 1, 0, "survivor")).unwrap();

    // The remote engine has no host configured and cannot start.
    assert!(registry.initialize(EngineKind::Remote).is_err());

    assert_eq!(registry.active_kind(), Some(EngineKind::Embedded));
    assert_eq!(
        registry.search("", &by_title("survivor"), 0, 1).unwrap().ids,
        vec![5]
    );
    registry.add(&gist(6, 1, 0, "survivor")).unwrap();
}

#[test]
fn extension_and_language_filters() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = embedded_registry(&tmp);

    let rust = Document {
        id: 1,
        title: "server".to_string(),
        ..Default::default()
    }
    .with_files(&[gistindex::GistFile {
        filename: "main.rs".to_string(),
        language: "Rust".to_string(),
        content: "fn main() { serve(); }".to_string(),
    }]);
    let go = Document {
        id: 2,
        title: "server".to_string(),
        ..Default::default()
    }
    .with_files(&[gistindex::GistFile {
        filename: "main.go".to_string(),
        language: "Go".to_string(),
        content: "func main() { serve() }".to_string(),
    }]);
    registry.add_all(&[rust, go]).unwrap();

    let filter = SearchFilter {
        extension: "rs".to_string(),
        ..Default::default()
    };
    assert_eq!(registry.search("", &filter, 0, 1).unwrap().ids, vec![1]);

    let filter = SearchFilter {
        language: "Go".to_string(),
        ..Default::default()
    };
    assert_eq!(registry.search("serve", &filter, 0, 1).unwrap().ids, vec![2]);

    // Every per-field filter must hold.
    let filter = SearchFilter {
        language: "Go".to_string(),
        extension: ".rs".to_string(),
        ..Default::default()
    };
    assert!(registry.search("", &filter, 0, 1).unwrap().ids.is_empty());
}
