use std::io::Read;

use clap::Parser;
use gistindex::{
    ConfigDb,
    DataDir,
    Document,
    EngineKind,
    Error,
    IndexSettings,
    IndexerRegistry,
    Result,
    config::keys,
    config_db::env_override,
};
use serde_json::json;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{AddArgs, Cli, Command, ConfigAction, SearchArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("GISTINDEX_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Set { key, value } => {
                config_set(&config_db, &key, &value)?;
            }
            ConfigAction::Unset { key } => {
                config_unset(&config_db, &key)?;
            }
            ConfigAction::Show { json } => {
                config_show(&config_db, json)?;
            }
        },
        Command::Status(args) => {
            let settings = IndexSettings::load(&config_db, &data_dir)?;
            cmd_status(&data_dir, &settings, args.json)?;
        }
        Command::Add(args) => {
            with_registry(&config_db, &data_dir, |registry| {
                cmd_add(registry, &args)
            })?;
        }
        Command::Remove { id } => {
            with_registry(&config_db, &data_dir, |registry| {
                registry.remove(id)?;
                println!("Removed gist {id}");
                Ok(())
            })?;
        }
        Command::Search(args) => {
            with_registry(&config_db, &data_dir, |registry| {
                cmd_search(registry, &args)
            })?;
        }
        Command::Completions(args) => {
            args.generate();
        }
    }

    Ok(())
}

/// Run `f` against a registry initialized from the stored configuration and
/// shut the engine down afterwards, whether `f` succeeded or not.
fn with_registry(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    f: impl FnOnce(&IndexerRegistry) -> Result<()>,
) -> Result<()> {
    let settings = IndexSettings::load(config_db, data_dir)?;
    let registry = IndexerRegistry::new(settings);
    if !registry.is_enabled() {
        warn!(
            "search indexing is disabled; set `{}` to `embedded` or `remote`",
            keys::INDEX
        );
    }
    registry.initialize_configured()?;

    let outcome = f(&registry);
    let shutdown = registry.shutdown();
    outcome.and(shutdown)
}

fn config_set(config_db: &ConfigDb, key: &str, value: &str) -> Result<()> {
    if !keys::ALL.contains(&key) {
        warn!(key, "unknown setting key");
    }
    match config_db.set_setting(key, value)? {
        Some(previous) if key != keys::REMOTE_API_KEY => {
            println!("Set {key} = {value} (was {previous})");
        }
        _ => println!("Set {key} = {value}"),
    }
    Ok(())
}

fn config_unset(config_db: &ConfigDb, key: &str) -> Result<()> {
    if config_db.remove_setting(key)?.is_none() {
        return Err(Error::Config(format!("setting {key:?} is not set")));
    }
    println!("Unset {key}");
    Ok(())
}

fn config_show(config_db: &ConfigDb, json: bool) -> Result<()> {
    let settings = config_db.list_settings()?;

    if json {
        let map: serde_json::Map<String, serde_json::Value> = settings
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        println!("{}", serde_json::Value::Object(map));
    } else if settings.is_empty() {
        println!("No settings stored.");
    } else {
        for (key, value) in &settings {
            let shown = if key == keys::REMOTE_API_KEY {
                "********"
            } else {
                value.as_str()
            };
            match env_override(key) {
                Some((env, _)) => {
                    println!("{key}\t{shown}\t(overridden by {env})");
                }
                None => println!("{key}\t{shown}"),
            }
        }
    }
    Ok(())
}

fn cmd_status(
    data_dir: &DataDir,
    settings: &IndexSettings,
    json: bool,
) -> Result<()> {
    let engine = settings
        .engine
        .map(|kind| kind.as_str())
        .unwrap_or("disabled");

    if json {
        println!(
            "{}",
            json!({
                "data_dir": data_dir.root(),
                "engine": engine,
                "index_dir": settings.index_dir,
                "remote_host": settings.remote.host,
                "remote_index": settings.remote.index_name,
            })
        );
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Engine: {engine}");
        match settings.engine {
            Some(EngineKind::Embedded) => {
                println!("Index directory: {}", settings.index_dir.display());
            }
            Some(EngineKind::Remote) => {
                println!("Remote host: {}", settings.remote.host);
                println!("Remote index: {}", settings.remote.index_name);
            }
            None => {}
        }
    }
    Ok(())
}

fn cmd_add(registry: &IndexerRegistry, args: &AddArgs) -> Result<()> {
    let mut input = String::new();
    if args.input.as_os_str() == "-" {
        std::io::stdin().read_to_string(&mut input)?;
    } else {
        input = std::fs::read_to_string(&args.input)?;
    }

    let documents = parse_documents(&input)?;
    let summary = registry.add_all(&documents)?;

    eprintln!(
        "Indexed {} gist(s), skipped {}",
        summary.added,
        summary.skipped.len()
    );
    for (id, reason) in &summary.skipped {
        eprintln!("  gist {id}: {reason}");
    }
    Ok(())
}

/// Accept a JSON array of documents, or one JSON object per line.
fn parse_documents(input: &str) -> Result<Vec<Document>> {
    if input.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(input)?);
    }
    serde_json::Deserializer::from_str(input)
        .into_iter::<Document>()
        .map(|document| document.map_err(Error::from))
        .collect()
}

fn cmd_search(registry: &IndexerRegistry, args: &SearchArgs) -> Result<()> {
    let filter = args.filter();
    let results =
        registry.search(&args.query, &filter, args.user, args.page)?;

    if args.json {
        println!(
            "{}",
            json!({
                "query": args.query,
                "page": args.page,
                "total": results.total,
                "ids": &results.ids[..results.ids.len().min(gistindex::PAGE_SIZE)],
                "has_next_page": results.has_next_page(gistindex::PAGE_SIZE),
                "languages": results.language_facets,
            })
        );
        return Ok(());
    }

    if results.ids.is_empty() {
        println!("No gists found.");
        return Ok(());
    }
    for id in results.ids.iter().take(gistindex::PAGE_SIZE) {
        println!("{id}");
    }
    println!("\n{} match(es)", results.total);

    let mut languages: Vec<_> = results.language_facets.iter().collect();
    languages.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (language, count) in languages {
        println!("  {language}: {count}");
    }
    if results.has_next_page(gistindex::PAGE_SIZE) {
        println!("More results on page {}", args.page.max(1).saturating_add(1));
    }
    Ok(())
}
