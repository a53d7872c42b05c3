//! Resolution of the indexer's configuration.
//!
//! Settings come from [`ConfigDb::effective_settings`]: the environment
//! first (`GISTINDEX_<KEY>`, see [`env_var_name`]), then the settings table.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::warn;

use crate::{
    config_db::ConfigDb,
    data_dir::DataDir,
    engine::EngineKind,
    error::{Error, Result},
};

/// Setting keys understood by the indexer.
pub mod keys {
    /// Engine selector: `embedded`, `remote` or `disabled`.
    pub const INDEX: &str = "index";
    /// Deprecated: boolean switch that predates [`INDEX`].
    pub const ENABLED: &str = "index.enabled";
    /// Deprecated: location of the embedded index.
    pub const DIRNAME: &str = "index.dirname";
    pub const REMOTE_HOST: &str = "index.remote.host";
    pub const REMOTE_API_KEY: &str = "index.remote.api-key";
    pub const REMOTE_NAME: &str = "index.remote.name";
    pub const REMOTE_TIMEOUT_SECS: &str = "index.remote.timeout-secs";

    pub const ALL: [&str; 7] = [
        INDEX,
        ENABLED,
        DIRNAME,
        REMOTE_HOST,
        REMOTE_API_KEY,
        REMOTE_NAME,
        REMOTE_TIMEOUT_SECS,
    ];
}

pub const DEFAULT_REMOTE_INDEX: &str = "gists";
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

pub use crate::config_db::env_var_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub host: String,
    pub api_key: Option<String>,
    pub index_name: String,
    /// Applies to each HTTP request and to waiting on write tasks.
    pub timeout: Duration,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            api_key: None,
            index_name: DEFAULT_REMOTE_INDEX.to_string(),
            timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSettings {
    /// `None` when search is disabled.
    pub engine: Option<EngineKind>,
    pub index_dir: PathBuf,
    pub remote: RemoteSettings,
}

impl IndexSettings {
    pub fn disabled() -> Self {
        Self {
            engine: None,
            index_dir: PathBuf::new(),
            remote: RemoteSettings::default(),
        }
    }

    pub fn embedded(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine: Some(EngineKind::Embedded),
            index_dir: index_dir.into(),
            remote: RemoteSettings::default(),
        }
    }

    pub fn remote(remote: RemoteSettings) -> Self {
        Self {
            engine: Some(EngineKind::Remote),
            index_dir: PathBuf::new(),
            remote,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.engine.is_some()
    }

    /// Load settings from the environment and the settings database.
    pub fn load(config_db: &ConfigDb, data_dir: &DataDir) -> Result<Self> {
        let settings = config_db.effective_settings(&keys::ALL)?;
        Self::resolve(|key| settings.get(key).cloned(), data_dir)
    }

    /// Resolve settings from a key lookup.
    pub fn resolve(
        lookup: impl Fn(&str) -> Option<String>,
        data_dir: &DataDir,
    ) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let engine = resolve_engine(get(keys::INDEX), get(keys::ENABLED))?;

        let index_dir = match get(keys::DIRNAME) {
            Some(dir) => {
                warn!(
                    key = keys::DIRNAME,
                    "deprecated setting; the index now lives in the data directory"
                );
                data_dir.resolve_path(Path::new(&dir))
            }
            None => data_dir.index_dir(),
        };

        let timeout = match get(keys::REMOTE_TIMEOUT_SECS) {
            Some(secs) => Duration::from_secs(secs.parse().map_err(|_| {
                Error::Config(format!(
                    "{} must be a whole number of seconds, got {secs:?}",
                    keys::REMOTE_TIMEOUT_SECS
                ))
            })?),
            None => DEFAULT_REMOTE_TIMEOUT,
        };

        Ok(Self {
            engine,
            index_dir,
            remote: RemoteSettings {
                host: get(keys::REMOTE_HOST).unwrap_or_default(),
                api_key: get(keys::REMOTE_API_KEY),
                index_name: get(keys::REMOTE_NAME)
                    .unwrap_or_else(|| DEFAULT_REMOTE_INDEX.to_string()),
                timeout,
            },
        })
    }
}

/// The explicit selector wins; the deprecated boolean only applies when no
/// selector is configured. Unknown selectors disable search.
fn resolve_engine(
    selector: Option<String>,
    enabled: Option<String>,
) -> Result<Option<EngineKind>> {
    if let Some(selector) = selector {
        if selector.eq_ignore_ascii_case("disabled") {
            return Ok(None);
        }
        return Ok(match selector.parse() {
            Ok(kind) => Some(kind),
            Err(_) => {
                warn!(value = %selector, "unknown index engine, search is disabled");
                None
            }
        });
    }

    let Some(enabled) = enabled else {
        return Ok(None);
    };
    warn!(
        key = keys::ENABLED,
        "deprecated setting; set `{}` to `embedded` or `disabled` instead",
        keys::INDEX
    );
    Ok(parse_bool(&enabled)?.then_some(EngineKind::Embedded))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "{} must be a boolean, got {other:?}",
            keys::ENABLED
        ))),
    }
}
