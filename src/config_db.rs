use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::error::{Error, Result};

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// Environment variable that overrides a setting key:
/// `index.remote.api-key` becomes `GISTINDEX_INDEX_REMOTE_API_KEY`.
pub fn env_var_name(key: &str) -> String {
    format!(
        "GISTINDEX_{}",
        key.to_ascii_uppercase().replace(['.', '-'], "_")
    )
}

/// The environment variable overriding `key` and its value, if it is set.
pub fn env_override(key: &str) -> Option<(String, String)> {
    let name = env_var_name(key);
    std::env::var(&name).ok().map(|value| (name, value))
}

fn checked_key(key: &str) -> Result<&str> {
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(Error::InvalidInput(format!(
            "invalid setting key {key:?}"
        )));
    }
    Ok(key)
}

/// Persistent key/value settings for the indexer, overridable from the
/// environment.
pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Store `value` under `key`, returning the value it replaced.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<Option<String>> {
        let key = checked_key(key)?;
        let txn = self.db.begin_write()?;
        let previous = txn
            .open_table(SETTINGS)?
            .insert(key, value)?
            .map(|old| old.value().to_string());
        txn.commit()?;
        Ok(previous)
    }

    /// The stored value of `key`, ignoring the environment.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let key = checked_key(key)?;
        let table = self.db.begin_read()?.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|value| value.value().to_string()))
    }

    /// Delete `key`, returning the value it held.
    pub fn remove_setting(&self, key: &str) -> Result<Option<String>> {
        let key = checked_key(key)?;
        let txn = self.db.begin_write()?;
        let removed = txn
            .open_table(SETTINGS)?
            .remove(key)?
            .map(|old| old.value().to_string());
        txn.commit()?;
        Ok(removed)
    }

    /// Every stored setting, ordered by key.
    pub fn list_settings(&self) -> Result<BTreeMap<String, String>> {
        let table = self.db.begin_read()?.open_table(SETTINGS)?;
        table
            .iter()?
            .map(|entry| -> Result<(String, String)> {
                let (key, value) = entry?;
                Ok((key.value().to_string(), value.value().to_string()))
            })
            .collect()
    }

    /// Values of `keys` as the indexer sees them: the `GISTINDEX_*`
    /// environment variable when set, the stored value otherwise. Keys with
    /// neither are absent.
    pub fn effective_settings(
        &self,
        keys: &[&str],
    ) -> Result<HashMap<String, String>> {
        let table = self.db.begin_read()?.open_table(SETTINGS)?;
        let mut settings = HashMap::with_capacity(keys.len());
        for &key in keys {
            let value = match env_override(key) {
                Some((_, value)) => Some(value),
                None => table.get(key)?.map(|value| value.value().to_string()),
            };
            if let Some(value) = value {
                settings.insert(key.to_string(), value);
            }
        }
        Ok(settings)
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, ConfigDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();
        (tmp, db)
    }

    #[test]
    fn settings_crud() {
        let (_tmp, db) = test_db();

        assert_eq!(db.get_setting("index").unwrap(), None);

        assert_eq!(db.set_setting("index", "embedded").unwrap(), None);
        assert_eq!(
            db.set_setting("index", "remote").unwrap(),
            Some("embedded".to_string())
        );
        assert_eq!(db.get_setting("index").unwrap(), Some("remote".to_string()));

        db.set_setting("index.remote.host", "http://localhost:7700")
            .unwrap();
        let settings = db.list_settings().unwrap();
        assert_eq!(
            settings.keys().collect::<Vec<_>>(),
            vec!["index", "index.remote.host"]
        );

        assert_eq!(
            db.remove_setting("index").unwrap(),
            Some("remote".to_string())
        );
        assert_eq!(db.remove_setting("index").unwrap(), None);
        assert_eq!(db.get_setting("index").unwrap(), None);
    }

    #[test]
    fn keys_are_trimmed_and_must_not_be_blank() {
        let (_tmp, db) = test_db();

        db.set_setting("  index ", "embedded").unwrap();
        assert_eq!(
            db.get_setting("index").unwrap(),
            Some("embedded".to_string())
        );

        assert!(matches!(
            db.set_setting("   ", "x"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            db.get_setting("index remote"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn environment_overrides_stored_values() {
        let (_tmp, db) = test_db();
        // Keys nothing else reads, so parallel tests see no change.
        let overridden = "test.config-db.overridden";
        let stored_only = "test.config-db.stored-only";
        let unset = "test.config-db.unset";

        db.set_setting(overridden, "stored").unwrap();
        db.set_setting(stored_only, "stored").unwrap();
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var(env_var_name(overridden), "from-env") };

        let settings = db
            .effective_settings(&[overridden, stored_only, unset])
            .unwrap();
        assert_eq!(settings.get(overridden).map(String::as_str), Some("from-env"));
        assert_eq!(settings.get(stored_only).map(String::as_str), Some("stored"));
        assert!(!settings.contains_key(unset));

        assert_eq!(
            env_override(overridden),
            Some((
                "GISTINDEX_TEST_CONFIG_DB_OVERRIDDEN".to_string(),
                "from-env".to_string()
            ))
        );
        // The stored value itself is untouched.
        assert_eq!(
            db.get_setting(overridden).unwrap(),
            Some("stored".to_string())
        );

        unsafe { std::env::remove_var(env_var_name(overridden)) };
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.redb");

        {
            let db = ConfigDb::open(&path).unwrap();
            db.set_setting("index.dirname", "gists").unwrap();
        }

        {
            let db = ConfigDb::open(&path).unwrap();
            assert_eq!(
                db.get_setting("index.dirname").unwrap(),
                Some("gists".to_string())
            );
        }
    }
}
