use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The GISTINDEX_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/gistindex/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("GISTINDEX_DATA_DIR") {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("gistindex")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join("config.redb")
    }

    /// Default location of the embedded engine's index.
    pub fn index_dir(&self) -> PathBuf {
        self.root.join("index")
    }

    /// Resolve a configured path: relative paths live under the data
    /// directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}
