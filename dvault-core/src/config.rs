//! Repository configuration stored at `repo/config.json`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, IoContext, Result};

/// On-disk format written by this version
pub const FORMAT_VERSION: u32 = 1;

const CONFIG_FILE: &str = "config.json";

/// Per-repository settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Layout version of the repository directory.
    pub format_version: u32,
    /// Re-hash blobs when they are read back.
    #[serde(default = "default_verify_on_read")]
    pub verify_on_read: bool,
}

fn default_verify_on_read() -> bool {
    true
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            verify_on_read: default_verify_on_read(),
        }
    }
}

impl RepositoryConfig {
    /// Load config from a repository path, falling back to defaults.
    pub fn load(repo_path: &Path) -> Result<Self> {
        let config_path = repo_path.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&config_path).with_path("read", &config_path)?;
        let config: RepositoryConfig = serde_json::from_str(&data).map_err(|e| {
            Error::serialization(format!("{}: {}", config_path.display(), e))
        })?;
        if config.format_version > FORMAT_VERSION {
            return Err(Error::serialization(format!(
                "{}: unsupported format version {}",
                config_path.display(),
                config.format_version
            )));
        }
        Ok(config)
    }

    /// Save config to a repository path.
    pub fn save(&self, repo_path: &Path) -> Result<()> {
        let config_path = repo_path.join(CONFIG_FILE);
        let tmp_path = config_path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self).map_err(Error::serialization)?;
        fs::write(&tmp_path, &data).with_path("write", &tmp_path)?;
        fs::rename(&tmp_path, &config_path).with_path("rename", &config_path)?;
        Ok(())
    }
}
