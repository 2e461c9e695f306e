use std::path::PathBuf;

use super::config::VaultConfig;
use super::time::TzOffset;

/// A located vault: its root directory and parsed vault.toml
#[derive(Debug, Clone)]
pub struct Vault {
    /// Directory holding vault.toml
    pub root: PathBuf,
    pub config: VaultConfig,
}

impl Vault {
    pub fn new(root: impl Into<PathBuf>, config: VaultConfig) -> Self {
        Vault {
            root: root.into(),
            config,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(crate::io::vault_io::CONFIG_FILE)
    }

    /// Active node files
    pub fn nodes_dir(&self) -> PathBuf {
        self.root.join(&self.config.dirs.nodes)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join(&self.config.dirs.archive)
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.root.join(&self.config.dirs.attachments)
    }

    /// The configured offset, or UTC if vault.toml holds an out-of-range value
    pub fn offset(&self) -> TzOffset {
        TzOffset::from_minutes(self.config.time.offset_minutes).unwrap_or_default()
    }
}
