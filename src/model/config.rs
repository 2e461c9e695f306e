use serde::{Deserialize, Serialize};

/// Configuration from vault.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub vault: VaultInfo,
    #[serde(default)]
    pub dirs: DirConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub time: TimeConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultInfo {
    #[serde(default)]
    pub name: String,
}

/// Directory names, relative to the vault root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirConfig {
    #[serde(default = "default_nodes_dir")]
    pub nodes: String,
    #[serde(default = "default_archive_dir")]
    pub archive: String,
    #[serde(default = "default_attachments_dir")]
    pub attachments: String,
}

impl Default for DirConfig {
    fn default() -> Self {
        DirConfig {
            nodes: default_nodes_dir(),
            archive: default_archive_dir(),
            attachments: default_attachments_dir(),
        }
    }
}

fn default_nodes_dir() -> String {
    "nodes".to_string()
}

fn default_archive_dir() -> String {
    "archive".to_string()
}

fn default_attachments_dir() -> String {
    "attachments".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Quiet period before a changed file is reconciled
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Age after which cached priorities are re-evaluated on read
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            debounce_ms: default_debounce_ms(),
            refresh_secs: default_refresh_secs(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_refresh_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeConfig {
    /// Offset from UTC applied to due dates and chore rollover
    #[serde(default)]
    pub offset_minutes: i32,
}
