use std::fs;
use std::path::{Path, PathBuf};

use crate::model::config::VaultConfig;
use crate::model::vault::Vault;

pub const CONFIG_FILE: &str = "vault.toml";

const VAULT_TOML_TEMPLATE: &str = r##"[vault]
name = "{name}"

# Directories, relative to this file
[dirs]
nodes = "nodes"
archive = "archive"
attachments = "attachments"

[sync]
# quiet period before a changed file is re-read
debounce_ms = 300
# cached priorities older than this are recomputed on read
refresh_secs = 60

[time]
# offset from UTC used for due dates and chore rollover (tn tz <minutes>)
offset_minutes = 0
"##;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("not a tasknotes vault: no vault.toml found")]
    NotAVault,
    #[error("a vault already exists at {0}")]
    AlreadyExists(PathBuf),
    #[error("could not read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not write {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse vault.toml: {0}")]
    ConfigParseError(#[from] toml::de::Error),
    #[error("could not edit vault.toml: {0}")]
    ConfigEditError(#[from] toml_edit::TomlError),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Walk up from `start` to the nearest directory holding vault.toml.
pub fn discover_vault(start: &Path) -> Result<PathBuf, VaultError> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE).is_file() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(VaultError::NotAVault);
        }
    }
}

/// Load vault.toml and make sure the node and archive directories exist.
pub fn load_vault(root: &Path) -> Result<Vault, VaultError> {
    let config_path = root.join(CONFIG_FILE);
    if !config_path.is_file() {
        return Err(VaultError::NotAVault);
    }
    let text = fs::read_to_string(&config_path).map_err(|e| VaultError::ReadError {
        path: config_path.clone(),
        source: e,
    })?;
    let config: VaultConfig = toml::from_str(&text)?;
    // watcher events carry canonical paths
    let root = root.canonicalize()?;
    let vault = Vault::new(root, config);
    fs::create_dir_all(vault.nodes_dir())?;
    fs::create_dir_all(vault.archive_dir())?;
    Ok(vault)
}

/// Create a new vault at `root`. The name defaults to the directory name.
pub fn init_vault(root: &Path, name: Option<&str>) -> Result<Vault, VaultError> {
    let config_path = root.join(CONFIG_FILE);
    if config_path.exists() {
        return Err(VaultError::AlreadyExists(root.to_path_buf()));
    }
    let name = match name {
        Some(n) => n.to_string(),
        None => root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("vault")
            .to_string(),
    };
    fs::create_dir_all(root)?;
    let escaped = toml_edit::value(name.as_str()).to_string();
    let text = VAULT_TOML_TEMPLATE.replace("\"{name}\"", escaped.trim());
    fs::write(&config_path, text).map_err(|e| VaultError::WriteError {
        path: config_path.clone(),
        source: e,
    })?;
    let vault = load_vault(root)?;
    fs::create_dir_all(vault.attachments_dir())?;
    Ok(vault)
}

/// Whether `path` names a node file directly inside `nodes_dir`: a visible
/// `*.md` file, not an editor or temp artifact.
pub fn is_node_file(nodes_dir: &Path, path: &Path) -> bool {
    if path.parent() != Some(nodes_dir) {
        return false;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('.')
        && !name.ends_with('~')
        && path.extension().and_then(|e| e.to_str()) == Some("md")
}

/// Node files currently in the active directory, sorted by name.
pub fn list_node_files(nodes_dir: &Path) -> Result<Vec<PathBuf>, VaultError> {
    let entries = fs::read_dir(nodes_dir).map_err(|e| VaultError::ReadError {
        path: nodes_dir.to_path_buf(),
        source: e,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && is_node_file(nodes_dir, &path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// File name stem for a new node: the title lowercased, with runs of other
/// characters collapsed to single dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.chars().count() >= 60 {
            break;
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Move `file` into `archive_dir`, keeping its name unless that is taken.
/// Returns the archived path.
pub fn archive_file(file: &Path, archive_dir: &Path) -> Result<PathBuf, VaultError> {
    fs::create_dir_all(archive_dir)?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "node.md".to_string());
    let mut target = archive_dir.join(&name);
    if target.exists() {
        let stem = Path::new(&name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.f");
        target = archive_dir.join(format!("{}-{}.md", stem, stamp));
    }
    if fs::rename(file, &target).is_err() {
        // rename fails across filesystems
        fs::copy(file, &target).map_err(|e| VaultError::WriteError {
            path: target.clone(),
            source: e,
        })?;
        fs::remove_file(file)?;
    }
    Ok(target)
}
