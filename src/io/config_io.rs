use std::fs;
use std::path::Path;

use crate::io::recovery::atomic_write;
use crate::io::vault_io::{CONFIG_FILE, VaultError};
use crate::model::config::VaultConfig;

/// Read vault.toml, returning both the parsed config and the raw toml_edit
/// document for formatting-preserving edits.
pub fn read_config(root: &Path) -> Result<(VaultConfig, toml_edit::DocumentMut), VaultError> {
    let config_path = root.join(CONFIG_FILE);
    let text = fs::read_to_string(&config_path).map_err(|e| VaultError::ReadError {
        path: config_path.clone(),
        source: e,
    })?;
    let config: VaultConfig = toml::from_str(&text)?;
    let doc: toml_edit::DocumentMut = text.parse()?;
    Ok((config, doc))
}

pub fn write_config(root: &Path, doc: &toml_edit::DocumentMut) -> Result<(), VaultError> {
    let config_path = root.join(CONFIG_FILE);
    atomic_write(&config_path, doc.to_string().as_bytes()).map_err(|e| VaultError::WriteError {
        path: config_path,
        source: e,
    })
}

pub fn set_offset_minutes(doc: &mut toml_edit::DocumentMut, minutes: i32) {
    if !doc.contains_key("time") {
        doc["time"] = toml_edit::Item::Table(toml_edit::Table::new());
    }
    doc["time"]["offset_minutes"] = toml_edit::value(i64::from(minutes));
}

/// Persist a new timezone offset into vault.toml.
pub fn save_offset(root: &Path, minutes: i32) -> Result<(), VaultError> {
    let (_, mut doc) = read_config(root)?;
    set_offset_minutes(&mut doc, minutes);
    write_config(root, &doc)
}
