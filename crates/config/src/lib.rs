//! Configuration and data-file helpers for the lead nurturing tools
//!
//! Provides utilities for locating the shared data directory
//! (~/.config/leadnurture/) and for reading and writing the JSON documents
//! kept there.
//!
//! Call [`init`] at application startup to bootstrap the directory.
//! Writes go through a temp file and a rename so a failed write never
//! truncates the previous document.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Name of the data directory under the platform config dir
const APP_DIR: &str = "leadnurture";

/// Initialize the data directory.
///
/// Creates ~/.config/leadnurture/ if it doesn't exist.
/// Call this once at application startup.
pub fn init() -> Result<PathBuf> {
    ensure_config_dir()
}

/// Get the data directory (~/.config/leadnurture/)
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR))
}

/// Get the path to a file within the data directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Load and parse a JSON file from the data directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load a JSON file if it exists, `None` if it doesn't
pub fn load_json_file_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    load_json_file(path).map(Some)
}

/// Check if a file exists in the data directory
pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.exists())
}

/// Ensure the data directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    ensure_dir(&dir)?;
    Ok(dir)
}

/// Ensure an arbitrary directory exists
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))
}

/// Save a value as JSON to a file in the data directory
pub fn save_json<T: serde::Serialize>(filename: &str, value: &T) -> Result<()> {
    let dir = ensure_config_dir()?;
    save_json_file(&dir.join(filename), value)
}

/// Save a value as JSON to an arbitrary path, atomically
pub fn save_json_file<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    prepare_json_file(path, value)?.commit()
}

/// Serialize `value` and write it next to `path` without touching `path`.
///
/// The returned [`PendingWrite`] replaces the target on [`PendingWrite::commit`].
/// Dropping it uncommitted removes the temp file.
pub fn prepare_json_file<T: serde::Serialize>(path: &Path, value: &T) -> Result<PendingWrite> {
    let content = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        ensure_dir(parent)?;
    }

    let temp_path = temp_path_for(path);
    std::fs::write(&temp_path, content)
        .with_context(|| format!("Failed to write config file: {}", temp_path.display()))?;

    Ok(PendingWrite {
        temp_path,
        target: path.to_path_buf(),
        committed: false,
    })
}

/// A fully written temp file waiting to replace its target
#[derive(Debug)]
pub struct PendingWrite {
    temp_path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl PendingWrite {
    /// Rename the temp file over the target
    pub fn commit(mut self) -> Result<()> {
        std::fs::rename(&self.temp_path, &self.target).with_context(|| {
            format!(
                "Failed to replace {} with {}",
                self.target.display(),
                self.temp_path.display()
            )
        })?;
        self.committed = true;
        Ok(())
    }

    /// The file this write will replace
    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_config_dir() {
        let dir = config_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("leadnurture"));
    }

    #[test]
    fn test_config_path() {
        let path = config_path("test.json");
        assert!(path.is_some());
        let path = path.unwrap();
        assert!(path.ends_with("leadnurture/test.json"));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");

        let mut value = BTreeMap::new();
        value.insert("a".to_string(), 1);
        save_json_file(&path, &value).unwrap();

        let loaded: BTreeMap<String, i32> = load_json_file(&path).unwrap();
        assert_eq!(loaded, value);
        assert!(!dir.path().join("doc.json.tmp").exists());
    }

    #[test]
    fn test_uncommitted_write_keeps_previous_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        save_json_file(&path, &vec![1, 2, 3]).unwrap();

        let pending = prepare_json_file(&path, &vec![4, 5]).unwrap();
        drop(pending);

        let loaded: Vec<i32> = load_json_file(&path).unwrap();
        assert_eq!(loaded, vec![1, 2, 3]);
        assert!(!dir.path().join("doc.json.tmp").exists());
    }

    #[test]
    fn test_load_missing_file_opt() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<Vec<i32>> = load_json_file_opt(&dir.path().join("nope.json")).unwrap();
        assert!(loaded.is_none());
    }
}
