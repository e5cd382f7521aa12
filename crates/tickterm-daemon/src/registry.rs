//! On-disk terminal registry, rebuilt every time a terminal changes.
//!
//! The registry outlives the process so the next tick can tell which
//! terminals survived and which were lost.

use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::Terminal;
use crate::TerminalError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub command: String,
    #[serde(default)]
    pub current_command: String,
    pub created: DateTime<Utc>,
    pub status: String,
    pub last_activity: DateTime<Utc>,
}

impl RegistryEntry {
    pub fn from_terminal(terminal: &Terminal) -> Self {
        Self {
            command: terminal.launch_command().to_string(),
            current_command: terminal.foreground_command().to_string(),
            created: terminal.created_at(),
            status: terminal.status_line(),
            last_activity: terminal.last_activity(),
        }
    }
}

/// Keyed by backend session name.
pub type RegistryEntries = BTreeMap<String, RegistryEntry>;

#[derive(Debug, Clone)]
pub struct TerminalRegistry {
    path: PathBuf,
}

impl TerminalRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persistence_error(operation: &str, reason: String) -> TerminalError {
        TerminalError::Persistence {
            operation: operation.to_string(),
            reason,
        }
    }

    /// Missing or unreadable registries load as empty.
    pub fn load(&self) -> RegistryEntries {
        if !self.path.exists() {
            return RegistryEntries::new();
        }
        match File::open(&self.path) {
            Ok(file) => match serde_json::from_reader(BufReader::new(file)) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Registry corrupted, treating as empty"
                    );
                    RegistryEntries::new()
                }
            },
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to open registry");
                RegistryEntries::new()
            }
        }
    }

    /// Writes to a temp file then renames, so readers never see a partial file.
    pub fn save(&self, entries: &RegistryEntries) -> Result<(), TerminalError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Self::persistence_error(
                    "create_dir",
                    format!("Failed to create directory '{}': {}", parent.display(), e),
                )
            })?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let file = File::create(&temp_path).map_err(|e| {
            Self::persistence_error(
                "create_temp",
                format!("Failed to create temp file '{}': {}", temp_path.display(), e),
            )
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), entries).map_err(|e| {
            Self::persistence_error(
                "write_json",
                format!("Failed to write registry to '{}': {}", temp_path.display(), e),
            )
        })?;
        fs::rename(&temp_path, &self.path).map_err(|e| {
            Self::persistence_error(
                "rename",
                format!(
                    "Failed to rename '{}' to '{}': {}",
                    temp_path.display(),
                    self.path.display(),
                    e
                ),
            )
        })
    }

    pub fn clear(&self) -> Result<(), TerminalError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::persistence_error("remove", e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(command: &str) -> RegistryEntry {
        let now = Utc::now();
        RegistryEntry {
            command: command.to_string(),
            current_command: command.to_string(),
            created: now,
            status: "idle".to_string(),
            last_activity: now,
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TerminalRegistry::new(dir.path().join("registry.json"));
        let mut entries = RegistryEntries::new();
        entries.insert("term_0".into(), entry("bash"));
        entries.insert("term_4".into(), entry("python3 bot.py"));

        registry.save(&entries).unwrap();
        assert_eq!(registry.load(), entries);
        assert!(!dir.path().join("registry.json.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TerminalRegistry::new(dir.path().join("registry.json"));
        assert!(registry.load().is_empty());
        assert!(registry.clear().is_ok());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(TerminalRegistry::new(&path).load().is_empty());
    }

    #[test]
    fn test_save_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TerminalRegistry::new(dir.path().join("nested/registry.json"));
        registry.save(&RegistryEntries::new()).unwrap();
        assert!(registry.path().exists());
        registry.clear().unwrap();
        assert!(!registry.path().exists());
    }

    #[test]
    fn test_file_format_uses_session_names() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TerminalRegistry::new(dir.path().join("registry.json"));
        let mut entries = RegistryEntries::new();
        entries.insert("term_2".into(), entry("bash"));
        registry.save(&entries).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(registry.path()).unwrap()).unwrap();
        let record = &raw["term_2"];
        for key in ["command", "current_command", "created", "status", "last_activity"] {
            assert!(record.get(key).is_some(), "missing {key}");
        }
    }
}
