// ABOUTME: persists per-command consent decisions in the shared json settings document.
// ABOUTME: keeps sibling settings intact so other writers of the same file are not clobbered.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

const CONFIRMED_COMMANDS: &str = "confirmedCommands";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Program name -> `true` (always allow) or `false` (always deny).
    #[serde(default)]
    pub confirmed_commands: BTreeMap<String, bool>,

    /// Settings owned by other parts of the application.
    #[serde(flatten)]
    pub other: serde_json::Map<String, Value>,
}

/// `<config dir>/Headlamp/settings.json`, the same document the desktop app writes.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("Headlamp").join("settings.json"))
}

#[derive(Debug, Clone)]
pub struct ConsentStore {
    path: PathBuf,
}

impl ConsentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: a missing or unreadable document reads as empty settings. Entries of
    /// `confirmedCommands` that are not booleans are skipped; other keys are kept as-is.
    pub fn load(&self) -> Settings {
        let data = match std::fs::read(&self.path) {
            Ok(d) => d,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Settings::default(),
            Err(err) => {
                log::warn!("cannot read settings at {}: {err}", self.path.display());
                return Settings::default();
            }
        };

        let mut other = match serde_json::from_slice(&data) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                log::warn!("ignoring settings at {}: not a json object", self.path.display());
                return Settings::default();
            }
            Err(err) => {
                log::warn!("ignoring malformed settings at {}: {err}", self.path.display());
                return Settings::default();
            }
        };

        let mut confirmed_commands = BTreeMap::new();
        match other.remove(CONFIRMED_COMMANDS) {
            None => {}
            Some(Value::Object(entries)) => {
                for (command, value) in entries {
                    match value.as_bool() {
                        Some(allowed) => {
                            confirmed_commands.insert(command, allowed);
                        }
                        None => log::warn!("skipping consent for {command:?}: {value} is not a boolean"),
                    }
                }
            }
            Some(value) => log::warn!("skipping {CONFIRMED_COMMANDS}: {value} is not an object"),
        }

        Settings {
            confirmed_commands,
            other,
        }
    }

    /// Overwrites the whole document.
    pub fn save(&self, settings: &Settings) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let data =
            serde_json::to_vec(settings).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(&self.path, data)
    }

    pub fn decision(&self, command: &str) -> Option<bool> {
        self.load().confirmed_commands.get(command).copied()
    }

    pub fn record(&self, command: &str, allowed: bool) -> io::Result<()> {
        let mut settings = self.load();
        settings.confirmed_commands.insert(command.to_string(), allowed);
        self.save(&settings)
    }

    /// Returns whether a decision existed.
    pub fn forget(&self, command: &str) -> io::Result<bool> {
        let mut settings = self.load();
        let existed = settings.confirmed_commands.remove(command).is_some();
        if existed {
            self.save(&settings)?;
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConsentStore::new(dir.path().join("settings.json"));
        assert_eq!(store.load(), Settings::default());
        assert_eq!(store.decision("minikube"), None);
    }

    #[test]
    fn malformed_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = ConsentStore::new(&path);
        assert!(store.load().confirmed_commands.is_empty());
    }

    #[test]
    fn record_persists_and_keeps_sibling_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, br#"{"theme":"dark","confirmedCommands":{"az":false}}"#).unwrap();

        let store = ConsentStore::new(&path);
        store.record("minikube", true).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw["confirmedCommands"]["minikube"], true);
        assert_eq!(raw["confirmedCommands"]["az"], false);
        assert_eq!(store.decision("az"), Some(false));
    }

    #[test]
    fn mistyped_entry_is_skipped_without_losing_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            br#"{"theme":"dark","confirmedCommands":{"az":"yes","kubectl":true}}"#,
        )
        .unwrap();

        let store = ConsentStore::new(&path);
        assert_eq!(store.decision("az"), None);
        assert_eq!(store.decision("kubectl"), Some(true));

        store.record("minikube", true).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw["confirmedCommands"]["minikube"], true);
        assert_eq!(raw["confirmedCommands"]["kubectl"], true);
    }

    #[test]
    fn non_object_consent_map_keeps_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, br#"{"theme":"dark","confirmedCommands":[1,2]}"#).unwrap();

        let store = ConsentStore::new(&path);
        store.record("az", false).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw["confirmedCommands"]["az"], false);
    }

    #[test]
    fn save_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConsentStore::new(dir.path().join("Headlamp").join("settings.json"));
        store.record("az", true).unwrap();
        assert_eq!(store.decision("az"), Some(true));
    }

    #[test]
    fn forget_removes_only_existing_decisions() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConsentStore::new(dir.path().join("settings.json"));
        store.record("az", false).unwrap();

        assert!(store.forget("az").unwrap());
        assert!(!store.forget("az").unwrap());
        assert_eq!(store.decision("az"), None);
    }
}
