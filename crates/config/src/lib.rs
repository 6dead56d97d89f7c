use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CURRENT_SCHEMA_VERSION: u32 = 2;
pub const APP_DIR_NAME: &str = "notekeep";

/// The local account every command acts as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            email: "me@localhost".to_string(),
            display_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorConfig {
    #[serde(default = "default_autosave_quiet_ms")]
    pub autosave_quiet_ms: u64,
    #[serde(default = "default_scratch_pad_quiet_ms")]
    pub scratch_pad_quiet_ms: u64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            autosave_quiet_ms: default_autosave_quiet_ms(),
            scratch_pad_quiet_ms: default_scratch_pad_quiet_ms(),
        }
    }
}

impl EditorConfig {
    pub fn autosave_quiet_period(&self) -> Duration {
        Duration::from_millis(self.autosave_quiet_ms)
    }

    pub fn scratch_pad_quiet_period(&self) -> Duration {
        Duration::from_millis(self.scratch_pad_quiet_ms)
    }
}

fn default_autosave_quiet_ms() -> u64 {
    1500
}

fn default_scratch_pad_quiet_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Relative paths resolve against the data directory.
    pub database_file: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: PathBuf::from("notekeep.db"),
            max_connections: default_max_connections(),
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.database_file)
    }
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,editor_sync=debug,storage_sqlite=debug".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub schema_version: u32,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub editor: EditorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            profile: ProfileConfig::default(),
            editor: EditorConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Platform data directory for the database and logs.
pub fn default_data_dir() -> Result<PathBuf> {
    let mut dir = dirs::data_dir().context("failed to resolve data_dir")?;
    dir.push(APP_DIR_NAME);
    Ok(dir)
}

pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join("config.json"),
        }
    }

    pub fn from_default_location() -> Result<Self> {
        let mut dir = dirs::config_dir().context("failed to resolve config_dir")?;
        dir.push(APP_DIR_NAME);
        Ok(Self::from_dir(dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        if !self.path.exists() {
            let config = AppConfig::default();
            self.save(&config)?;
            return Ok(config);
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let mut config: AppConfig =
            serde_json::from_str(&raw).context("failed to parse app config json")?;
        if self.migrate(&mut config) {
            self.save(&config)?;
        }
        Ok(config)
    }

    pub fn save(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let text = serde_json::to_string_pretty(config).context("failed to serialize config")?;
        fs::write(&self.path, text)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Returns whether anything changed.
    fn migrate(&self, config: &mut AppConfig) -> bool {
        if config.schema_version >= CURRENT_SCHEMA_VERSION {
            return false;
        }

        warn!(
            from = config.schema_version,
            to = CURRENT_SCHEMA_VERSION,
            "migrating app config schema"
        );

        // version 1 wrote zero for "use the default"
        let defaults = AppConfig::default();
        if config.editor.autosave_quiet_ms == 0 {
            config.editor.autosave_quiet_ms = defaults.editor.autosave_quiet_ms;
        }
        if config.editor.scratch_pad_quiet_ms == 0 {
            config.editor.scratch_pad_quiet_ms = defaults.editor.scratch_pad_quiet_ms;
        }
        if config.storage.max_connections == 0 {
            config.storage.max_connections = defaults.storage.max_connections;
        }
        if config.logging.filter.trim().is_empty() {
            config.logging.filter = defaults.logging.filter;
        }
        config.schema_version = CURRENT_SCHEMA_VERSION;
        true
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn creates_default_config_when_missing() {
        let dir = tempdir().expect("tempdir");
        let store = ConfigStore::from_dir(dir.path());
        let config = store.load_or_init().expect("load default");
        assert_eq!(config.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(config.editor.autosave_quiet_period(), Duration::from_millis(1500));
        assert_eq!(config.editor.scratch_pad_quiet_period(), Duration::from_millis(1000));
        assert!(store.path().exists());

        let reloaded = store.load_or_init().expect("reload");
        assert_eq!(reloaded, config);
    }

    #[test]
    fn migrates_version_one_files() {
        let dir = tempdir().expect("tempdir");
        let store = ConfigStore::from_dir(dir.path());
        fs::write(
            store.path(),
            r#"{
                "schema_version": 1,
                "profile": { "email": "ada@example.com" },
                "editor": { "autosave_quiet_ms": 0 },
                "storage": { "database_file": "/var/lib/notes.db", "max_connections": 0 },
                "logging": { "filter": "" }
            }"#,
        )
        .expect("write v1");

        let config = store.load_or_init().expect("migrate");
        assert_eq!(config.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(config.profile.email, "ada@example.com");
        assert_eq!(config.editor.autosave_quiet_ms, 1500);
        assert_eq!(config.editor.scratch_pad_quiet_ms, 1000);
        assert_eq!(config.storage.max_connections, 5);
        assert_eq!(
            config.storage.database_path(Path::new("/ignored")),
            PathBuf::from("/var/lib/notes.db")
        );
        assert_eq!(config.logging.filter, LoggingConfig::default().filter);

        let raw = fs::read_to_string(store.path()).expect("read back");
        assert!(raw.contains(&format!("\"schema_version\": {CURRENT_SCHEMA_VERSION}")));
    }

    #[test]
    fn relative_database_file_lives_in_data_dir() {
        let storage = StorageConfig::default();
        assert_eq!(
            storage.database_path(Path::new("/data/notekeep")),
            PathBuf::from("/data/notekeep/notekeep.db")
        );
    }
}
