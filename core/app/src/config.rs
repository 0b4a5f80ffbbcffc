//! Core configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use pearl_common::{Error, Result, Timeouts};
use pearl_notes::{resolve_user_dir, ExportPaths};
use pearl_vault::LINK_SCHEME;

/// Overrides the storage root.
pub const STORAGE_PATH_ENV: &str = "PEARL_STORAGE_PATH";
/// Overrides the notes export root.
pub const NOTES_EXPORT_DIR_ENV: &str = "PEARL_NOTES_EXPORT_DIR";
/// Settings file inside the storage root.
pub const SETTINGS_FILENAME: &str = "settings.json";

const APP_DIRNAME: &str = "pearl";

fn default_storage_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIRNAME))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration for [`CoreFacade`](crate::CoreFacade).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Root for drive storage, the storage lock and settings.
    pub storage_dir: PathBuf,
    /// Where notes are mirrored; defaults to `<storage_dir>/notes-export`.
    pub export_dir: Option<PathBuf>,
    /// Scheme of shareable links. Only `pearl-vault` is understood.
    pub link_scheme: String,
    pub timeouts: Timeouts,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            export_dir: None,
            link_scheme: LINK_SCHEME.to_string(),
            timeouts: Timeouts::default(),
        }
    }
}

impl CoreConfig {
    /// Defaults plus `PEARL_STORAGE_PATH` and `PEARL_NOTES_EXPORT_DIR`.
    pub fn from_env() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::from_lookup(|name| std::env::var(name).ok(), &cwd)
    }

    /// Like [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, cwd: &Path) -> Self {
        let mut config = Self::default();
        let set = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(storage) = set(STORAGE_PATH_ENV) {
            config.storage_dir = resolve_user_dir(&storage, cwd);
        }
        if let Some(export) = set(NOTES_EXPORT_DIR_ENV) {
            config.export_dir = Some(resolve_user_dir(&export, cwd));
        }
        config
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            Error::Serialization(format!("Invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.link_scheme != LINK_SCHEME {
            return Err(Error::Validation(format!(
                "Unsupported link scheme \"{}\"; expected \"{}\"",
                self.link_scheme, LINK_SCHEME
            )));
        }
        Ok(())
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = Some(dir.into());
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn export_paths(&self) -> ExportPaths {
        ExportPaths::resolve(&self.storage_dir, self.export_dir.as_deref())
    }

    pub fn settings_path(&self) -> PathBuf {
        self.storage_dir.join(SETTINGS_FILENAME)
    }
}
