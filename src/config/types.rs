//! Configuration types.

use crate::transfer::{
    ConflictDefaults, ConflictType, ImportOptions, PetnameIdGenerator, Resolution,
};
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest petname word count accepted for generated identifiers.
pub const MAX_ID_WORDS: u8 = 8;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub owner: OwnerConfig,

    #[serde(default)]
    pub import: ImportConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub ids: IdsConfig,
}

/// Where the notebook and its backups live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Directory receiving pre-import backups.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            backup_dir: default_backup_dir(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("notebook/notebook.db")
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("notebook/backups")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerConfig {
    /// Recorded as `userId` in exported bundles.
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

impl Default for OwnerConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
        }
    }
}

fn default_user_id() -> String {
    "local".to_string()
}

/// Import defaults. Each can be overridden per run from the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_true")]
    pub preserve_ids: bool,

    #[serde(default = "default_true")]
    pub create_backup: bool,

    /// Maximum validation errors before an import is refused.
    #[serde(default)]
    pub error_threshold: Option<usize>,

    /// Resolution for duplicate-id conflicts without an explicit choice.
    #[serde(default)]
    pub on_duplicate: Option<Resolution>,

    /// Apply each conflict's suggested resolution when nothing else applies.
    #[serde(default = "default_true")]
    pub accept_suggestions: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            preserve_ids: true,
            create_backup: true,
            error_threshold: None,
            on_duplicate: None,
            accept_suggestions: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_true")]
    pub include_completed: bool,

    /// Compress even when the output name has no `.gz` extension.
    #[serde(default)]
    pub gzip: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            include_completed: true,
            gzip: false,
        }
    }
}

/// Shape of identifiers generated for re-keyed entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdsConfig {
    #[serde(default = "default_id_words")]
    pub words: u8,

    #[serde(default = "default_id_separator")]
    pub separator: String,
}

impl Default for IdsConfig {
    fn default() -> Self {
        Self {
            words: default_id_words(),
            separator: default_id_separator(),
        }
    }
}

fn default_id_words() -> u8 {
    3
}

fn default_id_separator() -> String {
    "-".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load a single configuration file, without tiering.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Empty or comment-only files parse as null.
        let config: Option<Config> = serde_yaml::from_str(&content)?;
        let config = config.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ids.words == 0 || self.ids.words > MAX_ID_WORDS {
            return Err(anyhow!(
                "ids.words must be between 1 and {}, got {}",
                MAX_ID_WORDS,
                self.ids.words
            ));
        }
        if self.owner.user_id.trim().is_empty() {
            return Err(anyhow!("owner.user_id must not be empty"));
        }
        Ok(())
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.store.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.store.db_path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.store.backup_dir
    }

    /// Import options seeded from the `import` section.
    pub fn import_options(&self) -> ImportOptions {
        let mut defaults = ConflictDefaults {
            accept_suggestions: self.import.accept_suggestions,
            ..Default::default()
        };
        if let Some(resolution) = self.import.on_duplicate {
            defaults = defaults.with_default(ConflictType::DuplicateId, resolution);
        }
        ImportOptions {
            preserve_ids: self.import.preserve_ids,
            create_backup: self.import.create_backup,
            error_threshold: self.import.error_threshold,
            defaults,
            ..Default::default()
        }
    }

    pub fn id_generator(&self) -> PetnameIdGenerator {
        PetnameIdGenerator::new(self.ids.words, self.ids.separator.clone())
    }
}
