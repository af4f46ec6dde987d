//! Configuration loader with tier-based merging.

use super::merge::deep_merge_all;
use super::types::Config;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Configuration tier priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    Defaults = 0,
    Project = 1,
    User = 2,
    Environment = 3,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::Project => write!(f, "project"),
            ConfigTier::User => write!(f, "user"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Directories searched for `config.yaml`.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub project_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::discover()
    }
}

impl ConfigPaths {
    /// Discover configuration paths from environment and defaults.
    pub fn discover() -> Self {
        let user_dir = std::env::var("NOTEBOOK_USER_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".notebook")));

        let project_dir = std::env::var("NOTEBOOK_PROJECT_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from("notebook")));

        Self {
            project_dir,
            user_dir,
        }
    }

    pub fn with_dirs(project_dir: Option<PathBuf>, user_dir: Option<PathBuf>) -> Self {
        Self {
            project_dir,
            user_dir,
        }
    }

    fn tier_files(&self) -> Vec<(ConfigTier, PathBuf)> {
        let mut files = Vec::new();
        if let Some(dir) = &self.project_dir {
            files.push((ConfigTier::Project, dir.join("config.yaml")));
        }
        if let Some(dir) = &self.user_dir {
            files.push((ConfigTier::User, dir.join("config.yaml")));
        }
        files
    }
}

/// Loads and merges configuration tiers.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub paths: ConfigPaths,
    config: Config,
    /// Files that contributed, lowest tier first.
    sources: Vec<(ConfigTier, PathBuf)>,
}

impl ConfigLoader {
    /// Load configuration from all tiers with proper merging.
    pub fn load() -> Result<Self> {
        Self::load_with(ConfigPaths::discover(), None, |key| std::env::var(key).ok())
    }

    /// Load from an explicit file (e.g. `--config`), still honouring env overrides.
    pub fn load_file(path: &Path) -> Result<Self> {
        Self::load_with(ConfigPaths::discover(), Some(path), |key| {
            std::env::var(key).ok()
        })
    }

    /// Load configuration with explicit paths and environment.
    ///
    /// An explicit file (argument, or `NOTEBOOK_CONFIG_PATH`) replaces the
    /// project and user tiers.
    pub fn load_with(
        paths: ConfigPaths,
        explicit: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let explicit = explicit
            .map(Path::to_path_buf)
            .or_else(|| env("NOTEBOOK_CONFIG_PATH").map(PathBuf::from));

        let mut tiers: Vec<Value> = vec![serde_json::to_value(Config::default())?];
        let mut sources = Vec::new();

        if let Some(path) = explicit {
            let value = read_yaml(&path)?
                .with_context(|| format!("config file {} not found", path.display()))?;
            tiers.push(value);
            sources.push((ConfigTier::User, path));
        } else {
            for (tier, file) in paths.tier_files() {
                match read_yaml(&file) {
                    Ok(Some(value)) => {
                        debug!(tier = %tier, path = %file.display(), "Loaded config tier");
                        tiers.push(value);
                        sources.push((tier, file));
                    }
                    Ok(None) => {}
                    Err(e) => warn!(tier = %tier, error = %e, "Ignoring unreadable config file"),
                }
            }
        }

        let merged = deep_merge_all(tiers);
        let mut config: Config =
            serde_json::from_value(merged).context("invalid configuration")?;

        Self::apply_env_overrides(&mut config, &env);
        config.validate()?;

        Ok(Self {
            paths,
            config,
            sources,
        })
    }

    fn apply_env_overrides(config: &mut Config, env: &impl Fn(&str) -> Option<String>) {
        if let Some(db_path) = env("NOTEBOOK_DB_PATH") {
            config.store.db_path = PathBuf::from(db_path);
        }

        if let Some(backup_dir) = env("NOTEBOOK_BACKUP_DIR") {
            config.store.backup_dir = PathBuf::from(backup_dir);
        }

        if let Some(user_id) = env("NOTEBOOK_USER_ID") {
            config.owner.user_id = user_id;
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    pub fn sources(&self) -> &[(ConfigTier, PathBuf)] {
        &self.sources
    }

    pub fn project_dir(&self) -> Option<&Path> {
        self.paths.project_dir.as_deref()
    }

    pub fn user_dir(&self) -> Option<&Path> {
        self.paths.user_dir.as_deref()
    }
}

/// Read a YAML file as JSON. A missing file is `Ok(None)`.
fn read_yaml(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value: Value = serde_yaml::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write(dir: &Path, content: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("config.yaml"), content).unwrap();
    }

    #[test]
    fn test_load_defaults_only() {
        let temp = TempDir::new().unwrap();
        let paths = ConfigPaths::with_dirs(
            Some(temp.path().join("project")),
            Some(temp.path().join("user")),
        );

        let loader = ConfigLoader::load_with(paths, None, no_env).unwrap();
        assert_eq!(loader.config(), &Config::default());
        assert!(loader.sources().is_empty());
    }

    #[test]
    fn test_user_overrides_project_per_field() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("notebook");
        let user = temp.path().join("user");
        write(
            &project,
            "store:\n  db_path: project.db\n  backup_dir: project-backups\nids:\n  words: 2\n",
        );
        write(&user, "store:\n  db_path: user.db\n");

        let loader =
            ConfigLoader::load_with(ConfigPaths::with_dirs(Some(project), Some(user)), None, no_env)
                .unwrap();
        let config = loader.config();
        assert_eq!(config.store.db_path, PathBuf::from("user.db"));
        assert_eq!(config.store.backup_dir, PathBuf::from("project-backups"));
        assert_eq!(config.ids.words, 2);
        let tiers: Vec<ConfigTier> = loader.sources().iter().map(|(t, _)| *t).collect();
        assert_eq!(tiers, vec![ConfigTier::Project, ConfigTier::User]);
    }

    #[test]
    fn test_env_overrides_files() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("notebook");
        write(&project, "owner:\n  user_id: from-file\n");

        let env: HashMap<&str, &str> = [
            ("NOTEBOOK_USER_ID", "from-env"),
            ("NOTEBOOK_BACKUP_DIR", "/tmp/nb-backups"),
        ]
        .into_iter()
        .collect();
        let loader = ConfigLoader::load_with(
            ConfigPaths::with_dirs(Some(project), None),
            None,
            |key| env.get(key).map(|v| v.to_string()),
        )
        .unwrap();
        assert_eq!(loader.config().owner.user_id, "from-env");
        assert_eq!(loader.config().store.backup_dir, PathBuf::from("/tmp/nb-backups"));
    }

    #[test]
    fn test_explicit_file_bypasses_tiers() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("notebook");
        write(&project, "export:\n  gzip: true\n");
        let explicit = temp.path().join("explicit.yaml");
        std::fs::write(&explicit, "export:\n  include_completed: false\n").unwrap();

        let loader = ConfigLoader::load_with(
            ConfigPaths::with_dirs(Some(project), None),
            Some(&explicit),
            no_env,
        )
        .unwrap();
        assert!(!loader.config().export.include_completed);
        assert!(!loader.config().export.gzip);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let result = ConfigLoader::load_with(
            ConfigPaths::with_dirs(None, None),
            Some(&temp.path().join("absent.yaml")),
            no_env,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("notebook");
        write(&project, "ids:\n  words: 0\n");
        let result =
            ConfigLoader::load_with(ConfigPaths::with_dirs(Some(project), None), None, no_env);
        assert!(result.is_err());
    }
}
