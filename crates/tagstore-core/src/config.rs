//! Application configuration
//!
//! Values are layered: built-in defaults, then the TOML file
//! (`<config_dir>/tagstore/config.toml`, or `TAGSTORE_CONFIG`), then
//! `TAGSTORE_<KEY>` environment variables for the path-valued keys.
//! Every layer above the file goes through [`Config::set`].

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Keys accepted by [`Config::set`]
pub const KEYS: &[&str] = &["data_dir", "library_file", "storage_dir", "log_file"];

/// Keys that may be overridden from the environment
const ENV_KEYS: &[&str] = &["data_dir", "storage_dir", "log_file"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the library database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Database file name inside `data_dir`
    #[serde(default = "default_library_file")]
    pub library_file: String,

    /// Attached storage root for `managed:` locators
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Log file path (stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            library_file: default_library_file(),
            storage_dir: None,
            log_file: None,
        }
    }
}

impl Config {
    /// Defaults, the config file and the environment, in that order
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Like [`Config::load`] with an explicit file; a missing file means
    /// defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            Self::load_from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Parse TOML; missing keys take their defaults. No environment layer.
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        toml::from_str(toml_content).context("Failed to parse config TOML")
    }

    /// Apply `TAGSTORE_<KEY>` values supplied by `lookup`
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        for key in ENV_KEYS {
            let name = format!("TAGSTORE_{}", key.to_ascii_uppercase());
            if let Some(value) = lookup(&name) {
                self.set(key, &value)
                    .with_context(|| format!("Invalid value in {}", name))?;
            }
        }
        Ok(())
    }

    /// Set one key from its string form
    ///
    /// For optional paths an empty value or `none` clears the key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = || match value {
            "" | "none" => None,
            path => Some(PathBuf::from(path)),
        };
        match key {
            "data_dir" => {
                if value.is_empty() {
                    bail!("data_dir cannot be empty");
                }
                self.data_dir = PathBuf::from(value);
            }
            "library_file" => {
                if value.is_empty() || value.contains(['/', '\\']) {
                    bail!("library_file must be a plain file name");
                }
                self.library_file = value.to_string();
            }
            "storage_dir" => self.storage_dir = optional(),
            "log_file" => self.log_file = optional(),
            _ => bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                KEYS.join(", ")
            ),
        }
        Ok(())
    }

    pub fn ensure_data_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))
    }

    /// `TAGSTORE_CONFIG`, else `<config_dir>/tagstore/config.toml`
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var("TAGSTORE_CONFIG") {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tagstore")
            .join("config.toml")
    }

    pub fn library_path(&self) -> PathBuf {
        self.data_dir.join(&self.library_file)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tagstore")
}

fn default_library_file() -> String {
    "library.db".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.storage_dir.is_none());
        assert!(config.log_file.is_none());
        assert!(config.data_dir.ends_with("tagstore"));
        assert!(config.library_path().ends_with("library.db"));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::load_from_str(
            r#"
            data_dir = "/from/file"
            storage_dir = "/srv/files"
            "#,
        )
        .unwrap();
        config
            .apply_overrides(env(&[
                ("TAGSTORE_DATA_DIR", "/tmp/tagstore-test"),
                ("TAGSTORE_STORAGE_DIR", ""),
                ("TAGSTORE_LIBRARY_FILE", "ignored.db"),
            ]))
            .unwrap();

        assert_eq!(
            config.library_path(),
            PathBuf::from("/tmp/tagstore-test/library.db")
        );
        assert!(config.storage_dir.is_none());
    }

    #[test]
    fn test_invalid_env_value_names_the_variable() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(env(&[("TAGSTORE_DATA_DIR", "")]))
            .unwrap_err();
        assert!(err.to_string().contains("TAGSTORE_DATA_DIR"));
    }

    #[test]
    fn test_set_keys() {
        let mut config = Config::default();
        config.set("library_file", "books.db").unwrap();
        config.set("log_file", "/var/log/tagstore.log").unwrap();
        config.set("log_file", "none").unwrap();
        assert_eq!(config.library_file, "books.db");
        assert!(config.log_file.is_none());

        assert!(config.set("library_file", "a/b.db").is_err());
        assert!(config.set("sync_url", "x").is_err());
    }

    #[test]
    fn test_load_from_str_defaults_missing_keys() {
        let config = Config::load_from_str(r#"library_file = "books.db""#).unwrap();
        assert_eq!(config.library_file, "books.db");
        assert!(config.data_dir.ends_with("tagstore"));
        assert!(Config::load_from_str("library_file = 3").is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config {
            data_dir: dir.path().join("data"),
            library_file: "x.db".to_string(),
            storage_dir: Some(dir.path().join("files")),
            log_file: None,
        };
        config.save_to_path(&path).unwrap();

        let reloaded = Config::load_from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded.data_dir, config.data_dir);
        assert_eq!(reloaded.library_file, "x.db");
        assert_eq!(reloaded.storage_dir, config.storage_dir);
    }
}
