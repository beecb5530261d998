//! Config command handlers

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use tagstore_core::Config;

use crate::output::{Output, OutputFormat};

fn optional_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(not set)".to_string())
}

/// Show current configuration
pub fn show(config: &Config, output: &Output) -> Result<()> {
    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "library_file": config.library_file,
                    "library_path": config.library_path(),
                    "storage_dir": config.storage_dir,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.library_path().display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:     {}", config.data_dir.display());
            println!("  library_file: {}", config.library_file);
            println!("  storage_dir:  {}", optional_path(&config.storage_dir));
            println!("  log_file:     {}", optional_path(&config.log_file));
            println!();
            println!("Library:     {}", config.library_path().display());
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value and save it to `config_path`
pub fn set(key: String, value: String, config_path: &Path, output: &Output) -> Result<()> {
    let mut config =
        Config::load_from_path(config_path).context("Failed to load configuration")?;
    config.set(&key, &value)?;
    config
        .save_to_path(config_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);

        set("library_file".into(), "books.db".into(), &path, &output).unwrap();
        set("storage_dir".into(), "/srv/files".into(), &path, &output).unwrap();
        set("storage_dir".into(), "none".into(), &path, &output).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("library_file = \"books.db\""));
        assert!(!content.contains("storage_dir"));
    }

    #[test]
    fn test_set_rejects_unknown_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);
        assert!(set("sync_url".into(), "x".into(), &path, &output).is_err());
        assert!(!path.exists());
    }
}
