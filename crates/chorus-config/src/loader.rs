use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::Config;

/// Resolve a configured path, expanding ~ to the home directory.
pub fn resolve_path(path: &str) -> PathBuf {
    if path.starts_with("~/") || path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.strip_prefix("~/").unwrap_or(""));
        }
    }
    PathBuf::from(path)
}

/// Find the config file by searching standard locations.
pub fn find_config_path() -> PathBuf {
    // 1. Current directory
    let local = Path::new("config.json");
    if local.exists() {
        return local.to_path_buf();
    }

    // 2. ~/.chorus/config.json
    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".chorus").join("config.json");
        if home_config.exists() {
            return home_config;
        }
    }

    // Default: ~/.chorus/config.json (will use defaults if missing)
    dirs::home_dir()
        .map(|h| h.join(".chorus").join("config.json"))
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

/// Load and validate configuration from a JSON file. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        serde_json::from_str::<Config>(&contents)
            .with_context(|| format!("failed to parse config '{}'", path.display()))?
    } else {
        Config::default()
    };
    config
        .validate()
        .with_context(|| format!("invalid config '{}'", path.display()))?;
    Ok(config)
}

/// Save configuration to a JSON file.
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    let contents = serde_json::to_string_pretty(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create config directory '{}'",
                parent.to_string_lossy()
            )
        })?;
    }
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config '{}'", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = load_config(&dir.path().join("nope.json")).unwrap();
        assert_eq!(cfg.history.capacity, 150);
        assert_eq!(cfg.agents.roster.len(), 4);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut cfg = Config::default();
        cfg.gateway.port = 9000;
        cfg.scheduler.min_delay_ms = 100;
        cfg.scheduler.max_delay_ms = 200;
        save_config(&path, &cfg).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.gateway.port, 9000);
        assert_eq!(loaded.scheduler.min_delay_ms, 100);
        assert_eq!(loaded.scheduler.max_delay_ms, 200);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"scheduler": {"minDelayMs": 5000, "maxDelayMs": 10}}"#,
        )
        .unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("minDelayMs"));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_resolve_path_plain() {
        assert_eq!(resolve_path("/tmp/x.json"), PathBuf::from("/tmp/x.json"));
        assert_eq!(resolve_path("rel/x.json"), PathBuf::from("rel/x.json"));
    }
}
