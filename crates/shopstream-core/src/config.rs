//! Configuration loading.
//!
//! Loads configuration from ${SHOPSTREAM_HOME}/config.toml with sensible
//! defaults. `SHOPSTREAM_BASE_URL` overrides the backend URL.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::transcript::StepPolicy;

/// Environment variable that overrides `backend.base_url`.
pub const BASE_URL_ENV: &str = "SHOPSTREAM_BASE_URL";

/// Returns the default config template content.
pub fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

pub mod paths {
    //! Path resolution for shopstream configuration.
    //!
    //! SHOPSTREAM_HOME resolution order:
    //! 1. SHOPSTREAM_HOME environment variable (if set)
    //! 2. ~/.config/shopstream (default)

    use std::path::PathBuf;

    /// Returns the shopstream home directory.
    ///
    /// Falls back to a relative `.shopstream` when no home directory exists.
    pub fn shopstream_home() -> PathBuf {
        if let Ok(home) = std::env::var("SHOPSTREAM_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".shopstream"),
            |h| h.join(".config").join("shopstream"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        shopstream_home().join("config.toml")
    }
}

/// Chat backend connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend root URL; endpoint paths are joined below it.
    pub base_url: String,
    /// Timeout in seconds (0 disables)
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl BackendConfig {
    const DEFAULT_BASE_URL: &str = "http://localhost:8000";
    const DEFAULT_TIMEOUT_SECS: u64 = 30;

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fixed session id; a fresh one is generated per run when unset.
    pub session_id: Option<String>,

    pub backend: BackendConfig,

    /// Step classification and visibility.
    pub steps: StepPolicy,
}

impl Config {
    /// Loads configuration from the default config path and applies
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&paths::config_path())?;
        config.apply_base_url_override(std::env::var(BASE_URL_ENV).ok());
        Ok(config)
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Replaces the backend URL when `value` is set and non-blank.
    pub fn apply_base_url_override(&mut self, value: Option<String>) {
        if let Some(url) = value.filter(|v| !v.trim().is_empty()) {
            self.backend.base_url = url.trim().to_string();
        }
    }

    /// Returns the configured session id, or a fresh random one.
    pub fn effective_session_id(&self) -> String {
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string)
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, default_config_template())
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::transcript::Stage;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.backend.base_url, "http://localhost:8000");
        assert_eq!(config.backend.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_load_partial_config_merges_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "session_id = \"s-42\"\n[backend]\ntimeout_secs = 0\n[steps]\nhidden_nodes = [\"__\"]\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.session_id.as_deref(), Some("s-42"));
        assert_eq!(config.backend.base_url, "http://localhost:8000");
        assert_eq!(config.backend.timeout(), None);
        assert_eq!(config.steps.hidden_nodes, vec!["__"]);
        assert_eq!(config.steps.rules, StepPolicy::default().rules);
    }

    #[test]
    fn test_load_invalid_toml_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[backend\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config"));
    }

    #[test]
    fn test_default_template_matches_defaults() {
        let parsed: Config = toml::from_str(default_config_template()).unwrap();
        assert_eq!(parsed, Config::default());
        assert_eq!(parsed.steps.classify("rag_agent"), Stage::ReviewSearch);
    }

    #[test]
    fn test_init_creates_config_and_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        Config::init(&path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            default_config_template()
        );
        assert!(Config::init(&path).is_err());
    }

    #[test]
    fn test_base_url_override() {
        let mut config = Config::default();
        config.apply_base_url_override(Some("   ".into()));
        assert_eq!(config.backend.base_url, "http://localhost:8000");

        config.apply_base_url_override(Some(" http://backend:9000 ".into()));
        assert_eq!(config.backend.base_url, "http://backend:9000");

        config.apply_base_url_override(None);
        assert_eq!(config.backend.base_url, "http://backend:9000");
    }

    #[test]
    fn test_effective_session_id() {
        let config = Config {
            session_id: Some("fixed".into()),
            ..Config::default()
        };
        assert_eq!(config.effective_session_id(), "fixed");

        let generated = Config::default().effective_session_id();
        assert!(uuid::Uuid::parse_str(&generated).is_ok());
        assert_ne!(generated, Config::default().effective_session_id());
    }
}
