use std::path::{Path, PathBuf};

use parley_common::{Error, Result};
use tracing::{debug, info};

use crate::model::{AppConfig, LlmProviderConfig};

/// Loads [`AppConfig`] from YAML or TOML, then layers credentials from the environment.
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader pointing at `~/.parley/config.yml`.
    pub fn new() -> Self {
        Self {
            path: Self::default_path(),
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".parley").join("config.yml"))
    }

    pub fn load(&self) -> Result<AppConfig> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();

        let mut config = match &self.path {
            Some(path) if path.exists() => {
                info!("loading config from {}", path.display());
                Self::load_file(path)?
            }
            Some(path) => {
                debug!("no config at {}, using defaults", path.display());
                AppConfig::default()
            }
            None => AppConfig::default(),
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => parse_toml(&contents),
            Some("yml") | Some("yaml") | None => parse_yaml(&contents),
            Some(other) => Err(Error::Config(format!(
                "unsupported config format '.{other}' (expected .yml, .yaml or .toml)"
            ))),
        }
    }
}

pub fn parse_yaml(contents: &str) -> Result<AppConfig> {
    serde_yaml::from_str(contents).map_err(|e| Error::Config(format!("invalid YAML config: {e}")))
}

pub fn parse_toml(contents: &str) -> Result<AppConfig> {
    toml::from_str(contents).map_err(|e| Error::Config(format!("invalid TOML config: {e}")))
}

/// Environment wins over file values for credentials and the local endpoint.
pub fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(token) = lookup("GIGACHAT_ACCESS_TOKEN") {
        provider_entry(&mut config.providers.gigachat).api_key = Some(token);
    }
    if let Some(key) = lookup("OPENROUTER_API_KEY") {
        provider_entry(&mut config.providers.openrouter).api_key = Some(key);
    }
    if let Some(url) = lookup("OLLAMA_BASE_URL") {
        provider_entry(&mut config.providers.ollama).base_url = Some(url);
    }
    if let Some(level) = lookup("PARLEY_LOG") {
        config.logging.level = level;
    }
}

fn provider_entry(slot: &mut Option<LlmProviderConfig>) -> &mut LlmProviderConfig {
    slot.get_or_insert_with(LlmProviderConfig::default)
}
