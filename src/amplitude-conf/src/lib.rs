//! Configuration of the Amplitude client: a JSON file in the home directory,
//! overridden by environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use amplitude_sdk::client::UnknownServerZone;
use amplitude_sdk::{Client, ClientOptions, RetryPolicy, ServerZone};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const API_KEY_VAR: &str = "AMPLITUDE_API_KEY";
pub const SERVER_ZONE_VAR: &str = "AMPLITUDE_SERVER_ZONE";
pub const SERVER_URL_VAR: &str = "AMPLITUDE_SERVER_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("home directory not found")]
    HomeNotFound,
    #[error("no API key configured, set AMPLITUDE_API_KEY or api_key in the config file")]
    MissingApiKey,
    #[error(transparent)]
    InvalidServerZone(#[from] UnknownServerZone),
    #[error("failed to create client: {0}")]
    Client(#[from] amplitude_sdk::Error),
}

/// Settings from `~/.amplitude/config.json`. Everything is optional and
/// falls back to the client defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_key: Option<String>,
    pub server_zone: Option<ServerZone>,
    pub server_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<usize>,
    pub min_id_length: Option<u32>,
}

impl Config {
    /// Loads the config file, if there is one, and applies environment
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config = match Self::default_path() {
            Ok(config_path) => Self::load_from(&config_path)?,
            Err(ConfigError::HomeNotFound) => {
                tracing::debug!("home directory not found, using empty config");
                Config::default()
            }
            Err(err) => return Err(err),
        };
        config.apply_env()
    }

    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home_dir = env::var("HOME").map_err(|_| ConfigError::HomeNotFound)?;
        Ok(Path::new(&home_dir).join(".amplitude").join("config.json"))
    }

    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            tracing::debug!(config_path = %config_path.display(), "no config file found, using empty config");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|name| env::var(name).ok())
    }

    /// Overrides settings with the non-empty variables `lookup` returns.
    pub fn apply_env_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(api_key) = var(API_KEY_VAR) {
            self.api_key = Some(api_key);
        }
        if let Some(server_zone) = var(SERVER_ZONE_VAR) {
            self.server_zone = Some(server_zone.parse()?);
        }
        if let Some(server_url) = var(SERVER_URL_VAR) {
            self.server_url = Some(server_url);
        }
        Ok(self)
    }

    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn client_options(&self) -> ClientOptions {
        let defaults = ClientOptions::default();
        let mut retry = RetryPolicy::default();
        if let Some(max_retries) = self.max_retries {
            retry.max_retries = max_retries;
        }

        ClientOptions {
            server_zone: self.server_zone.unwrap_or(defaults.server_zone),
            server_url: self.server_url.clone(),
            timeout: self
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            retry,
            min_id_length: self.min_id_length,
        }
    }

    pub fn client(&self) -> Result<Client, ConfigError> {
        let client = Client::with_options(self.api_key()?, self.client_options())?;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_config_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"api_key": "file-key", "server_zone": "Eu", "timeout_secs": 3, "max_retries": 5, "min_id_length": 1}}"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.api_key().unwrap(), "file-key");
        assert_eq!(config.server_zone, Some(ServerZone::Eu));

        let options = config.client_options();
        assert_eq!(options.server_zone, ServerZone::Eu);
        assert_eq!(options.timeout, Duration::from_secs(3));
        assert_eq!(options.retry.max_retries, 5);
        assert_eq!(options.min_id_length, Some(1));
    }

    #[test]
    fn test_config_load_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(
            Config::load_from(file.path()),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_env_overrides_file() {
        let config = Config {
            api_key: Some("file-key".to_string()),
            server_zone: Some(ServerZone::Us),
            ..Default::default()
        }
        .apply_env_from(env_of(&[
            (API_KEY_VAR, "env-key"),
            (SERVER_ZONE_VAR, "eu"),
            (SERVER_URL_VAR, ""),
        ]))
        .unwrap();

        assert_eq!(config.api_key().unwrap(), "env-key");
        assert_eq!(config.server_zone, Some(ServerZone::Eu));
        assert_eq!(config.server_url, None);
    }

    #[test]
    fn test_env_invalid_server_zone() {
        let result = Config::default().apply_env_from(env_of(&[(SERVER_ZONE_VAR, "mars")]));
        assert!(matches!(result, Err(ConfigError::InvalidServerZone(_))));
    }

    #[test]
    fn test_missing_api_key() {
        assert!(matches!(
            Config::default().api_key(),
            Err(ConfigError::MissingApiKey)
        ));
        assert!(matches!(
            Config::default().client(),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn test_client_from_config() {
        let config = Config {
            api_key: Some("key".to_string()),
            server_url: Some("http://localhost:8080".to_string()),
            ..Default::default()
        };
        let client = config.client().unwrap();
        assert_eq!(client.server_url(), "http://localhost:8080");
    }

    #[test]
    fn test_defaults() {
        let options = Config::default().client_options();
        assert_eq!(options.server_zone, ServerZone::Us);
        assert_eq!(options.retry, RetryPolicy::default());
        assert_eq!(options.server_url, None);
    }
}
