use serde::{Deserialize, Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

use splitsync_core::{EngineConfig, RemoteConfig};

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

fn mask_secret<S: Serializer>(secret: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match secret {
        Some(_) => serializer.serialize_str("********"),
        None => serializer.serialize_none(),
    }
}

/// Hosted backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemoteSettings {
    /// Backend base URL (e.g., "https://abc.example.co")
    pub url: Option<String>,
    /// Public API key sent with every request
    #[serde(serialize_with = "mask_secret")]
    pub api_key: Option<String>,
    /// User session token; the API key is used when absent
    #[serde(serialize_with = "mask_secret")]
    pub access_token: Option<String>,
}

impl RemoteSettings {
    /// Returns true if the remote is configured (has both url and api_key)
    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.api_key.is_some()
    }
}

/// Sync engine timing, in whole seconds
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineSettings {
    pub flush_interval_secs: Option<u64>,
    pub reconcile_interval_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub remote: RemoteSettings,
    pub engine: EngineSettings,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    remote: Option<RemoteSettings>,
    engine: Option<EngineSettings>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut database_path = ConfigValue::new(
            Self::default_data_dir().join("splitsync.db"),
            ConfigSource::Default,
        );
        let mut config_file = None;
        let mut remote = RemoteSettings::default();
        let mut engine = EngineSettings::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Relative paths are relative to the config file
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(remote_settings) = file_config.remote {
                remote = remote_settings;
            }
            if let Some(engine_settings) = file_config.engine {
                engine = engine_settings;
            }
        }

        if let Ok(db_path) = std::env::var("SPLITSYNC_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("SPLITSYNC_REMOTE_URL") {
            remote.url = Some(url);
        }
        if let Ok(key) = std::env::var("SPLITSYNC_API_KEY") {
            remote.api_key = Some(key);
        }
        if let Ok(token) = std::env::var("SPLITSYNC_ACCESS_TOKEN") {
            remote.access_token = Some(token);
        }

        Ok(Self {
            database_path,
            config_file,
            remote,
            engine,
        })
    }

    /// Engine timing, falling back to the engine defaults for unset keys.
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            flush_interval: self
                .engine
                .flush_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.flush_interval),
            reconcile_interval: self
                .engine
                .reconcile_interval_secs
                .map(Duration::from_secs)
                .or(defaults.reconcile_interval),
            request_timeout: self
                .engine
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }

    /// Backend connection, or `None` when running local-only.
    pub fn remote_config(&self) -> Option<RemoteConfig> {
        let (url, api_key) = match (&self.remote.url, &self.remote.api_key) {
            (Some(url), Some(api_key)) => (url, api_key),
            _ => return None,
        };

        let mut config = RemoteConfig::new(url.as_str(), api_key.as_str())
            .with_request_timeout(self.engine_config().request_timeout);
        if let Some(token) = &self.remote.access_token {
            config = config.with_access_token(token.as_str());
        }
        Some(config)
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/splitsync/
    /// - macOS: ~/Library/Application Support/splitsync/
    /// - Windows: %APPDATA%/splitsync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("splitsync")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/splitsync/
    /// - macOS: ~/Library/Application Support/splitsync/
    /// - Windows: %APPDATA%/splitsync/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("splitsync")
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
