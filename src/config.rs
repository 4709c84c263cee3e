use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::domain::Credentials;
use crate::library::{ActionClass, BatchPolicy};

const USERNAME_ENV: &str = "PIKARR_USERNAME";
const PASSWORD_ENV: &str = "PIKARR_PASSWORD";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub remote: RemoteConfig,

    pub credentials: CredentialsConfig,

    pub governor: GovernorConfig,

    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,

    /// "pretty" or "json"
    pub log_format: String,

    #[serde(default)]
    pub suppress_connection_errors: bool,

    /// Event bus buffer size (default: 100)
    pub event_bus_buffer_size: usize,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            suppress_connection_errors: false,
            event_bus_buffer_size: 100,
            worker_threads: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,

    /// Request timeout in seconds (default: 30)
    pub request_timeout_seconds: u64,

    pub user_agent: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002".to_string(),
            request_timeout_seconds: 30,
            user_agent: "Pikarr/0.1".to_string(),
        }
    }
}

/// Cloud drive account. Both values may also come from the environment.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub username: Option<String>,

    pub password: Option<String>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CredentialsConfig {
    /// Returns the account only when both fields are present and usable.
    #[must_use]
    pub fn resolve(&self) -> Option<Credentials> {
        let credentials = Credentials::new(self.username.clone()?, self.password.clone()?);
        credentials.is_complete().then_some(credentials)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(username) = std::env::var(USERNAME_ENV) {
            self.username = Some(username);
        }
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            self.password = Some(password);
        }
    }
}

/// Minimum spacing between non-forced calls of one action on one folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub list_cooldown_ms: u64,

    pub refresh_cooldown_ms: u64,

    pub rename_cooldown_ms: u64,

    pub delete_cooldown_ms: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            list_cooldown_ms: 2000,
            refresh_cooldown_ms: 2000,
            rename_cooldown_ms: 0,
            delete_cooldown_ms: 0,
        }
    }
}

impl GovernorConfig {
    #[must_use]
    pub const fn cooldown(&self, action: ActionClass) -> Duration {
        let ms = match action {
            ActionClass::ListEpisodes => self.list_cooldown_ms,
            ActionClass::RefreshLinks => self.refresh_cooldown_ms,
            ActionClass::Rename => self.rename_cooldown_ms,
            ActionClass::Delete => self.delete_cooldown_ms,
        };
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Files per upstream refresh call (default: 3)
    pub chunk_size: usize,

    /// Pause between two refresh calls of one job (default: 8)
    pub inter_chunk_delay_seconds: u64,

    /// Cancel a running job when its view is closed instead of letting it
    /// finish in the background.
    pub cancel_on_close: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 3,
            inter_chunk_delay_seconds: 8,
            cancel_on_close: false,
        }
    }
}

impl BatchConfig {
    #[must_use]
    pub const fn policy(&self) -> BatchPolicy {
        BatchPolicy {
            chunk_size: self.chunk_size,
            inter_chunk_delay: Duration::from_secs(self.inter_chunk_delay_seconds),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // A missing .env file is the common case.
        let _ = dotenvy::dotenv();

        let mut config = Self::load_from_first_existing(&Self::config_paths())?;
        config.credentials.apply_env_overrides();
        Ok(config)
    }

    /// Worker thread count for the runtime. A config file that does not load
    /// yields the default here; `run` reports the error once `init` has had
    /// its chance to run.
    #[must_use]
    pub fn runtime_worker_threads() -> usize {
        Self::worker_threads_from(&Self::config_paths())
    }

    fn worker_threads_from(paths: &[PathBuf]) -> usize {
        Self::load_from_first_existing(paths)
            .unwrap_or_default()
            .general
            .worker_threads
    }

    fn load_from_first_existing(paths: &[PathBuf]) -> Result<Self> {
        for path in paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![Self::default_config_path()];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("pikarr").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".pikarr").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("pikarr.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote.base_url.trim().is_empty() {
            anyhow::bail!("Remote base URL cannot be empty");
        }

        if self.batch.chunk_size == 0 {
            anyhow::bail!("Batch chunk size must be at least 1");
        }

        if !matches!(self.general.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!(
                "Unknown log format '{}', expected \"pretty\" or \"json\"",
                self.general.log_format
            );
        }

        Ok(())
    }
}
