//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use ghcrawl_core::{Credential, RateLimitPolicy, RetryPolicy, WorkerConfig};
use ghcrawl_github::{ClientOptions, DEFAULT_BASE_URL, DEFAULT_USER_AGENT};
use serde::Deserialize;

/// Global configuration for ghcrawl
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub output: OutputConfig,
    pub api: ApiConfig,
    pub pipeline: PipelineSettings,
    pub credentials: Vec<CredentialConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/github.duckdb"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub rotate_bytes: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/archive"),
            rotate_bytes: ghcrawl_core::sink::DEFAULT_ROTATE_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Per-request deadline in seconds
    pub request_timeout: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    /// Sleep for the quota reset once fewer calls than this remain
    pub quota_floor: i64,
    /// Seconds added past the advertised reset time
    pub quota_buffer: u64,
    pub max_retries: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: ghcrawl_core::pipeline::DEFAULT_QUEUE_CAPACITY,
            quota_floor: ghcrawl_core::ratelimit::DEFAULT_QUOTA_FLOOR,
            quota_buffer: ghcrawl_core::ratelimit::DEFAULT_RESET_BUFFER.as_secs(),
            max_retries: RetryPolicy::default().max_retries,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    pub account: String,
    #[serde(default, deserialize_with = "deserialize_env_var")]
    pub token: Option<String>,
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./ghcrawl.toml (current directory)
    /// 2. ~/.config/ghcrawl/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("ghcrawl.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "ghcrawl") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Usable credentials; entries whose token did not resolve are skipped.
    ///
    /// Without any `[[credentials]]` entry, `GITHUB_TOKEN` is used if set.
    pub fn credentials(&self) -> Vec<Credential> {
        if self.credentials.is_empty() {
            return std::env::var("GITHUB_TOKEN")
                .ok()
                .filter(|t| !t.is_empty())
                .map(|token| Credential {
                    account: "GITHUB_TOKEN".to_string(),
                    token,
                })
                .into_iter()
                .collect();
        }
        self.credentials
            .iter()
            .filter_map(|c| match &c.token {
                Some(token) if !token.is_empty() => Some(Credential {
                    account: c.account.clone(),
                    token: token.clone(),
                }),
                _ => {
                    log::warn!("No token for credential '{}', skipping", c.account);
                    None
                }
            })
            .collect()
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            base_url: self.api.base_url.clone(),
            user_agent: self.api.user_agent.clone(),
            request_timeout: Duration::from_secs(self.api.request_timeout),
        }
    }

    pub fn worker_config(&self, max_retries: Option<u32>) -> WorkerConfig {
        WorkerConfig {
            request_timeout: Duration::from_secs(self.api.request_timeout),
            rate_limit: RateLimitPolicy {
                floor: self.pipeline.quota_floor,
                buffer: Duration::from_secs(self.pipeline.quota_buffer),
            },
            retry: RetryPolicy {
                max_retries: max_retries.unwrap_or(self.pipeline.max_retries),
                ..RetryPolicy::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.output.rotate_bytes, 100_000_000);
        assert_eq!(config.pipeline.queue_capacity, 100);
        assert_eq!(config.pipeline.quota_floor, 250);
        assert_eq!(config.pipeline.quota_buffer, 10);
        assert_eq!(config.api.request_timeout, 20);
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("GHCRAWL_TEST_TOKEN", "ghp_test");
        assert_eq!(
            expand_env_var("${GHCRAWL_TEST_TOKEN}"),
            Some("ghp_test".to_string())
        );
        std::env::remove_var("GHCRAWL_TEST_TOKEN");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[database]
path = "/tmp/gh.duckdb"

[output]
dir = "/tmp/archive"
rotate_bytes = 1000

[pipeline]
quota_floor = 100
max_retries = 5

[[credentials]]
account = "first"
token = "abc"

[[credentials]]
account = "second"
token = "${NONEXISTENT_VAR_12345}"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/gh.duckdb"));
        assert_eq!(config.output.rotate_bytes, 1000);
        assert_eq!(config.pipeline.quota_floor, 100);
        assert_eq!(config.pipeline.queue_capacity, 100);

        let credentials = config.credentials();
        assert_eq!(credentials.len(), 1);
        assert_eq!(credentials[0].account, "first");

        let worker = config.worker_config(None);
        assert_eq!(worker.retry.max_retries, 5);
        assert_eq!(worker.rate_limit.floor, 100);
        assert_eq!(config.worker_config(Some(0)).retry.max_retries, 0);
    }

    #[test]
    fn from_file_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ghcrawl.toml");
        std::fs::write(&path, "[output\n").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("ghcrawl.toml"));
    }
}
