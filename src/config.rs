use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CWA_API_URL: &str =
    "https://opendata.cwa.gov.tw/api/v1/rest/datastore/E-A0015-001";

#[derive(Clone, Debug)]
pub struct Config {
    // Discord
    pub webhook_urls: Vec<String>,

    // Central Weather Administration open data
    pub api_key: String,
    pub api_url: String,

    // Watch target
    pub city: String,
    pub area: String,

    // Polling
    pub wait_attempts: u32,
    pub wait_interval: Duration,
    pub http_timeout: Duration,

    // Local state
    pub state_dir: PathBuf,
    pub log_file: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let webhook_urls = split_list(&required("DISCORD_WEBHOOK_URL")?);
        if webhook_urls.is_empty() {
            return Err(ConfigError::InvalidEnvVar(
                "DISCORD_WEBHOOK_URL".to_string(),
                "no webhook url given".to_string(),
            ));
        }

        let api_key = required("EARTHQUAKE_API")?;
        let api_url = env("CWA_API_URL", DEFAULT_CWA_API_URL);
        let city = required("CITY")?;
        let area = env("AREA", "");

        let wait_attempts: u32 = env("WAIT_ATTEMPTS", "30")
            .parse()
            .map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidEnvVar("WAIT_ATTEMPTS".to_string(), e.to_string())
            })?;
        let wait_interval = duration("WAIT_INTERVAL", "30s")?;
        let http_timeout = duration("HTTP_TIMEOUT", "10s")?;

        let state_dir = PathBuf::from(env("STATE_DIR", "."));
        let log_file = resolve(&state_dir, &env("LOG_FILE", "earthquake_log.txt"));

        let config = Self {
            webhook_urls,
            api_key,
            api_url,
            city,
            area,
            wait_attempts,
            wait_interval,
            http_timeout,
            state_dir,
            log_file,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::InvalidEnvVar("EARTHQUAKE_API".to_string(), "cannot be empty".to_string()));
        }
        if self.city.trim().is_empty() {
            return Err(ConfigError::InvalidEnvVar("CITY".to_string(), "cannot be empty".to_string()));
        }
        if self.wait_attempts == 0 {
            return Err(ConfigError::InvalidEnvVar("WAIT_ATTEMPTS".to_string(), "must be at least 1".to_string()));
        }
        if let Some(bad) = self.webhook_urls.iter().find(|u| !u.starts_with("http")) {
            return Err(ConfigError::InvalidEnvVar(
                "DISCORD_WEBHOOK_URL".to_string(),
                format!("not an http(s) url: {}", crate::util::mask_secret(bad, 12, 0)),
            ));
        }
        Ok(())
    }

    pub fn last_id_path(&self) -> PathBuf {
        self.state_dir.join("last_id.txt")
    }

    pub fn file_lock_path(&self) -> PathBuf {
        self.state_dir.join("file.lock")
    }

    pub fn loop_lock_path(&self) -> PathBuf {
        self.state_dir.join("loop.lock")
    }

    pub fn image_path(&self) -> PathBuf {
        self.state_dir.join("latest_report.png")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// `KEY`, falling back to `key` as older `.env` files spell it.
fn lookup(key: &str) -> Option<String> {
    std::env::var(key)
        .or_else(|_| std::env::var(key.to_lowercase()))
        .ok()
}

fn env(key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

fn required(key: &str) -> Result<String, ConfigError> {
    lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn duration(key: &str, default: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(&env(key, default))
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn resolve(base: &Path, raw: &str) -> PathBuf {
    let p = PathBuf::from(raw);
    if p.is_absolute() { p } else { base.join(p) }
}

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
