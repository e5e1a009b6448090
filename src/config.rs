//! config.toml handling.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "tenant-console";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub metrics_refresh_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub notification_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub session_file: Option<PathBuf>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:30001".into(),
            poll_interval: Duration::from_secs(5),
            metrics_refresh_interval: Duration::from_secs(5),
            notification_ttl: Duration::from_secs(6),
            request_timeout: Duration::from_secs(15),
            session_file: None,
        }
    }
}

impl ConsoleConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: ConsoleConfig = toml::from_str(&content)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    /// An explicit path must exist; the default location is optional.
    /// The result is not validated: flag overrides are applied first.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Ok(match explicit {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        })
    }

    pub fn validated(mut self) -> Result<Self> {
        let trimmed = self.base_url.trim().trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            bail!("base_url must not be empty");
        }
        reqwest::Url::parse(&trimmed).with_context(|| format!("invalid base_url {trimmed:?}"))?;
        self.base_url = trimmed;
        for (name, d) in [
            ("poll_interval", self.poll_interval),
            ("metrics_refresh_interval", self.metrics_refresh_interval),
            ("notification_ttl", self.notification_ttl),
            ("request_timeout", self.request_timeout),
        ] {
            if d.is_zero() {
                bail!("{name} must be greater than zero");
            }
        }
        Ok(self)
    }

    pub fn session_path(&self) -> PathBuf {
        if let Some(p) = &self.session_file {
            return p.clone();
        }
        dirs::config_dir()
            .map(|d| d.join(APP_DIR).join("session.json"))
            .unwrap_or_else(|| PathBuf::from(".tenant-console-session.json"))
    }

    pub fn log_path() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::cache_dir)
            .map(|d| d.join(APP_DIR).join("console.log"))
            .unwrap_or_else(|| PathBuf::from("tenant-console.log"))
    }
}
