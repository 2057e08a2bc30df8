use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub host: HostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Public URL the relay is reached at.
    pub url: String,
    pub port: u16,
    /// Optional admin API bind address (`/health`, `/tunnels`).
    pub admin_bind: Option<String>,
    /// Deadline for one request/reply exchange with a host, in seconds.
    /// Zero disables it.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Relay to connect to.
    pub url: String,
    pub domain: Option<String>,
    pub key: Option<String>,
    pub folder: PathBuf,
    pub reconnect_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "localhost".to_string(),
            port: 8010,
            admin_bind: None,
            request_timeout_secs: 30,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            url: "https://hostyoself.com".to_string(),
            domain: None,
            key: None,
            folder: PathBuf::from("."),
            reconnect_secs: 10,
        }
    }
}

impl Config {
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config_file = config_dir.join("config.toml");

        if config_file.exists() {
            let contents = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            toml::from_str(&contents).with_context(|| "Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, config_dir: &Path) -> Result<()> {
        let config_file = config_dir.join("config.toml");
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_file))?;
        Ok(())
    }
}

impl RelayConfig {
    /// Public URL with a scheme, and the port when it is bare `localhost`.
    pub fn public_url(&self) -> String {
        let mut url = self.url.trim_end_matches('/').to_string();
        if url == "localhost" {
            url = format!("{}:{}", url, self.port);
        }
        if !url.starts_with("http") {
            url = format!("http://{}", url);
        }
        url
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

impl HostConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }
}
