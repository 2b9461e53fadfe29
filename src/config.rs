use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::http::parser::DEFAULT_MAX_REQUEST_BYTES;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    /// Value of the `Server` response header.
    pub server_name: String,
    pub idle_timeout_secs: u64,
    pub max_request_bytes: usize,
    pub date_refresh_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            server_name: "conduit".to_string(),
            idle_timeout_secs: 5,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            date_refresh_ms: 1000,
        }
    }
}

impl Config {
    /// Loads the YAML file named by `CONDUIT_CONFIG` (default `conduit.yaml`),
    /// falling back to defaults if it does not exist. `LISTEN` overrides the
    /// listen address.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONDUIT_CONFIG").unwrap_or_else(|_| "conduit.yaml".to_string());
        let mut cfg = if Path::new(&path).exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.listen_addr = listen_addr;
        }
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn date_refresh(&self) -> Duration {
        Duration::from_millis(self.date_refresh_ms.max(1))
    }
}
