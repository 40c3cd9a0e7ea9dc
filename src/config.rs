//! YAML configuration for embedding the engine in a daemon.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub listen: ListenConfig,
    pub tls: Option<TlsConfig>,
    pub limits: Option<LimitsConfig>,
    /// Extra Root DSE attributes advertised on top of the defaults
    /// (e.g. vendorName, namingContexts).
    pub root_dse: Option<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    /// ldap://host:port or ldaps://host:port
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Per-request processing deadline in seconds (default 10).
    pub processing_timeout_sec: Option<u64>,
    /// Per-response write deadline in seconds (default 5).
    pub response_timeout_sec: Option<u64>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Config::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(
            self.limits
                .as_ref()
                .and_then(|l| l.processing_timeout_sec)
                .unwrap_or(10),
        )
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(
            self.limits
                .as_ref()
                .and_then(|l| l.response_timeout_sec)
                .unwrap_or(5),
        )
    }

    /// Address portion of the listen URL, and whether it is ldaps://.
    pub fn listen_addr(&self) -> Result<(String, bool)> {
        let url = &self.listen.url;
        if let Some(rest) = url.strip_prefix("ldap://") {
            Ok((rest.trim_start_matches('/').to_string(), false))
        } else if let Some(rest) = url.strip_prefix("ldaps://") {
            Ok((rest.trim_start_matches('/').to_string(), true))
        } else {
            anyhow::bail!("Invalid URL scheme, expected ldap:// or ldaps://")
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ListenConfig {
                url: "ldap://127.0.0.1:1389".to_string(),
            },
            tls: None,
            limits: None,
            root_dse: None,
        }
    }
}
