//! Client configuration.
//!
//! Defaults point at the production API and a per-user credentials file.
//! `from_env` lets tests and local development redirect both without code
//! changes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::client::DEFAULT_BASE_URL;

pub const ENV_API_URL: &str = "VINCA_API_URL";
pub const ENV_CREDENTIALS: &str = "VINCA_CREDENTIALS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub credentials_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            credentials_path: default_credentials_path(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `VINCA_API_URL` / `VINCA_CREDENTIALS` when set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.is_empty()) {
            config.base_url = url;
        }
        if let Some(path) = lookup(ENV_CREDENTIALS).filter(|v| !v.is_empty()) {
            config.credentials_path = PathBuf::from(path);
        }
        config
    }
}

fn default_credentials_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vinca")
        .join("credentials.json")
}
