//! User configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const APP_DIR_NAME: &str = "sandcastle";
pub const CONFIG_DIR_ENV: &str = "SANDCASTLE_CONFIG_DIR";
pub const ACCESS_TOKEN_ENV: &str = "SANDCASTLE_ACCESS_TOKEN";
pub const HOST_ENV: &str = "SANDCASTLE_HOST";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            access_token: None,
        }
    }
}

fn default_host() -> String {
    "https://cloud.sandcastle.dev".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Config file used when a sandbox has to be started without one.
    #[serde(default = "default_config_file")]
    pub default_config_file: String,

    #[serde(default = "default_true")]
    pub sync: bool,

    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    /// Poll interval when the server does not supply a backoff.
    #[serde(default = "default_backoff_ms")]
    pub default_backoff_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_config_file: default_config_file(),
            sync: true,
            ssh_user: default_ssh_user(),
            default_backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_config_file() -> String {
    ".sandcastle/sandbox.yml".to_string()
}

fn default_true() -> bool {
    true
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_backoff_ms() -> u64 {
    crate::sandbox::readiness::DEFAULT_BACKOFF_MS
}

/// Directory holding `config.toml` and the session store.
pub fn get_app_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    let base = dirs::config_dir().context("Could not determine the user config directory")?;
    Ok(base.join(APP_DIR_NAME))
}

fn config_path() -> Result<PathBuf> {
    Ok(get_app_dir()?.join("config.toml"))
}

impl Config {
    /// Load `config.toml`, falling back to defaults when it does not exist,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content)
                .with_context(|| format!("unable to parse {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(token) = std::env::var(ACCESS_TOKEN_ENV).ok().filter(|t| !t.is_empty()) {
            self.api.access_token = Some(token);
        }
        if let Some(host) = std::env::var(HOST_ENV).ok().filter(|h| !h.is_empty()) {
            self.api.host = host;
        }
    }
}
