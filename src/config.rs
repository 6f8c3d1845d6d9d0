//! User configuration loading from `~/.nusprofs/config.toml`.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR: &str = ".nusprofs";
const CONFIG_FILE: &str = "config.toml";
const SESSION_FILE: &str = "session.json";
const API_URL_ENV: &str = "NUSPROFS_API_URL";

pub const DEFAULT_BASE_URL: &str = "https://nusprofs-api.onrender.com";
pub const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

const DEFAULT_CONFIG_TOML: &str = r##"# nusprofs configuration
# Durations accept humantime strings such as "30s", "2m", or "1m 30s".

[api]
base_url = "https://nusprofs-api.onrender.com"
page_size = 20
timeout = "30s"
# How long a successful token verify is trusted before verifying again.
verify_ttl = "30s"

[session]
# Token file; defaults to ~/.nusprofs/session.json.
# path = "/path/to/session.json"
"##;

/// Settings for talking to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub base_url: String,
    pub page_size: u32,
    pub timeout: Duration,
    pub verify_ttl: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            page_size: DEFAULT_PAGE_SIZE,
            timeout: Duration::from_secs(30),
            verify_ttl: Duration::from_secs(30),
        }
    }
}

/// Application configuration loaded from disk.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub session_path: PathBuf,
}

/// Returns the config file path and creates default config if missing.
pub fn ensure_config_file() -> Result<PathBuf> {
    let path = config_path()?;
    ensure_default_config(&path)?;
    Ok(path)
}

/// Loads configuration, creating defaults if missing, then applies env overrides.
pub fn load_or_create() -> Result<AppConfig> {
    let path = ensure_config_file()?;
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;

    let mut config = parse_config(&content, &config_dir()?)
        .with_context(|| format!("invalid config in {}", path.display()))?;

    if let Some(url) = env::var_os(API_URL_ENV) {
        let url = url.to_string_lossy().trim().to_owned();
        if !url.is_empty() {
            config.api.base_url = url;
        }
    }

    Ok(config)
}

fn parse_config(content: &str, config_dir: &Path) -> Result<AppConfig> {
    let raw: RawConfig = toml::from_str(content).context("failed to parse TOML")?;
    let defaults = ApiConfig::default();

    let page_size = raw.api.page_size.unwrap_or(defaults.page_size);
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(anyhow!(
            "`api.page_size` must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
        ));
    }

    let api = ApiConfig {
        base_url: raw
            .api
            .base_url
            .map(|url| url.trim().to_owned())
            .filter(|url| !url.is_empty())
            .unwrap_or(defaults.base_url),
        page_size,
        timeout: parse_or_default(raw.api.timeout, defaults.timeout, "api.timeout")?,
        verify_ttl: parse_or_default(raw.api.verify_ttl, defaults.verify_ttl, "api.verify_ttl")?,
    };

    let session_path = raw
        .session
        .path
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir.join(SESSION_FILE));

    Ok(AppConfig { api, session_path })
}

fn config_dir() -> Result<PathBuf> {
    let home =
        env::var_os("HOME").ok_or_else(|| anyhow!("HOME environment variable is not set"))?;
    Ok(PathBuf::from(home).join(CONFIG_DIR))
}

fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

fn ensure_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }

    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("invalid config path: {}", path.display()))?;
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    fs::write(path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("failed to write default config file {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    api: RawApi,
    session: RawSession,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApi {
    base_url: Option<String>,
    page_size: Option<u32>,
    timeout: Option<String>,
    verify_ttl: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSession {
    path: Option<String>,
}

fn parse_or_default(value: Option<String>, default: Duration, field: &str) -> Result<Duration> {
    match value {
        Some(raw) => humantime::parse_duration(raw.trim())
            .with_context(|| format!("invalid duration for `{field}`: {raw}")),
        None => Ok(default),
    }
}
