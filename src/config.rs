//! Configuration loading.
//!
//! A single TOML file describes every collaborator (database, portal, upload
//! endpoint, pipeline and server). Selected keys can be overridden from the
//! environment so the same file works inside containers. The resulting
//! [`Config`] is built once at start-up and passed by reference.

use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    pub portal: PortalConfig,
    pub upload: UploadConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PortalConfig {
    pub url: String,
    #[serde(default = "default_month_param")]
    pub month_param: String,
    #[serde(default = "default_year_param")]
    pub year_param: String,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_portal_timeout")]
    pub timeout_secs: u64,
}

fn default_month_param() -> String {
    "mes".to_string()
}
fn default_year_param() -> String {
    "ano".to_string()
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}
fn default_portal_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    pub url: String,
    #[serde(default = "default_field_name")]
    pub field_name: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,
}

fn default_field_name() -> String {
    "file".to_string()
}
fn default_content_type() -> String {
    "application/pdf".to_string()
}
fn default_upload_timeout() -> u64 {
    60
}

/// Orchestrator tuning.
///
/// `workers` bounds how many documents are uploaded and persisted at once.
/// Keep it small: the upload host rate-limits aggressively.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_api_timeout")]
    pub api_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            api_base_url: default_api_base_url(),
            api_timeout_secs: default_api_timeout(),
        }
    }
}

fn default_workers() -> usize {
    5
}
fn default_api_base_url() -> String {
    "http://127.0.0.1:8000/api".to_string()
}
fn default_api_timeout() -> u64 {
    30
}

/// Read, override from the process environment, and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;

    Ok(config)
}

/// Apply `GAZETTE_*` overrides using `lookup` to resolve variable names.
pub fn apply_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("GAZETTE_DB_PATH") {
        config.db.path = PathBuf::from(v);
    }
    if let Some(v) = lookup("GAZETTE_BIND") {
        config.server.bind = v;
    }
    if let Some(v) = lookup("GAZETTE_PORTAL_URL") {
        config.portal.url = v;
    }
    if let Some(v) = lookup("GAZETTE_DOWNLOAD_DIR") {
        config.portal.download_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("GAZETTE_UPLOAD_URL") {
        config.upload.url = v;
    }
    if let Some(v) = lookup("GAZETTE_API_BASE_URL") {
        config.pipeline.api_base_url = v;
    }
    if let Some(v) = lookup("GAZETTE_WORKERS") {
        config.pipeline.workers = v
            .parse()
            .with_context(|| format!("GAZETTE_WORKERS must be an integer, got '{}'", v))?;
    }
    if let Some(v) = lookup("GAZETTE_API_TIMEOUT_SECS") {
        config.pipeline.api_timeout_secs = v.parse().with_context(|| {
            format!("GAZETTE_API_TIMEOUT_SECS must be an integer, got '{}'", v)
        })?;
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    if config.pipeline.workers == 0 {
        bail!("pipeline.workers must be >= 1");
    }
    if config.pipeline.api_timeout_secs == 0 {
        bail!("pipeline.api_timeout_secs must be >= 1");
    }

    for (key, value) in [
        ("portal.url", &config.portal.url),
        ("upload.url", &config.upload.url),
        ("pipeline.api_base_url", &config.pipeline.api_base_url),
    ] {
        if value.trim().is_empty() {
            bail!("{} must not be empty", key);
        }
        Url::parse(value).with_context(|| format!("{} is not a valid URL: '{}'", key, value))?;
    }

    if config.upload.field_name.is_empty() {
        bail!("upload.field_name must not be empty");
    }

    Ok(())
}
