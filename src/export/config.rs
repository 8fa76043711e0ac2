use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::error::ViewerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub trusted_hosts: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            trusted_hosts: vec!["slack.com".to_string(), "slack-edge.com".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub channels: usize,
    pub fetches: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            fetches: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ViewerConfig {
    pub fetch: FetchConfig,
    pub workers: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialViewerConfig {
    fetch: Option<FetchConfig>,
    workers: Option<WorkerConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => {
            let out = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>();
            if out.is_empty() {
                fallback.to_vec()
            } else {
                out
            }
        }
        Err(_) => fallback.to_vec(),
    }
}

pub fn validate(cfg: &ViewerConfig) -> Result<()> {
    if cfg.fetch.timeout_secs == 0 {
        return Err(ViewerError::InvalidConfig("fetch timeout must be >= 1 second".into()).into());
    }
    if cfg.fetch.trusted_hosts.iter().all(|h| h.trim().is_empty()) {
        return Err(ViewerError::InvalidConfig("at least one trusted host is required".into()).into());
    }
    if cfg.workers.channels == 0 {
        return Err(ViewerError::InvalidConfig("channel workers must be >= 1".into()).into());
    }
    if cfg.workers.fetches == 0 {
        return Err(ViewerError::InvalidConfig("fetch workers must be >= 1".into()).into());
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("SEV_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let base = dirs::config_dir()?;
    Some(base.join("slack-export-viewer").join("config.toml"))
}

fn merge_file_config(base: &mut ViewerConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialViewerConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse config {}: {err}", path.display()))?;
    if let Some(fetch) = parsed.fetch {
        base.fetch = fetch;
    }
    if let Some(workers) = parsed.workers {
        base.workers = workers;
    }
    Ok(())
}

pub fn load_config() -> Result<ViewerConfig> {
    let mut cfg = ViewerConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.fetch.timeout_secs = env_or_u64("SEV_FETCH_TIMEOUT_SECS", cfg.fetch.timeout_secs);
    cfg.fetch.trusted_hosts = env_or_csv("SEV_TRUSTED_HOSTS", &cfg.fetch.trusted_hosts);
    cfg.workers.channels = env_or_usize("SEV_CHANNEL_WORKERS", cfg.workers.channels);
    cfg.workers.fetches = env_or_usize("SEV_FETCH_WORKERS", cfg.workers.fetches);

    validate(&cfg)?;
    Ok(cfg)
}
