use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::categories::UNCATEGORIZED;
use crate::domain::Granularity;

fn default_granularity() -> Granularity {
    Granularity::Monthly
}

fn default_fallback_category() -> String {
    UNCATEGORIZED.to_string()
}

fn default_cache_ttl_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the back-office API, e.g. `https://console.example.com/api`.
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// Bearer token sent with every API request.
    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_granularity")]
    pub default_granularity: Granularity,

    /// Label used for outflows without a category.
    #[serde(default = "default_fallback_category")]
    pub fallback_category: String,

    /// How long a fetched snapshot is served from the local cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_token: None,
            default_granularity: default_granularity(),
            fallback_category: default_fallback_category(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl AppConfig {
    /// Flag/env override first, then the config file.
    pub fn api_endpoint(
        &self,
        url_override: Option<&str>,
        token_override: Option<&str>,
    ) -> Result<(String, Option<String>)> {
        let url = url_override
            .map(str::to_string)
            .or_else(|| self.api_base_url.clone())
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "No API configured. Pass --input <file.json>, set TRESOR_API_URL, or run: tresor config set-api <url>"
                )
            })?;
        let token = token_override
            .map(str::to_string)
            .or_else(|| self.api_token.clone())
            .filter(|t| !t.trim().is_empty());
        Ok((url, token))
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

pub fn app_paths(override_home: Option<PathBuf>) -> Result<AppPaths> {
    if let Some(home) = override_home {
        return Ok(AppPaths {
            config_dir: home.join("config"),
            data_dir: home.join("data"),
        });
    }

    let proj = ProjectDirs::from("com", "tresor", "tresor")
        .context("Failed to resolve platform directories")?;

    Ok(AppPaths {
        config_dir: proj.config_dir().to_path_buf(),
        data_dir: proj.data_dir().to_path_buf(),
    })
}

pub fn load_or_init_config(paths: &AppPaths) -> Result<(AppConfig, PathBuf)> {
    fs::create_dir_all(&paths.config_dir)
        .with_context(|| format!("Failed to create config dir {}", paths.config_dir.display()))?;

    let cfg_path = paths.config_dir.join("config.json");
    if !cfg_path.exists() {
        let cfg = AppConfig::default();
        write_config(&cfg_path, &cfg)?;
        return Ok((cfg, cfg_path));
    }

    let raw = fs::read_to_string(&cfg_path)
        .with_context(|| format!("Failed to read {}", cfg_path.display()))?;
    let mut cfg: AppConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", cfg_path.display()))?;

    // Older configs may carry a blank fallback label.
    if cfg.fallback_category.trim().is_empty() {
        cfg.fallback_category = default_fallback_category();
        write_config(&cfg_path, &cfg)?;
    }

    Ok((cfg, cfg_path))
}

pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(cfg)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}
