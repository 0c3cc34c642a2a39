//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, the health endpoint, the last used
//! email and the offline cache limits.
//!
//! Configuration is stored at `~/.config/evocache/config.json`. The
//! `EVOCACHE_API_URL` and `EVOCACHE_CACHE_DIR` environment variables take
//! precedence over the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "evocache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3001/api";

pub const API_URL_ENV: &str = "EVOCACHE_API_URL";
pub const CACHE_DIR_ENV: &str = "EVOCACHE_CACHE_DIR";

const DEFAULT_MAX_OFFLINE_COURSES: usize = 50;
const DEFAULT_DASHBOARD_DEBOUNCE_SECS: u64 = 300;

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_max_offline_courses() -> usize {
    DEFAULT_MAX_OFFLINE_COURSES
}

fn default_dashboard_debounce_secs() -> u64 {
    DEFAULT_DASHBOARD_DEBOUNCE_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Overrides `{api_base_url}/health` for the reachability probe.
    #[serde(default)]
    pub health_url: Option<String>,
    #[serde(default)]
    pub last_email: Option<String>,
    /// 0 disables the limit.
    #[serde(default = "default_max_offline_courses")]
    pub max_offline_courses: usize,
    #[serde(default = "default_dashboard_debounce_secs")]
    pub dashboard_debounce_secs: u64,
    /// Set from `EVOCACHE_CACHE_DIR`, never persisted.
    #[serde(skip)]
    cache_dir_override: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            health_url: None,
            last_email: None,
            max_offline_courses: DEFAULT_MAX_OFFLINE_COURSES,
            dashboard_debounce_secs: DEFAULT_DASHBOARD_DEBOUNCE_SECS,
            cache_dir_override: None,
        }
    }
}

impl Config {
    /// Load the config file (or defaults) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from `lookup` (normally the process environment).
    /// Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = value(API_URL_ENV) {
            self.api_base_url = url;
        }
        if let Some(dir) = value(CACHE_DIR_ENV) {
            self.cache_dir_override = Some(PathBuf::from(dir));
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir_override {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn health_url(&self) -> String {
        match self.health_url {
            Some(ref url) => url.clone(),
            None => format!("{}/health", self.api_base_url.trim_end_matches('/')),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            dashboard_debounce: Duration::seconds(self.dashboard_debounce_secs as i64),
            max_courses: (self.max_offline_courses > 0).then_some(self.max_offline_courses),
            ..CacheConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_base_url, "http://localhost:3001/api");
        assert_eq!(config.health_url(), "http://localhost:3001/api/health");

        let cache = config.cache_config();
        assert_eq!(cache.max_courses, Some(50));
        assert_eq!(cache.dashboard_debounce, Duration::minutes(5));
        assert_eq!(cache.course_max_age, CacheConfig::default().course_max_age);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"last_email":"ana@example.com","max_offline_courses":0}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.last_email.as_deref(), Some("ana@example.com"));
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.cache_config().max_courses, None);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            health_url: Some("http://probe.local/ping".to_string()),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.health_url(), "http://probe.local/ping");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (API_URL_ENV, "https://evo.example.com/api/"),
            (CACHE_DIR_ENV, "/tmp/evo-cache"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.api_base_url, "https://evo.example.com/api/");
        assert_eq!(config.health_url(), "https://evo.example.com/api/health");
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/evo-cache"));
    }

    #[test]
    fn test_blank_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|_| Some("  ".to_string()));
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
    }
}
