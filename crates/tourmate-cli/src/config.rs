//! Application configuration management.
//!
//! Holds the backend endpoint, the last backend email and cache tuning.
//! Stored at `~/.config/tourmate/config.json`; environment variables
//! override the file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tourmate_core::store::FileStore;
use tourmate_core::CoreSettings;

/// Application name used for the config directory path
const APP_NAME: &str = "tourmate";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const ENV_SUPABASE_URL: &str = "TOURMATE_SUPABASE_URL";
const ENV_ANON_KEY: &str = "TOURMATE_SUPABASE_ANON_KEY";
const ENV_CACHE_TTL: &str = "TOURMATE_CACHE_TTL_SECS";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    pub supabase_url: Option<String>,
    pub anon_key: Option<String>,
    pub last_email: Option<String>,
    pub cache_ttl_secs: Option<i64>,
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var(ENV_SUPABASE_URL).filter(|v| !v.is_empty()) {
            self.supabase_url = Some(url);
        }
        if let Some(key) = var(ENV_ANON_KEY).filter(|v| !v.is_empty()) {
            self.anon_key = Some(key);
        }
        if let Some(ttl) = var(ENV_CACHE_TTL).filter(|v| !v.is_empty()) {
            let secs = ttl
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of seconds", ENV_CACHE_TTL))?;
            self.cache_ttl_secs = Some(secs);
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Where local state, the backend session and logs live.
    pub fn data_dir(&self) -> Result<PathBuf> {
        FileStore::default_dir()
    }

    /// URL and anon key, when both are configured.
    pub fn backend(&self) -> Option<(&str, &str)> {
        match (self.supabase_url.as_deref(), self.anon_key.as_deref()) {
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty() => Some((url, key)),
            _ => None,
        }
    }

    pub fn core_settings(&self) -> CoreSettings {
        match self.cache_ttl_secs {
            Some(secs) => CoreSettings::default().with_cache_ttl_secs(secs),
            None => CoreSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config {
            supabase_url: Some("https://old.supabase.co".to_string()),
            anon_key: Some("old".to_string()),
            ..Default::default()
        };
        config
            .apply_env(env(&[
                (ENV_SUPABASE_URL, "https://new.supabase.co"),
                (ENV_CACHE_TTL, "60"),
            ]))
            .expect("apply");

        assert_eq!(config.backend(), Some(("https://new.supabase.co", "old")));
        assert_eq!(config.core_settings().cache_ttl, chrono::Duration::seconds(60));
    }

    #[test]
    fn test_bad_ttl_is_rejected() {
        let mut config = Config::default();
        assert!(config.apply_env(env(&[(ENV_CACHE_TTL, "soon")])).is_err());
    }

    #[test]
    fn test_data_dir_matches_store_default() {
        let config = Config::default();
        assert_eq!(config.data_dir().ok(), FileStore::default_dir().ok());
    }

    #[test]
    fn test_backend_requires_both_values() {
        let config = Config {
            supabase_url: Some("https://x.supabase.co".to_string()),
            ..Default::default()
        };
        assert_eq!(config.backend(), None);
        assert_eq!(config.core_settings(), CoreSettings::default());
    }
}
