use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use crate::provider::ProviderId;

/// Configuration for a single provider (e.g., API key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
}

/// Timeout bounds for one resolution attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Timeouts {
    /// Seconds to wait for a position before giving up.
    #[serde(default = "default_locate_secs")]
    pub locate_secs: u64,

    /// Seconds to wait for the weather provider's answer.
    #[serde(default = "default_fetch_secs")]
    pub fetch_secs: u64,
}

fn default_locate_secs() -> u64 {
    10
}

fn default_fetch_secs() -> u64 {
    15
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            locate_secs: default_locate_secs(),
            fetch_secs: default_fetch_secs(),
        }
    }
}

impl Timeouts {
    pub fn locate(&self) -> Duration {
        Duration::from_secs(self.locate_secs)
    }

    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs)
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Optional default provider id, e.g. "openmeteo" or "openweather".
    pub default_provider: Option<String>,

    /// Example TOML:
    /// [providers.openweather]
    /// api_key = "..."
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Example TOML:
    /// [timeouts]
    /// locate_secs = 10
    /// fetch_secs = 15
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl Config {
    /// Return the default provider as a strongly-typed ProviderId.
    ///
    /// Falls back to the keyless provider when nothing is configured, so a
    /// first run works without any setup.
    pub fn default_provider_id(&self) -> Result<ProviderId> {
        match self.default_provider.as_ref() {
            Some(s) => ProviderId::try_from(s.as_str()),
            None => Ok(ProviderId::OpenMeteo),
        }
    }

    /// Store default provider as string.
    pub fn set_default_provider(&mut self, id: ProviderId) {
        self.default_provider = Some(id.as_str().to_string());
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "nowcast", "nowcast-cli")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Convenience helper: set/replace a provider API key and optionally set default provider.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers.insert(provider_id.as_str().to_string(), ProviderConfig { api_key });

        if self.default_provider.is_none() {
            self.default_provider = Some(provider_id.to_string());
        }
    }

    /// Returns API key for a provider, if present.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.providers.get(provider_id.as_str()).map(|cfg| cfg.api_key.as_str())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderId;

    #[test]
    fn default_provider_falls_back_to_keyless() {
        let cfg = Config::default();
        let id = cfg.default_provider_id().expect("fallback default");
        assert_eq!(id, ProviderId::OpenMeteo);
    }

    #[test]
    fn unknown_default_provider_errors() {
        let cfg = Config {
            default_provider: Some("doesnotexist".into()),
            ..Config::default()
        };

        let err = cfg.default_provider_id().unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[test]
    fn set_api_key_and_default_for_provider() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "OPEN_KEY".into());

        let default = cfg.default_provider_id().expect("default provider must exist");
        assert_eq!(default, ProviderId::OpenWeather);

        let key = cfg.provider_api_key(ProviderId::OpenWeather);
        assert_eq!(key, Some("OPEN_KEY"));
        assert!(cfg.is_provider_configured(ProviderId::OpenWeather));
    }

    #[test]
    fn upsert_does_not_override_existing_default() {
        let mut cfg = Config::default();
        cfg.set_default_provider(ProviderId::OpenMeteo);

        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "OPEN_KEY".into());

        let default = cfg.default_provider_id().expect("default provider must exist");
        assert_eq!(default, ProviderId::OpenMeteo);
        assert!(cfg.is_provider_configured(ProviderId::OpenWeather));
    }

    #[test]
    fn timeouts_have_bounded_defaults() {
        let t = Timeouts::default();
        assert_eq!(t.locate(), Duration::from_secs(10));
        assert_eq!(t.fetch(), Duration::from_secs(15));
    }

    #[test]
    fn timeouts_parse_from_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [timeouts]
            locate_secs = 3
            "#,
        )
        .expect("valid toml");

        assert_eq!(cfg.timeouts.locate(), Duration::from_secs(3));
        assert_eq!(cfg.timeouts.fetch(), Duration::from_secs(15));
    }

    #[test]
    fn missing_timeouts_section_uses_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            default_provider = "openmeteo"

            [providers.openweather]
            api_key = "KEY"
            "#,
        )
        .expect("valid toml");

        assert_eq!(cfg.timeouts.locate_secs, 10);
        assert_eq!(cfg.timeouts.fetch_secs, 15);
    }
}
