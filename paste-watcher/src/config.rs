use std::{path::PathBuf, time::Duration};

use envconfig::Envconfig;
use kv_store::{Codec, StoreConfig, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error(transparent)]
    Codec(#[from] StoreError),
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    // Store configuration
    #[envconfig(default = "/tmp/paste-watcher-store")]
    pub store_path: String,

    #[envconfig(default = "50")]
    pub store_lock_timeout_ms: u64,

    #[envconfig(default = "json")] // json or bincode
    pub store_codec: String,

    // Polling configuration
    #[envconfig(default = "30")]
    pub poll_interval_secs: u64,

    // How long a paste key is remembered by the in-memory dedup cache
    #[envconfig(default = "3600")]
    pub max_age_secs: u64,

    #[envconfig(default = "https://scrape.pastebin.com/api_scraping.php")]
    pub scrape_url: String,

    #[envconfig(default = "100")]
    pub scrape_limit: u32,

    #[envconfig(default = "10")]
    pub http_timeout_secs: u64,

    // setup_metrics_recorder installs a global recorder, tests turn it off
    #[envconfig(default = "true")]
    pub metrics_enabled: bool,
}

impl Config {
    /// Defaults only, ignoring the environment
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_hashmap(&std::collections::HashMap::new())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Zero("POLL_INTERVAL_SECS"));
        }
        if self.max_age_secs == 0 {
            return Err(ConfigError::Zero("MAX_AGE_SECS"));
        }
        if self.scrape_limit == 0 {
            return Err(ConfigError::Zero("SCRAPE_LIMIT"));
        }
        self.store_codec.parse::<Codec>()?;
        Ok(())
    }

    /// Get server bind address
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn store_config(&self) -> Result<StoreConfig, ConfigError> {
        Ok(StoreConfig::new(PathBuf::from(&self.store_path))
            .with_codec(self.store_codec.parse()?)
            .with_lock_timeout(Duration::from_millis(self.store_lock_timeout_ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::init_from_hashmap(&env).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::init_with_defaults().unwrap();

        assert_eq!(config.bind(), "0.0.0.0:3310");
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.max_age(), Duration::from_secs(3600));
        assert_eq!(config.scrape_limit, 100);
        assert!(config.validate().is_ok());

        let store = config.store_config().unwrap();
        assert_eq!(store.codec, Codec::Json);
        assert_eq!(store.lock_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("STORE_PATH", "/var/lib/pastes"),
            ("STORE_CODEC", "bincode"),
            ("POLL_INTERVAL_SECS", "5"),
            ("MAX_AGE_SECS", "60"),
            ("BIND_PORT", "9000"),
        ]);

        assert_eq!(config.bind(), "0.0.0.0:9000");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.max_age(), Duration::from_secs(60));

        let store = config.store_config().unwrap();
        assert_eq!(store.path, PathBuf::from("/var/lib/pastes"));
        assert_eq!(store.codec, Codec::Bincode);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = config_from(&[("POLL_INTERVAL_SECS", "0")]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Zero("POLL_INTERVAL_SECS"))
        ));

        let config = config_from(&[("MAX_AGE_SECS", "0")]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Zero("MAX_AGE_SECS"))
        ));

        let config = config_from(&[("STORE_CODEC", "gob")]);
        assert!(matches!(config.validate(), Err(ConfigError::Codec(_))));
    }
}
