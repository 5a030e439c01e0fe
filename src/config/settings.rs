//! Application settings and configuration
//!
//! This module provides configuration management for the application,
//! loading settings from environment variables with sensible defaults.

use crate::error::ShardError;
use crate::logging::LogFormat;
use crate::services::ring_pool::PoolConfig;
use crate::services::sharding::{
    HashAlgorithm, KeyTagPattern, ResourceFactory, RingConfig, ShardInfo,
    DEFAULT_KEY_TAG_PATTERN, DEFAULT_WEIGHT,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fmt;
use std::str::FromStr;

/// One configured shard: `[name=]address[*weight]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ShardConfig {
    pub name: Option<String>,
    pub address: String,
    pub weight: u32,
}

impl ShardConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
            weight: DEFAULT_WEIGHT,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Name if set, otherwise the address
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }

    /// Build a shard descriptor that creates resources with `factory`
    ///
    /// Unnamed entries keep positional virtual nodes, so their placement
    /// depends on list order.
    pub fn to_shard<R>(
        &self,
        factory: impl ResourceFactory<R> + 'static,
    ) -> Result<ShardInfo<R>, ShardError> {
        let shard = match &self.name {
            Some(name) => ShardInfo::named(name.as_str(), factory),
            None => ShardInfo::new(factory),
        };
        shard.with_weight(self.weight)
    }
}

impl FromStr for ShardConfig {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim();

        let (name, rest) = match spec.split_once('=') {
            Some((name, rest)) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(ShardError::InvalidShardSpec(s.to_string()));
                }
                (Some(name.to_string()), rest)
            }
            None => (None, spec),
        };

        let (address, weight) = match rest.rsplit_once('*') {
            Some((address, weight)) => {
                let weight: u32 = weight
                    .trim()
                    .parse()
                    .map_err(|_| ShardError::InvalidShardSpec(s.to_string()))?;
                if weight == 0 {
                    return Err(ShardError::InvalidWeight(weight));
                }
                (address.trim(), weight)
            }
            None => (rest.trim(), DEFAULT_WEIGHT),
        };

        if address.is_empty() {
            return Err(ShardError::InvalidShardSpec(s.to_string()));
        }

        Ok(Self {
            name,
            address: address.to_string(),
            weight,
        })
    }
}

impl fmt::Display for ShardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{}=", name)?;
        }
        write!(f, "{}", self.address)?;
        if self.weight != DEFAULT_WEIGHT {
            write!(f, "*{}", self.weight)?;
        }
        Ok(())
    }
}

/// Parse a comma separated `SHARDS` list, skipping empty entries
pub fn parse_shard_list(list: &str) -> Result<Vec<ShardConfig>, ShardError> {
    list.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Object pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolSettings {
    pub max_idle: usize,
    pub test_on_borrow: bool,
    pub test_on_return: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle: 8,
            test_on_borrow: false,
            test_on_return: false,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub log_level: String,
    pub log_format: LogFormat,

    // Ring settings
    pub hash_algorithm: HashAlgorithm,
    pub key_tags_enabled: bool,
    pub key_tag_pattern: String,
    pub shards: Vec<ShardConfig>,

    // Pool settings
    pub pool: PoolSettings,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let settings = Self {
            app_name: env_or_default("APP_NAME", "shard-ring"),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: env_or_default("LOG_LEVEL", "info"),
            log_format: env_or_default("LOG_FORMAT", "json")
                .parse()
                .context("Invalid LOG_FORMAT value")?,

            hash_algorithm: env_or_default("HASH_ALGORITHM", "xxh64")
                .parse()
                .context("Invalid HASH_ALGORITHM value")?,
            key_tags_enabled: env_or_default("KEY_TAGS_ENABLED", "true")
                .parse()
                .unwrap_or(true),
            key_tag_pattern: env_or_default("KEY_TAG_PATTERN", DEFAULT_KEY_TAG_PATTERN),
            shards: parse_shard_list(&env_or_default("SHARDS", ""))
                .context("Invalid SHARDS value")?,

            pool: PoolSettings {
                max_idle: env_or_default("POOL_MAX_IDLE", "8")
                    .parse()
                    .context("Invalid POOL_MAX_IDLE value")?,
                test_on_borrow: env_or_default("POOL_TEST_ON_BORROW", "false")
                    .parse()
                    .unwrap_or(false),
                test_on_return: env_or_default("POOL_TEST_ON_RETURN", "false")
                    .parse()
                    .unwrap_or(false),
            },
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        for shard in &self.shards {
            if shard.weight == 0 {
                anyhow::bail!("Shard {} has weight 0; weights must be > 0", shard.label());
            }
            if shard.address.trim().is_empty() {
                anyhow::bail!("Shard {} has an empty address", shard.label());
            }
        }

        // Identical names produce identical virtual nodes
        let mut names = HashSet::new();
        for name in self.shards.iter().filter_map(|s| s.name.as_deref()) {
            if !names.insert(name) {
                anyhow::bail!("Duplicate shard name: {}", name);
            }
        }

        if self.key_tags_enabled {
            KeyTagPattern::new(&self.key_tag_pattern).context("Invalid KEY_TAG_PATTERN")?;
        }

        if self.shards.is_empty() {
            tracing::warn!("No shards configured; every lookup will fail until shards are added");
        }

        Ok(())
    }

    /// Ring configuration derived from these settings
    pub fn ring_config(&self) -> Result<RingConfig> {
        let mut config = RingConfig::new().with_algorithm(self.hash_algorithm);
        if self.key_tags_enabled {
            let pattern =
                KeyTagPattern::new(&self.key_tag_pattern).context("Invalid KEY_TAG_PATTERN")?;
            config = config.with_key_tag(pattern);
        }
        Ok(config)
    }

    /// Object pool configuration derived from these settings
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.pool.max_idle)
            .with_test_on_borrow(self.pool.test_on_borrow)
            .with_test_on_return(self.pool.test_on_return)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "shard-ring".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            hash_algorithm: HashAlgorithm::default(),
            key_tags_enabled: true,
            key_tag_pattern: DEFAULT_KEY_TAG_PATTERN.to_string(),
            shards: Vec::new(),
            pool: PoolSettings::default(),
        }
    }
}

/// Get environment variable or default value
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sharding::Hashing;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.app_name, "shard-ring");
        assert_eq!(settings.hash_algorithm, HashAlgorithm::Xxh64);
        assert!(settings.key_tags_enabled);
        assert_eq!(settings.pool.max_idle, 8);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_shard_spec_parsing() {
        let plain: ShardConfig = "10.0.0.1:6379".parse().unwrap();
        assert_eq!(plain, ShardConfig::new("10.0.0.1:6379"));

        let full: ShardConfig = " cache-a = 10.0.0.2:6379 * 3 ".parse().unwrap();
        assert_eq!(full.name.as_deref(), Some("cache-a"));
        assert_eq!(full.address, "10.0.0.2:6379");
        assert_eq!(full.weight, 3);
        assert_eq!(full.to_string(), "cache-a=10.0.0.2:6379*3");
        assert_eq!(full.label(), "cache-a");
    }

    #[test]
    fn test_invalid_shard_specs() {
        assert!(matches!(
            "a=host*0".parse::<ShardConfig>(),
            Err(ShardError::InvalidWeight(0))
        ));
        assert!(matches!(
            "host*heavy".parse::<ShardConfig>(),
            Err(ShardError::InvalidShardSpec(_))
        ));
        assert!(matches!(
            "=host".parse::<ShardConfig>(),
            Err(ShardError::InvalidShardSpec(_))
        ));
        assert!(matches!(
            "a=*2".parse::<ShardConfig>(),
            Err(ShardError::InvalidShardSpec(_))
        ));
    }

    #[test]
    fn test_parse_shard_list() {
        let shards = parse_shard_list("a=h1:1, h2:2*2,,").unwrap();
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].label(), "a");
        assert_eq!(shards[1].label(), "h2:2");
        assert_eq!(shards[1].weight, 2);

        assert!(parse_shard_list("").unwrap().is_empty());
        assert!(parse_shard_list("a=h1, =h2").is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let settings = Settings {
            shards: vec![
                ShardConfig::new("h1").with_name("a"),
                ShardConfig::new("h2").with_name("a"),
            ],
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_weight_rejected() {
        let settings = Settings {
            shards: vec![ShardConfig::new("h1").with_weight(0)],
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_key_tag_pattern_validated_only_when_enabled() {
        let mut settings = Settings {
            key_tag_pattern: "(a)(b)".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
        assert!(settings.ring_config().is_err());

        settings.key_tags_enabled = false;
        assert!(settings.validate().is_ok());
        assert!(settings.ring_config().unwrap().key_tag.is_none());
    }

    #[test]
    fn test_ring_config_from_settings() {
        let settings = Settings {
            hash_algorithm: HashAlgorithm::Xxh3,
            ..Settings::default()
        };
        let config = settings.ring_config().unwrap();
        let tag = config.key_tag.as_ref().unwrap();
        assert_eq!(tag.extract("user{42}:name"), "42");
        assert_eq!(
            config.hasher.hash(b"abc"),
            HashAlgorithm::Xxh3.shared().hash(b"abc")
        );
    }

    #[test]
    fn test_pool_config_from_settings() {
        let settings = Settings {
            pool: PoolSettings {
                max_idle: 2,
                test_on_borrow: true,
                test_on_return: false,
            },
            ..Settings::default()
        };
        let config = settings.pool_config();
        assert_eq!(config.max_idle, 2);
        assert!(config.test_on_borrow);
        assert!(!config.test_on_return);
    }

    #[test]
    fn test_shard_config_to_shard() {
        let named = ShardConfig::new("h1").with_name("a").with_weight(2);
        let shard: ShardInfo<String> = named.to_shard(|| "h1".to_string()).unwrap();
        assert_eq!(shard.name(), Some("a"));
        assert_eq!(shard.weight(), 2);
        assert_eq!(shard.create_resource(), "h1");

        let unnamed = ShardConfig::new("h2");
        let shard: ShardInfo<String> = unnamed.to_shard(|| "h2".to_string()).unwrap();
        assert!(shard.name().is_none());

        let zero = ShardConfig::new("h3").with_weight(0);
        assert!(zero.to_shard(|| "h3".to_string()).is_err());
    }
}
