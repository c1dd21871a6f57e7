//! Scholargate config file.
//!
//! Everything is validated when the file is loaded; a malformed policy or an
//! unknown feature name aborts startup instead of surfacing per-request.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::catalog::{Feature, FeatureCatalog, FeaturePolicyConfig};
use crate::error::{Error, ErrorDetails};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub redis: Option<RedisConfig>,
    pub entitlement: EntitlementConfig,
    pub features: HashMap<Feature, FeaturePolicyConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GatewayConfig {
    /// Socket address to bind; defaults to 0.0.0.0:3000
    pub bind_address: Option<SocketAddr>,
    /// Enables debug-level request logging
    pub debug: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    pub url: String,
}

/// Tunables for the entitlement engine
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EntitlementConfig {
    /// How long a cached usage snapshot may serve read-only checks (in milliseconds)
    pub cache_ttl_ms: u64,
    /// Maximum number of cached usage snapshots
    pub max_cache_size: u64,
    /// Timeout for durable store operations (in milliseconds)
    pub store_timeout_ms: u64,
    /// Timeout for subscription tier lookups (in milliseconds)
    pub oracle_timeout_ms: u64,
}

fn default_cache_ttl_ms() -> u64 {
    30_000
}

fn default_max_cache_size() -> u64 {
    10_000
}

fn default_store_timeout_ms() -> u64 {
    500
}

fn default_oracle_timeout_ms() -> u64 {
    500
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: default_cache_ttl_ms(),
            max_cache_size: default_max_cache_size(),
            store_timeout_ms: default_store_timeout_ms(),
            oracle_timeout_ms: default_oracle_timeout_ms(),
        }
    }
}

impl EntitlementConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }
}

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!(
                    "Failed to read config file {}: {e}",
                    path.to_string_lossy()
                ),
            })
        })?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self, Error> {
        let deserializer = toml::de::Deserializer::new(contents);
        let config: Config = serde_path_to_error::deserialize(deserializer).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to parse config file: {e}"),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Fail on anything the serde layer cannot catch, before serving traffic.
    fn validate(&self) -> Result<(), Error> {
        // Builds and validates every feature policy
        FeatureCatalog::new(&self.features)?;

        if self.entitlement.store_timeout_ms == 0 {
            return Err(Error::new(ErrorDetails::Config {
                message: "entitlement.store_timeout_ms must be positive".to_string(),
            }));
        }
        if self.entitlement.oracle_timeout_ms == 0 {
            return Err(Error::new(ErrorDetails::Config {
                message: "entitlement.oracle_timeout_ms must be positive".to_string(),
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Limit;
    use crate::window::ResetPeriod;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.redis.is_none());
        assert_eq!(config.entitlement.cache_ttl_ms, 30_000);
        assert_eq!(config.entitlement.max_cache_size, 10_000);
        assert_eq!(config.entitlement.store_timeout_ms, 500);
        assert!(config.features.is_empty());
    }

    #[test]
    fn test_full_config_parses() {
        let config = Config::load_from_str(
            r#"
            [gateway]
            bind_address = "0.0.0.0:3005"
            debug = true

            [redis]
            url = "redis://localhost:6379"

            [entitlement]
            cache_ttl_ms = 5000
            store_timeout_ms = 250

            [features.ai_recommendations]
            free_limit = 3
            paid_limit = "unlimited"
            reset_period = "monthly"

            [features.profile_insights]
            free_limit = 2
            paid_limit = 40
            "#,
        )
        .unwrap();

        assert!(config.gateway.debug);
        assert_eq!(
            config.redis.as_ref().map(|r| r.url.as_str()),
            Some("redis://localhost:6379")
        );
        assert_eq!(config.entitlement.cache_ttl_ms, 5000);
        // Unset tunables keep their defaults
        assert_eq!(config.entitlement.oracle_timeout_ms, 500);

        let catalog = FeatureCatalog::new(&config.features).unwrap();
        let policy = catalog.policy_for(Feature::AiRecommendations);
        assert_eq!(policy.free_limit, 3);
        assert_eq!(policy.paid_limit, Limit::Unlimited);
        assert_eq!(policy.reset_period, ResetPeriod::Monthly);
    }

    #[test]
    fn test_unknown_feature_is_rejected() {
        let result = Config::load_from_str(
            r#"
            [features.time_travel]
            free_limit = 1
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result = Config::load_from_str(
            r#"
            [gateway]
            bind_adress = "0.0.0.0:3000"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let result = Config::load_from_str(
            r#"
            [features.saved_scholarships]
            free_limit = 100
            paid_limit = 10
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let result = Config::load_from_str(
            r#"
            [entitlement]
            store_timeout_ms = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[entitlement]\ncache_ttl_ms = 1234\n\n[features.essay_assistance]\nfree_limit = 7\npaid_limit = \"unlimited\""
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.entitlement.cache_ttl_ms, 1234);
        assert_eq!(
            config
                .features
                .get(&Feature::EssayAssistance)
                .and_then(|f| f.free_limit),
            Some(7)
        );
    }
}
