use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::layout::MAX_GRID_SLOTS;
use super::quality::QualityPolicy;
use super::{CapacityTier, SessionError, SessionResult};

/// Session configuration file format
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Slot ceilings per entitlement tier
    #[serde(default)]
    pub capacity: CapacityConfig,
    /// Quality adaptation thresholds
    #[serde(default)]
    pub quality: QualityPolicy,
    /// Player widget settings
    #[serde(default)]
    pub embed: EmbedConfig,
    /// Entitlement lookup settings
    #[serde(default)]
    pub entitlement: EntitlementConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityConfig {
    #[serde(default = "default_free_slots")]
    pub free_slots: usize,
    #[serde(default = "default_premium_slots")]
    pub premium_slots: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Time a widget gets to signal ready (in milliseconds)
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitlementConfig {
    /// How long a resolved tier is reused (in seconds)
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

// Default value functions
fn default_free_slots() -> usize { CapacityTier::Free.default_limit() }
fn default_premium_slots() -> usize { CapacityTier::Premium.default_limit() }
fn default_ready_timeout_ms() -> u64 { 15_000 }
fn default_cache_ttl_secs() -> u64 { 300 }

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            free_slots: default_free_slots(),
            premium_slots: default_premium_slots(),
        }
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: default_ready_timeout_ms(),
        }
    }
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CapacityConfig {
    /// Slot ceiling for a tier, never above the largest grid
    pub fn limit_for(&self, tier: CapacityTier) -> usize {
        let limit = match tier {
            CapacityTier::Free => self.free_slots,
            CapacityTier::Premium => self.premium_slots,
        };
        limit.min(MAX_GRID_SLOTS)
    }
}

impl EmbedConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

impl EntitlementConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl SessionConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> SessionResult<Self> {
        let config: SessionConfig = toml::from_str(content)
            .map_err(|e| SessionError::configuration(format!("invalid session config: {}", e)))?;
        config.validate().map_err(|errors| SessionError::configuration(errors.join("; ")))?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> SessionResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> SessionResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SessionError::configuration(format!("cannot serialize session config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.capacity.free_slots == 0 {
            errors.push("Free tier must allow at least one slot".to_string());
        }
        if self.capacity.premium_slots < self.capacity.free_slots {
            errors.push("Premium tier cannot allow fewer slots than the free tier".to_string());
        }
        if self.capacity.premium_slots > MAX_GRID_SLOTS {
            errors.push(format!(
                "Premium tier allows {} slots but the grid holds at most {}",
                self.capacity.premium_slots, MAX_GRID_SLOTS
            ));
        }

        if self.embed.ready_timeout_ms == 0 {
            errors.push("Embed ready timeout must be greater than 0".to_string());
        }

        if self.entitlement.cache_ttl_secs == 0 {
            errors.push("Entitlement cache TTL must be greater than 0".to_string());
        }

        if let Err(e) = self.quality.validate() {
            errors.push(e.to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::QualityLevel;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capacity.limit_for(CapacityTier::Free), 3);
        assert_eq!(config.capacity.limit_for(CapacityTier::Premium), 9);
        assert_eq!(config.embed.ready_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = SessionConfig::from_toml_str(
            r#"
            [capacity]
            free_slots = 2

            [quality]
            recovery_evaluations = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.capacity.free_slots, 2);
        assert_eq!(config.capacity.premium_slots, 9);
        assert_eq!(config.quality.recovery_evaluations, 5);
        assert_eq!(config.quality.initial_level, QualityLevel::Auto);
        assert_eq!(config.entitlement.cache_ttl_secs, 300);
    }

    #[test]
    fn test_rejects_oversized_premium_tier() {
        let err = SessionConfig::from_toml_str("[capacity]\npremium_slots = 12\n").unwrap_err();
        assert!(matches!(err, SessionError::Configuration(_)));
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = SessionConfig::default();
        config.capacity.free_slots = 0;
        config.embed.ready_timeout_ms = 0;
        config.quality.recovery_evaluations = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_limit_clamped_to_grid() {
        let capacity = CapacityConfig {
            free_slots: 3,
            premium_slots: 20,
        };
        assert_eq!(capacity.limit_for(CapacityTier::Premium), MAX_GRID_SLOTS);
    }
}
