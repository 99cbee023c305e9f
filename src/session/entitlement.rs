// Capacity entitlement lookup
//
// Resolving a viewer's tier goes through an explicit cache so repeated
// session creation does not hit the entitlement service every time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::config::EntitlementConfig;
use super::{CapacityTier, SessionError, SessionResult};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Answers which tier a user is entitled to
#[async_trait]
pub trait EntitlementSource: Send + Sync {
    async fn capacity_tier(&self, user_id: &str) -> SessionResult<CapacityTier>;
}

#[derive(Debug, Clone, Copy)]
struct CachedTier {
    tier: CapacityTier,
    fetched_at: DateTime<Utc>,
}

/// TTL cache in front of an [`EntitlementSource`]
pub struct EntitlementCache {
    source: Arc<dyn EntitlementSource>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    entries: RwLock<HashMap<String, CachedTier>>,
}

impl EntitlementCache {
    pub fn new(source: Arc<dyn EntitlementSource>, ttl: Duration) -> Self {
        Self::with_clock(source, ttl, Arc::new(SystemClock))
    }

    /// Cache reusing tiers for the configured `cache_ttl_secs`
    pub fn from_config(source: Arc<dyn EntitlementSource>, config: &EntitlementConfig) -> Self {
        Self::new(source, config.cache_ttl())
    }

    pub fn with_clock(source: Arc<dyn EntitlementSource>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        Self {
            source,
            clock,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl.to_std().unwrap_or(Duration::MAX)
    }

    /// Tier for `user_id`, from the cache while the entry is fresh
    pub async fn lookup(&self, user_id: &str) -> SessionResult<CapacityTier> {
        validate_user_id(user_id)?;
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            if let Some(cached) = entries.get(user_id) {
                if now - cached.fetched_at < self.ttl {
                    return Ok(cached.tier);
                }
            }
        }

        let tier = self.source.capacity_tier(user_id).await?;
        log::debug!("Resolved capacity tier {} for user {}", tier, user_id);

        self.entries.write().await.insert(
            user_id.to_string(),
            CachedTier {
                tier,
                fetched_at: now,
            },
        );
        Ok(tier)
    }

    /// Tier used to size a session, falling back to the free tier when the
    /// lookup fails
    pub async fn resolve_capacity(&self, user_id: &str) -> CapacityTier {
        match self.lookup(user_id).await {
            Ok(tier) => tier,
            Err(e) => {
                log::warn!("Entitlement lookup for {} failed, using free tier: {}", user_id, e);
                CapacityTier::Free
            }
        }
    }

    /// Drop the cached tier for one user, e.g. after an upgrade
    pub async fn invalidate(&self, user_id: &str) {
        self.entries.write().await.remove(user_id);
    }

    /// Drop entries older than the TTL
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, cached| now - cached.fetched_at < self.ttl);
        before - entries.len()
    }
}

impl std::fmt::Debug for EntitlementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitlementCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Reject user ids the entitlement service cannot answer for
pub fn validate_user_id(user_id: &str) -> SessionResult<()> {
    if user_id.trim().is_empty() {
        return Err(SessionError::entitlement("user id must not be empty"));
    }
    Ok(())
}
