// libs/calendar-sync-cell/src/services/lock.rs
use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::SyncError;

/// Proof of holding a professional's lock. Hand it back to `release`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub professional_id: Uuid,
    pub token: String,
}

/// Serializes reconciliation per professional. Acquisition never waits:
/// a professional already being reconciled is skipped.
#[async_trait]
pub trait ProfessionalLock: Send + Sync {
    async fn try_acquire(&self, professional_id: Uuid) -> Result<Option<LockToken>, SyncError>;

    async fn release(&self, token: LockToken) -> Result<(), SyncError>;
}

// ==============================================================================
// IN-PROCESS
// ==============================================================================

#[derive(Default)]
pub struct LocalProfessionalLock {
    held: Mutex<HashSet<Uuid>>,
}

impl LocalProfessionalLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfessionalLock for LocalProfessionalLock {
    async fn try_acquire(&self, professional_id: Uuid) -> Result<Option<LockToken>, SyncError> {
        let mut held = self.held.lock().await;
        if !held.insert(professional_id) {
            return Ok(None);
        }
        Ok(Some(LockToken {
            professional_id,
            token: Uuid::new_v4().to_string(),
        }))
    }

    async fn release(&self, token: LockToken) -> Result<(), SyncError> {
        self.held.lock().await.remove(&token.professional_id);
        Ok(())
    }
}

// ==============================================================================
// REDIS
// ==============================================================================

// Deletes the key only while it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Cross-process lock: `SET key token NX PX ttl`. The TTL bounds how long a
/// crashed holder can keep a professional locked.
pub struct RedisProfessionalLock {
    pool: Pool,
    ttl: Duration,
}

impl RedisProfessionalLock {
    pub async fn new(redis_url: &str, ttl: Duration) -> Result<Self, SyncError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| SyncError::Lock(format!("Failed to create Redis pool: {}", e)))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| SyncError::Lock(format!("Failed to connect to Redis: {}", e)))?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!("Redis reconciliation lock initialized");
        Ok(Self { pool, ttl })
    }

    fn key(professional_id: Uuid) -> String {
        format!("calendar_sync_lock:{}", professional_id)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, SyncError> {
        self.pool
            .get()
            .await
            .map_err(|e| SyncError::Lock(format!("Failed to get Redis connection: {}", e)))
    }
}

#[async_trait]
impl ProfessionalLock for RedisProfessionalLock {
    async fn try_acquire(&self, professional_id: Uuid) -> Result<Option<LockToken>, SyncError> {
        let mut conn = self.connection().await?;
        let token = Uuid::new_v4().to_string();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(Self::key(professional_id))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        if acquired.is_none() {
            debug!("Reconciliation lock for {} is held elsewhere", professional_id);
            return Ok(None);
        }
        Ok(Some(LockToken { professional_id, token }))
    }

    async fn release(&self, token: LockToken) -> Result<(), SyncError> {
        let mut conn = self.connection().await?;
        let removed: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(Self::key(token.professional_id))
            .arg(&token.token)
            .invoke_async(&mut conn)
            .await?;

        if removed == 0 {
            warn!("Reconciliation lock for {} expired before release", token.professional_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_lock_skips_second_holder() {
        let lock = LocalProfessionalLock::new();
        let professional_id = Uuid::new_v4();

        let first = lock.try_acquire(professional_id).await.unwrap();
        assert!(first.is_some());
        assert!(lock.try_acquire(professional_id).await.unwrap().is_none());

        // Other professionals are independent.
        assert!(lock.try_acquire(Uuid::new_v4()).await.unwrap().is_some());

        lock.release(first.unwrap()).await.unwrap();
        assert!(lock.try_acquire(professional_id).await.unwrap().is_some());
    }
}
