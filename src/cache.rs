use crate::error::{AppError, AppResult};
use crate::models::{
    AccessLogEntry, LinkStats, LinkUpdate, NewSchedule, NewShortLink, Schedule, ScheduleUpdate,
    ShortLink,
};
use crate::store::LinkStore;
use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Manager, Pool, Runtime};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Cache layer for short link lookups
#[derive(Clone)]
pub struct Cache {
    pool: Pool,
    default_ttl: Duration,
}

impl Cache {
    /// Create a new cache connection pool
    pub async fn new(redis_url: &str, max_connections: u32, default_ttl_seconds: u64) -> AppResult<Self> {
        let manager = Manager::new(redis_url)
            .map_err(|e| AppError::Configuration(format!("Invalid Redis URL: {}", e)))?;

        let pool = Pool::builder(manager)
            .max_size(max_connections as usize)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create Redis pool: {}", e)))?;

        Ok(Self {
            pool,
            default_ttl: Duration::from_secs(default_ttl_seconds),
        })
    }

    /// Ping the Redis server to check connectivity
    pub async fn ping(&self) -> AppResult<String> {
        let mut conn = self.pool.get().await?;
        let response: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(response)
    }

    /// Get a short link from cache by code
    pub async fn get_link(&self, code: &str) -> AppResult<Option<ShortLink>> {
        let key = Self::link_key(code);
        let mut conn = self.pool.get().await?;

        let value: Option<String> = conn.get(&key).await?;

        match value {
            Some(v) => {
                let link: ShortLink = serde_json::from_str(&v)
                    .map_err(|e| AppError::Internal(format!("Cache deserialization error: {}", e)))?;
                Ok(Some(link))
            }
            None => Ok(None),
        }
    }

    /// Set a short link in cache
    pub async fn set_link(&self, link: &ShortLink) -> AppResult<()> {
        let key = Self::link_key(&link.code);
        let value = serde_json::to_string(link)?;
        let mut conn = self.pool.get().await?;

        let _: () = conn.set_ex(&key, value, self.default_ttl.as_secs()).await?;

        Ok(())
    }

    /// Delete a short link from cache
    pub async fn delete_link(&self, code: &str) -> AppResult<()> {
        let key = Self::link_key(code);
        let mut conn = self.pool.get().await?;

        let _: () = conn.del(&key).await?;

        Ok(())
    }

    /// Generate cache key for a short link
    fn link_key(code: &str) -> String {
        format!("{}:{}", Self::KEY_PREFIX, code)
    }

    const KEY_PREFIX: &'static str = "link";
}

/// Read-through cache in front of another store.
///
/// Only the link row is cached. Schedules are always read from the inner
/// store so a new schedule takes effect immediately. Cache failures are
/// logged and fall through to the inner store.
pub struct CachedLinkStore {
    inner: Arc<dyn LinkStore>,
    cache: Cache,
}

impl CachedLinkStore {
    pub fn new(inner: Arc<dyn LinkStore>, cache: Cache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl LinkStore for CachedLinkStore {
    async fn ping(&self) -> AppResult<()> {
        self.inner.ping().await
    }

    async fn get_short_link_by_code(&self, code: &str) -> AppResult<Option<ShortLink>> {
        match self.cache.get_link(code).await {
            Ok(Some(link)) => {
                debug!(code = %code, "Cache hit");
                return Ok(Some(link));
            }
            Ok(None) => {}
            Err(e) => warn!(code = %code, "Cache read failed: {}", e),
        }

        let link = self.inner.get_short_link_by_code(code).await?;
        if let Some(link) = &link {
            if let Err(e) = self.cache.set_link(link).await {
                warn!(code = %code, "Cache write failed: {}", e);
            }
        }
        Ok(link)
    }

    async fn get_active_schedules(&self, shortlink_id: Uuid) -> AppResult<Vec<Schedule>> {
        self.inner.get_active_schedules(shortlink_id).await
    }

    async fn increment_clicks(&self, shortlink_id: Uuid, delta: i64) -> AppResult<()> {
        self.inner.increment_clicks(shortlink_id, delta).await
    }

    async fn create_access_log_entry(&self, entry: &AccessLogEntry) -> AppResult<()> {
        self.inner.create_access_log_entry(entry).await
    }

    async fn short_code_exists(&self, code: &str) -> AppResult<bool> {
        self.inner.short_code_exists(code).await
    }

    async fn create_short_link(&self, link: NewShortLink) -> AppResult<ShortLink> {
        self.inner.create_short_link(link).await
    }

    async fn create_schedule(&self, schedule: NewSchedule) -> AppResult<Schedule> {
        self.inner.create_schedule(schedule).await
    }

    async fn update_link(&self, code: &str, update: LinkUpdate) -> AppResult<Option<ShortLink>> {
        let updated = self.inner.update_link(code, update).await?;
        if let Err(e) = self.cache.delete_link(code).await {
            warn!(code = %code, "Cache eviction failed: {}", e);
        }
        Ok(updated)
    }

    async fn list_schedules(&self, shortlink_id: Uuid) -> AppResult<Vec<Schedule>> {
        self.inner.list_schedules(shortlink_id).await
    }

    async fn update_schedule(&self, id: Uuid, update: ScheduleUpdate) -> AppResult<Schedule> {
        self.inner.update_schedule(id, update).await
    }

    async fn delete_schedule(&self, id: Uuid) -> AppResult<bool> {
        self.inner.delete_schedule(id).await
    }

    async fn delete_short_link(&self, code: &str) -> AppResult<bool> {
        let deleted = self.inner.delete_short_link(code).await?;
        if let Err(e) = self.cache.delete_link(code).await {
            warn!(code = %code, "Cache eviction failed: {}", e);
        }
        Ok(deleted)
    }

    async fn link_stats(&self, shortlink_id: Uuid) -> AppResult<LinkStats> {
        self.inner.link_stats(shortlink_id).await
    }
}
