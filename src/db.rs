use crate::error::{AppError, AppResult};
use crate::models::{
    AccessLogEntry, LinkStats, LinkUpdate, NewSchedule, NewShortLink, Schedule, ScheduleUpdate,
    ShortLink, UNKNOWN_COUNTRY,
};
use crate::store::{validate_new_schedule, validate_schedule_update, validate_target_url, LinkStore};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    types::Json,
    ConnectOptions, PgPool,
};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Postgres repository
#[derive(Clone)]
pub struct Repository {
    pool: PgPool,
}

impl Repository {
    /// Create a new repository with a connection pool
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout_seconds: u64,
    ) -> AppResult<Self> {
        let options = PgConnectOptions::from_str(database_url)
            .map_err(|e| AppError::Configuration(format!("Invalid database URL: {}", e)))?
            .disable_statement_logging();

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(acquire_timeout_seconds))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl LinkStore for Repository {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_short_link_by_code(&self, code: &str) -> AppResult<Option<ShortLink>> {
        let result = sqlx::query_as::<_, ShortLink>(
            r#"
            SELECT * FROM short_links
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn get_active_schedules(&self, shortlink_id: Uuid) -> AppResult<Vec<Schedule>> {
        let results = sqlx::query_as::<_, Schedule>(
            r#"
            SELECT * FROM schedules
            WHERE shortlink_id = $1 AND is_active
            "#,
        )
        .bind(shortlink_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    async fn increment_clicks(&self, shortlink_id: Uuid, delta: i64) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE short_links
            SET clicks = clicks + $1
            WHERE id = $2
            "#,
        )
        .bind(delta)
        .bind(shortlink_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_access_log_entry(&self, entry: &AccessLogEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO access_logs (
                id, shortlink_id, ip_address, user_agent, referer, device_type,
                browser, os, country, city, region, timezone, extra, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(entry.id)
        .bind(entry.shortlink_id)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.referer)
        .bind(entry.device_type.as_str())
        .bind(&entry.browser)
        .bind(&entry.os)
        .bind(&entry.country)
        .bind(&entry.city)
        .bind(&entry.region)
        .bind(&entry.timezone)
        .bind(Json(&entry.extra))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn short_code_exists(&self, code: &str) -> AppResult<bool> {
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM short_links WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_one(&self.pool)
        .await?;

        Ok(result > 0)
    }

    async fn create_short_link(&self, new: NewShortLink) -> AppResult<ShortLink> {
        validate_target_url(&new.target_url)?;

        let result = sqlx::query_as::<_, ShortLink>(
            r#"
            INSERT INTO short_links (
                id, code, target_url, owner_id, is_active, is_password_protected,
                password_hash, is_time_restricted, expires_at, clicks, created_at
            )
            VALUES ($1, $2, $3, $4, TRUE, $5, $6, $7, $8, 0, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.code)
        .bind(&new.target_url)
        .bind(&new.owner_id)
        .bind(new.password_hash.is_some())
        .bind(&new.password_hash)
        .bind(new.expires_at.is_some())
        .bind(new.expires_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(link) => Ok(link),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(AppError::ShortCodeExists(new.code))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_schedule(&self, new: NewSchedule) -> AppResult<Schedule> {
        let mut tx = self.pool.begin().await?;

        // Lock the parent row so concurrent writers see each other's schedules
        let locked = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM short_links WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(new.shortlink_id)
        .fetch_optional(&mut *tx)
        .await?;

        if locked.is_none() {
            return Err(AppError::LinkNotFound(new.shortlink_id.to_string()));
        }

        let existing = sqlx::query_as::<_, Schedule>(
            r#"
            SELECT * FROM schedules
            WHERE shortlink_id = $1 AND is_active
            "#,
        )
        .bind(new.shortlink_id)
        .fetch_all(&mut *tx)
        .await?;

        validate_new_schedule(&new, &existing)?;

        let schedule = sqlx::query_as::<_, Schedule>(
            r#"
            INSERT INTO schedules (
                id, shortlink_id, target_url, start_time, end_time,
                is_password_protected, password_hash, is_active, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.shortlink_id)
        .bind(&new.target_url)
        .bind(new.start_time)
        .bind(new.end_time)
        .bind(new.password_hash.is_some())
        .bind(&new.password_hash)
        .bind(new.is_active)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(schedule)
    }

    async fn update_link(&self, code: &str, update: LinkUpdate) -> AppResult<Option<ShortLink>> {
        if let Some(target_url) = &update.target_url {
            validate_target_url(target_url)?;
        }

        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, ShortLink>(
            r#"
            SELECT * FROM short_links WHERE code = $1 FOR UPDATE
            "#,
        )
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            return Ok(None);
        };
        let updated = update.apply(&current);

        let link = sqlx::query_as::<_, ShortLink>(
            r#"
            UPDATE short_links
            SET target_url = $1, is_active = $2, is_password_protected = $3,
                password_hash = $4, is_time_restricted = $5, expires_at = $6
            WHERE id = $7
            RETURNING *
            "#,
        )
        .bind(&updated.target_url)
        .bind(updated.is_active)
        .bind(updated.is_password_protected)
        .bind(&updated.password_hash)
        .bind(updated.is_time_restricted)
        .bind(updated.expires_at)
        .bind(current.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(link))
    }

    async fn list_schedules(&self, shortlink_id: Uuid) -> AppResult<Vec<Schedule>> {
        let results = sqlx::query_as::<_, Schedule>(
            r#"
            SELECT * FROM schedules
            WHERE shortlink_id = $1
            ORDER BY start_time, id
            "#,
        )
        .bind(shortlink_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    async fn update_schedule(&self, id: Uuid, update: ScheduleUpdate) -> AppResult<Schedule> {
        let mut tx = self.pool.begin().await?;

        let shortlink_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT shortlink_id FROM schedules WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::ScheduleNotFound(id))?;

        // Same parent-row lock as creation, then read the row under it
        sqlx::query("SELECT id FROM short_links WHERE id = $1 FOR UPDATE")
            .bind(shortlink_id)
            .execute(&mut *tx)
            .await?;

        let current = sqlx::query_as::<_, Schedule>(
            r#"
            SELECT * FROM schedules WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::ScheduleNotFound(id))?;

        let existing = sqlx::query_as::<_, Schedule>(
            r#"
            SELECT * FROM schedules
            WHERE shortlink_id = $1 AND is_active
            "#,
        )
        .bind(current.shortlink_id)
        .fetch_all(&mut *tx)
        .await?;

        let merged = update.merge(&current);
        validate_schedule_update(id, &merged, &existing)?;

        let schedule = sqlx::query_as::<_, Schedule>(
            r#"
            UPDATE schedules
            SET target_url = $1, start_time = $2, end_time = $3,
                is_password_protected = $4, password_hash = $5, is_active = $6
            WHERE id = $7
            RETURNING *
            "#,
        )
        .bind(&merged.target_url)
        .bind(merged.start_time)
        .bind(merged.end_time)
        .bind(merged.password_hash.is_some())
        .bind(&merged.password_hash)
        .bind(merged.is_active)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(schedule)
    }

    async fn delete_schedule(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_short_link(&self, code: &str) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM short_links WHERE code = $1 FOR UPDATE
            "#,
        )
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(id) = id else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM access_logs WHERE shortlink_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM schedules WHERE shortlink_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM short_links WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn link_stats(&self, shortlink_id: Uuid) -> AppResult<LinkStats> {
        let clicks = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT clicks FROM short_links WHERE id = $1
            "#,
        )
        .bind(shortlink_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::LinkNotFound(shortlink_id.to_string()))?;

        let (total_visits, unique_visitors) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT COUNT(*), COUNT(DISTINCT ip_address)
            FROM access_logs
            WHERE shortlink_id = $1
            "#,
        )
        .bind(shortlink_id)
        .fetch_one(&self.pool)
        .await?;

        let devices = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT device_type, COUNT(*)
            FROM access_logs
            WHERE shortlink_id = $1
            GROUP BY device_type
            "#,
        )
        .bind(shortlink_id)
        .fetch_all(&self.pool)
        .await?;

        let countries = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT COALESCE(country, $2), COUNT(*)
            FROM access_logs
            WHERE shortlink_id = $1
            GROUP BY 1
            "#,
        )
        .bind(shortlink_id)
        .bind(UNKNOWN_COUNTRY)
        .fetch_all(&self.pool)
        .await?;

        let daily = sqlx::query_as::<_, (NaiveDate, i64)>(
            r#"
            SELECT (created_at AT TIME ZONE 'UTC')::date, COUNT(*)
            FROM access_logs
            WHERE shortlink_id = $1
            GROUP BY 1
            "#,
        )
        .bind(shortlink_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(LinkStats {
            clicks,
            total_visits,
            unique_visitors,
            devices: devices.into_iter().collect(),
            countries: countries.into_iter().collect(),
            daily: daily.into_iter().collect(),
        })
    }
}
