//! Persistence interface consumed by the redirect engine, plus an in-memory
//! implementation used by tests.

use crate::error::{AppError, AppResult};
use crate::models::{
    AccessLogEntry, LinkStats, LinkUpdate, NewSchedule, NewShortLink, Schedule, ScheduleUpdate,
    ShortLink, UNKNOWN_COUNTRY,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use url::Url as UrlParser;
use uuid::Uuid;

#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Check connectivity
    async fn ping(&self) -> AppResult<()>;

    async fn get_short_link_by_code(&self, code: &str) -> AppResult<Option<ShortLink>>;

    /// Active schedules of one link, in no particular order
    async fn get_active_schedules(&self, shortlink_id: Uuid) -> AppResult<Vec<Schedule>>;

    /// Single atomic increment at the storage layer
    async fn increment_clicks(&self, shortlink_id: Uuid, delta: i64) -> AppResult<()>;

    /// Idempotent on `entry.id`: writing the same entry twice stores it once
    async fn create_access_log_entry(&self, entry: &AccessLogEntry) -> AppResult<()>;

    async fn short_code_exists(&self, code: &str) -> AppResult<bool>;

    async fn create_short_link(&self, link: NewShortLink) -> AppResult<ShortLink>;

    /// Rejects empty windows and overlap with other active schedules of the link
    async fn create_schedule(&self, schedule: NewSchedule) -> AppResult<Schedule>;

    /// Returns `None` when no link has this code
    async fn update_link(&self, code: &str, update: LinkUpdate) -> AppResult<Option<ShortLink>>;

    /// Every schedule of one link, inactive ones included, by start time
    async fn list_schedules(&self, shortlink_id: Uuid) -> AppResult<Vec<Schedule>>;

    /// Same checks as creation, against the link's other active schedules
    async fn update_schedule(&self, id: Uuid, update: ScheduleUpdate) -> AppResult<Schedule>;

    async fn delete_schedule(&self, id: Uuid) -> AppResult<bool>;

    /// Removes access logs, schedules and the link itself as one unit
    async fn delete_short_link(&self, code: &str) -> AppResult<bool>;

    async fn link_stats(&self, shortlink_id: Uuid) -> AppResult<LinkStats>;
}

/// Require an absolute http(s) URL
pub fn validate_target_url(raw: &str) -> AppResult<()> {
    let parsed =
        UrlParser::parse(raw).map_err(|_| AppError::InvalidUrl("Invalid URL format".to_string()))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(AppError::InvalidUrl(
            "URL must start with http:// or https://".to_string(),
        )),
    }
}

/// Write-time schedule invariants: `start < end`, and no two active schedules
/// of the same link overlap on `[start, end)`.
pub fn validate_new_schedule(new: &NewSchedule, existing: &[Schedule]) -> AppResult<()> {
    validate_target_url(&new.target_url)?;

    if new.start_time >= new.end_time {
        return Err(AppError::InvalidSchedule(
            "start_time must be before end_time".to_string(),
        ));
    }

    if !new.is_active {
        return Ok(());
    }

    match existing.iter().find(|s| {
        s.shortlink_id == new.shortlink_id
            && s.is_active
            && s.overlaps(new.start_time, new.end_time)
    }) {
        Some(conflict) => Err(AppError::ScheduleOverlap(conflict.id)),
        None => Ok(()),
    }
}

/// Checks for an updated schedule: the merged row must pass the creation
/// checks against every other active schedule of its link.
pub fn validate_schedule_update(
    id: Uuid,
    merged: &NewSchedule,
    existing: &[Schedule],
) -> AppResult<()> {
    let others: Vec<Schedule> = existing.iter().filter(|s| s.id != id).cloned().collect();
    validate_new_schedule(merged, &others)
}

/// Dashmap-backed store. Increments mutate under the entry's shard lock;
/// schedule writes are serialized so check-then-insert cannot interleave.
#[derive(Default)]
pub struct MemoryStore {
    links: DashMap<Uuid, ShortLink>,
    codes: DashMap<String, Uuid>,
    schedules: DashMap<Uuid, Schedule>,
    access_logs: DashMap<Uuid, Vec<AccessLogEntry>>,
    schedule_writes: Mutex<()>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a storage outage: every call fails with `AppError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert a fully specified link, bypassing validation
    pub fn insert_link(&self, link: ShortLink) {
        self.codes.insert(link.code.clone(), link.id);
        self.links.insert(link.id, link);
    }

    /// Insert a fully specified schedule, bypassing the overlap check
    pub fn insert_schedule(&self, schedule: Schedule) {
        self.schedules.insert(schedule.id, schedule);
    }

    pub fn link(&self, id: Uuid) -> Option<ShortLink> {
        self.links.get(&id).map(|l| l.value().clone())
    }

    pub fn access_logs(&self, shortlink_id: Uuid) -> Vec<AccessLogEntry> {
        self.access_logs
            .get(&shortlink_id)
            .map(|logs| logs.value().clone())
            .unwrap_or_default()
    }

    fn check_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LinkStore for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        self.check_available()
    }

    async fn get_short_link_by_code(&self, code: &str) -> AppResult<Option<ShortLink>> {
        self.check_available()?;
        let id = match self.codes.get(code) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.link(id))
    }

    async fn get_active_schedules(&self, shortlink_id: Uuid) -> AppResult<Vec<Schedule>> {
        self.check_available()?;
        Ok(self
            .schedules
            .iter()
            .filter(|s| s.shortlink_id == shortlink_id && s.is_active)
            .map(|s| s.value().clone())
            .collect())
    }

    async fn increment_clicks(&self, shortlink_id: Uuid, delta: i64) -> AppResult<()> {
        self.check_available()?;
        if let Some(mut link) = self.links.get_mut(&shortlink_id) {
            link.clicks += delta;
        }
        Ok(())
    }

    async fn create_access_log_entry(&self, entry: &AccessLogEntry) -> AppResult<()> {
        self.check_available()?;
        let mut logs = self.access_logs.entry(entry.shortlink_id).or_default();
        if !logs.iter().any(|existing| existing.id == entry.id) {
            logs.push(entry.clone());
        }
        Ok(())
    }

    async fn short_code_exists(&self, code: &str) -> AppResult<bool> {
        self.check_available()?;
        Ok(self.codes.contains_key(code))
    }

    async fn create_short_link(&self, new: NewShortLink) -> AppResult<ShortLink> {
        self.check_available()?;
        validate_target_url(&new.target_url)?;

        let link = ShortLink {
            id: Uuid::new_v4(),
            code: new.code.clone(),
            target_url: new.target_url,
            owner_id: new.owner_id,
            is_active: true,
            is_password_protected: new.password_hash.is_some(),
            password_hash: new.password_hash,
            is_time_restricted: new.expires_at.is_some(),
            expires_at: new.expires_at,
            clicks: 0,
            created_at: Utc::now(),
        };

        match self.codes.entry(new.code) {
            Entry::Occupied(entry) => Err(AppError::ShortCodeExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(link.id);
                self.links.insert(link.id, link.clone());
                Ok(link)
            }
        }
    }

    async fn create_schedule(&self, new: NewSchedule) -> AppResult<Schedule> {
        self.check_available()?;
        let _guard = self.schedule_writes.lock().await;
        if !self.links.contains_key(&new.shortlink_id) {
            return Err(AppError::LinkNotFound(new.shortlink_id.to_string()));
        }

        let existing = self.get_active_schedules(new.shortlink_id).await?;
        validate_new_schedule(&new, &existing)?;

        let schedule = Schedule {
            id: Uuid::new_v4(),
            shortlink_id: new.shortlink_id,
            target_url: new.target_url,
            start_time: new.start_time,
            end_time: new.end_time,
            is_password_protected: new.password_hash.is_some(),
            password_hash: new.password_hash,
            is_active: new.is_active,
            created_at: Utc::now(),
        };
        self.schedules.insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    async fn update_link(&self, code: &str, update: LinkUpdate) -> AppResult<Option<ShortLink>> {
        self.check_available()?;
        if let Some(target_url) = &update.target_url {
            validate_target_url(target_url)?;
        }

        let Some(id) = self.codes.get(code).map(|id| *id) else {
            return Ok(None);
        };
        let Some(mut link) = self.links.get_mut(&id) else {
            return Ok(None);
        };
        *link = update.apply(&link);
        Ok(Some(link.clone()))
    }

    async fn list_schedules(&self, shortlink_id: Uuid) -> AppResult<Vec<Schedule>> {
        self.check_available()?;
        let mut schedules: Vec<Schedule> = self
            .schedules
            .iter()
            .filter(|s| s.shortlink_id == shortlink_id)
            .map(|s| s.value().clone())
            .collect();
        schedules.sort_by_key(|s| (s.start_time, s.id));
        Ok(schedules)
    }

    async fn update_schedule(&self, id: Uuid, update: ScheduleUpdate) -> AppResult<Schedule> {
        self.check_available()?;
        let _guard = self.schedule_writes.lock().await;

        let current = self
            .schedules
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or(AppError::ScheduleNotFound(id))?;
        let merged = update.merge(&current);
        let existing = self.get_active_schedules(current.shortlink_id).await?;
        validate_schedule_update(id, &merged, &existing)?;

        let schedule = Schedule {
            target_url: merged.target_url,
            start_time: merged.start_time,
            end_time: merged.end_time,
            is_password_protected: merged.password_hash.is_some(),
            password_hash: merged.password_hash,
            is_active: merged.is_active,
            ..current
        };
        self.schedules.insert(id, schedule.clone());
        Ok(schedule)
    }

    async fn delete_schedule(&self, id: Uuid) -> AppResult<bool> {
        self.check_available()?;
        let _guard = self.schedule_writes.lock().await;
        Ok(self.schedules.remove(&id).is_some())
    }

    async fn delete_short_link(&self, code: &str) -> AppResult<bool> {
        self.check_available()?;
        let Some((_, id)) = self.codes.remove(code) else {
            return Ok(false);
        };

        self.access_logs.remove(&id);
        self.schedules.retain(|_, s| s.shortlink_id != id);
        self.links.remove(&id);
        Ok(true)
    }

    async fn link_stats(&self, shortlink_id: Uuid) -> AppResult<LinkStats> {
        self.check_available()?;
        let link = self
            .link(shortlink_id)
            .ok_or_else(|| AppError::LinkNotFound(shortlink_id.to_string()))?;

        let logs = self.access_logs(shortlink_id);
        let unique: HashSet<&str> = logs.iter().map(|l| l.ip_address.as_str()).collect();

        let mut stats = LinkStats {
            clicks: link.clicks,
            total_visits: logs.len() as i64,
            unique_visitors: unique.len() as i64,
            ..LinkStats::default()
        };
        for log in &logs {
            *stats
                .devices
                .entry(log.device_type.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .countries
                .entry(log.country.clone().unwrap_or_else(|| UNKNOWN_COUNTRY.to_string()))
                .or_insert(0) += 1;
            *stats.daily.entry(log.created_at.date_naive()).or_insert(0) += 1;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};

    fn new_link(code: &str) -> NewShortLink {
        NewShortLink {
            code: code.to_string(),
            target_url: "https://a.com".to_string(),
            owner_id: "owner".to_string(),
            password_hash: None,
            expires_at: None,
        }
    }

    fn new_schedule(shortlink_id: Uuid, start: DateTime<Utc>, hours: i64) -> NewSchedule {
        NewSchedule {
            shortlink_id,
            target_url: "https://b.com".to_string(),
            start_time: start,
            end_time: start + Duration::hours(hours),
            password_hash: None,
            is_active: true,
        }
    }

    #[test]
    fn test_validate_target_url() {
        assert!(validate_target_url("https://example.com/path?q=1").is_ok());
        assert!(validate_target_url("http://localhost:3000").is_ok());
        assert!(validate_target_url("ftp://example.com").is_err());
        assert!(validate_target_url("javascript:alert(1)").is_err());
        assert!(validate_target_url("example.com").is_err());
    }

    #[tokio::test]
    async fn test_duplicate_code_rejected() {
        let store = MemoryStore::new();
        store.create_short_link(new_link("abcd")).await.unwrap();

        let err = store.create_short_link(new_link("abcd")).await.unwrap_err();
        assert!(matches!(err, AppError::ShortCodeExists(code) if code == "abcd"));
    }

    #[tokio::test]
    async fn test_schedule_window_must_be_non_empty() {
        let store = MemoryStore::new();
        let link = store.create_short_link(new_link("abcd")).await.unwrap();

        let err = store
            .create_schedule(new_schedule(link.id, Utc::now(), 0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidSchedule(_)));
    }

    #[tokio::test]
    async fn test_overlapping_active_schedules_rejected() {
        let store = MemoryStore::new();
        let link = store.create_short_link(new_link("abcd")).await.unwrap();
        let start = Utc::now();

        let first = store
            .create_schedule(new_schedule(link.id, start, 2))
            .await
            .unwrap();

        let err = store
            .create_schedule(new_schedule(link.id, start + Duration::hours(1), 2))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ScheduleOverlap(id) if id == first.id));

        // Touching windows do not overlap
        assert!(store
            .create_schedule(new_schedule(link.id, start + Duration::hours(2), 1))
            .await
            .is_ok());

        // Inactive schedules are exempt
        let mut inactive = new_schedule(link.id, start, 2);
        inactive.is_active = false;
        assert!(store.create_schedule(inactive).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = MemoryStore::new();
        let link = store.create_short_link(new_link("abcd")).await.unwrap();
        store
            .create_schedule(new_schedule(link.id, Utc::now(), 1))
            .await
            .unwrap();

        assert!(store.delete_short_link("abcd").await.unwrap());
        assert!(store.get_short_link_by_code("abcd").await.unwrap().is_none());
        assert!(store.get_active_schedules(link.id).await.unwrap().is_empty());
        assert!(!store.delete_short_link("abcd").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_lookups() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        let err = store.get_short_link_by_code("abcd").await.unwrap_err();
        assert!(matches!(err, AppError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_update_link_deactivates_and_validates() {
        let store = MemoryStore::new();
        store.create_short_link(new_link("abcd")).await.unwrap();

        let updated = store
            .update_link(
                "abcd",
                LinkUpdate {
                    is_active: Some(false),
                    ..LinkUpdate::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(!updated.is_active);
        let stored = store.get_short_link_by_code("abcd").await.unwrap().unwrap();
        assert_eq!(stored, updated);

        let err = store
            .update_link(
                "abcd",
                LinkUpdate {
                    target_url: Some("ftp://b.com".to_string()),
                    ..LinkUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidUrl(_)));

        assert!(store
            .update_link("zzzz", LinkUpdate::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_schedule_checks_other_schedules_only() {
        let store = MemoryStore::new();
        let link = store.create_short_link(new_link("abcd")).await.unwrap();
        let start = Utc::now();
        let first = store
            .create_schedule(new_schedule(link.id, start, 2))
            .await
            .unwrap();
        let second = store
            .create_schedule(new_schedule(link.id, start + Duration::hours(3), 1))
            .await
            .unwrap();

        // Growing a window over its own old range is fine
        let widened = store
            .update_schedule(
                first.id,
                ScheduleUpdate {
                    end_time: Some(start + Duration::hours(3)),
                    ..ScheduleUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(widened.end_time, start + Duration::hours(3));
        assert_eq!(widened.created_at, first.created_at);

        // Reaching into the next one is not
        let err = store
            .update_schedule(
                first.id,
                ScheduleUpdate {
                    end_time: Some(start + Duration::hours(4)),
                    ..ScheduleUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ScheduleOverlap(id) if id == second.id));

        let err = store
            .update_schedule(
                first.id,
                ScheduleUpdate {
                    start_time: Some(start + Duration::hours(5)),
                    ..ScheduleUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidSchedule(_)));

        let missing = Uuid::new_v4();
        let err = store
            .update_schedule(missing, ScheduleUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ScheduleNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_deactivate_and_delete_schedule() {
        let store = MemoryStore::new();
        let link = store.create_short_link(new_link("abcd")).await.unwrap();
        let start = Utc::now();
        let later = store
            .create_schedule(new_schedule(link.id, start + Duration::hours(2), 1))
            .await
            .unwrap();
        let earlier = store
            .create_schedule(new_schedule(link.id, start, 1))
            .await
            .unwrap();

        store
            .update_schedule(
                later.id,
                ScheduleUpdate {
                    is_active: Some(false),
                    ..ScheduleUpdate::default()
                },
            )
            .await
            .unwrap();
        let active = store.get_active_schedules(link.id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, earlier.id);

        let all = store.list_schedules(link.id).await.unwrap();
        assert_eq!(
            all.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![earlier.id, later.id]
        );

        assert!(store.delete_schedule(earlier.id).await.unwrap());
        assert!(!store.delete_schedule(earlier.id).await.unwrap());
        assert!(store.get_active_schedules(link.id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_overlapping_creates_admit_one() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let link = store.create_short_link(new_link("abcd")).await.unwrap();
        let start = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_schedule(new_schedule(link.id, start, 1)).await
            }));
        }

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert!(matches!(e, AppError::ScheduleOverlap(_))),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.get_active_schedules(link.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_access_log_writes_are_idempotent() {
        let store = MemoryStore::new();
        let link = store.create_short_link(new_link("abcd")).await.unwrap();
        let entry = crate::services::access_recorder::build_entry(
            &crate::models::AccessRequest {
                shortlink_id: link.id,
                ip_address: "203.0.113.7".to_string(),
                user_agent: None,
                referer: None,
                request_id: None,
                occurred_at: Utc::now(),
            },
            None,
        );

        store.create_access_log_entry(&entry).await.unwrap();
        store.create_access_log_entry(&entry).await.unwrap();
        assert_eq!(store.access_logs(link.id), vec![entry]);
    }

    #[tokio::test]
    async fn test_stats_break_down_by_country_and_day() {
        use crate::models::AccessRequest;
        use crate::services::access_recorder::build_entry;
        use crate::services::geo::GeoInfo;
        use chrono::{NaiveDate, TimeZone};

        let store = MemoryStore::new();
        let link = store.create_short_link(new_link("abcd")).await.unwrap();
        let day_one = Utc.with_ymd_and_hms(2024, 6, 1, 23, 0, 0).unwrap();
        let day_two = Utc.with_ymd_and_hms(2024, 6, 2, 1, 0, 0).unwrap();

        for (ip, country, at) in [
            ("203.0.113.7", Some("VN"), day_one),
            ("203.0.113.8", Some("VN"), day_two),
            ("203.0.113.7", None, day_two),
        ] {
            let request = AccessRequest {
                shortlink_id: link.id,
                ip_address: ip.to_string(),
                user_agent: None,
                referer: None,
                request_id: None,
                occurred_at: at,
            };
            let geo = country.map(|c| GeoInfo {
                country: Some(c.to_string()),
                ..GeoInfo::default()
            });
            store
                .create_access_log_entry(&build_entry(&request, geo))
                .await
                .unwrap();
        }

        let stats = store.link_stats(link.id).await.unwrap();
        assert_eq!(stats.total_visits, 3);
        assert_eq!(stats.unique_visitors, 2);
        assert_eq!(stats.countries.get("VN"), Some(&2));
        assert_eq!(stats.countries.get(UNKNOWN_COUNTRY), Some(&1));
        assert_eq!(
            stats.daily.get(&NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()),
            Some(&1)
        );
        assert_eq!(
            stats.daily.get(&NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()),
            Some(&2)
        );
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let link = store.create_short_link(new_link("abcd")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment_clicks(link.id, 1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.link(link.id).unwrap().clicks, 50);
    }
}
