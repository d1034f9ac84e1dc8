use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::Validate;

/// Short link record in the database
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct ShortLink {
    pub id: Uuid,
    pub code: String,
    pub target_url: String,
    pub owner_id: String,
    pub is_active: bool,
    pub is_password_protected: bool,
    /// bcrypt hash, never plaintext
    pub password_hash: Option<String>,
    pub is_time_restricted: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub clicks: i64,
    pub created_at: DateTime<Utc>,
}

impl ShortLink {
    /// Hard expiry check. A restricted link without an expiry date never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_time_restricted && self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Time window overriding a link's destination (and optionally adding a password)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub id: Uuid,
    pub shortlink_id: Uuid,
    pub target_url: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_password_protected: bool,
    pub password_hash: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    /// Start inclusive, end exclusive.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && start < self.end_time
    }
}

/// Device class derived from the user agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
        }
    }
}

/// One immutable analytics record per resolved redirect
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessLogEntry {
    pub id: Uuid,
    pub shortlink_id: Uuid,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub device_type: DeviceType,
    pub browser: String,
    pub os: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub timezone: Option<String>,
    /// Forward-compatible metadata (e.g. request id)
    pub extra: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Raw request data handed to the access recorder
#[derive(Debug, Clone, PartialEq)]
pub struct AccessRequest {
    pub shortlink_id: Uuid,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub request_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Input for creating a short link
#[derive(Debug, Clone)]
pub struct NewShortLink {
    pub code: String,
    pub target_url: String,
    pub owner_id: String,
    pub password_hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Input for creating a schedule
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub shortlink_id: Uuid,
    pub target_url: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub password_hash: Option<String>,
    pub is_active: bool,
}

/// Partial update of a link. `None` leaves the field untouched; the nested
/// options set or clear a nullable column.
#[derive(Debug, Clone, Default)]
pub struct LinkUpdate {
    pub target_url: Option<String>,
    pub is_active: Option<bool>,
    pub password_hash: Option<Option<String>>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

impl LinkUpdate {
    pub fn is_empty(&self) -> bool {
        self.target_url.is_none()
            && self.is_active.is_none()
            && self.password_hash.is_none()
            && self.expires_at.is_none()
    }

    /// Apply onto a copy of `link`, keeping the derived flags in step
    pub fn apply(&self, link: &ShortLink) -> ShortLink {
        let mut updated = link.clone();
        if let Some(target_url) = &self.target_url {
            updated.target_url = target_url.clone();
        }
        if let Some(is_active) = self.is_active {
            updated.is_active = is_active;
        }
        if let Some(password_hash) = &self.password_hash {
            updated.password_hash = password_hash.clone();
            updated.is_password_protected = password_hash.is_some();
        }
        if let Some(expires_at) = self.expires_at {
            updated.expires_at = expires_at;
            updated.is_time_restricted = expires_at.is_some();
        }
        updated
    }
}

/// Partial update of a schedule, same conventions as [`LinkUpdate`]
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub target_url: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub password_hash: Option<Option<String>>,
    pub is_active: Option<bool>,
}

impl ScheduleUpdate {
    pub fn is_empty(&self) -> bool {
        self.target_url.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
            && self.password_hash.is_none()
            && self.is_active.is_none()
    }

    /// The schedule as it would look after the update, in creation form so
    /// the write-time checks can be reused.
    pub fn merge(&self, current: &Schedule) -> NewSchedule {
        NewSchedule {
            shortlink_id: current.shortlink_id,
            target_url: self
                .target_url
                .clone()
                .unwrap_or_else(|| current.target_url.clone()),
            start_time: self.start_time.unwrap_or(current.start_time),
            end_time: self.end_time.unwrap_or(current.end_time),
            password_hash: match &self.password_hash {
                Some(password_hash) => password_hash.clone(),
                None => current.password_hash.clone(),
            },
            is_active: self.is_active.unwrap_or(current.is_active),
        }
    }
}

/// Per-link analytics summary
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LinkStats {
    pub clicks: i64,
    pub total_visits: i64,
    pub unique_visitors: i64,
    pub devices: BTreeMap<String, i64>,
    /// Visits per country code; entries without geo data count as `unknown`
    pub countries: BTreeMap<String, i64>,
    /// Visits per UTC calendar day
    pub daily: BTreeMap<NaiveDate, i64>,
}

/// Bucket used for access logs without a resolved country
pub const UNKNOWN_COUNTRY: &str = "unknown";

/// Body of `POST /redirect/{code}`
#[derive(Debug, Default, Deserialize, Validate)]
pub struct RedirectRequest {
    #[validate(length(max = 256, message = "Password must be at most 256 characters"))]
    pub password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn link(is_time_restricted: bool, expires_at: Option<DateTime<Utc>>) -> ShortLink {
        ShortLink {
            id: Uuid::new_v4(),
            code: "abc".to_string(),
            target_url: "https://a.com".to_string(),
            owner_id: "owner".to_string(),
            is_active: true,
            is_password_protected: false,
            password_hash: None,
            is_time_restricted,
            expires_at,
            clicks: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_expiry_requires_time_restriction() {
        let now = Utc::now();
        assert!(!link(false, Some(now - Duration::hours(1))).is_expired(now));
        assert!(link(true, Some(now - Duration::hours(1))).is_expired(now));
        assert!(link(true, Some(now)).is_expired(now));
        assert!(!link(true, Some(now + Duration::seconds(1))).is_expired(now));
        assert!(!link(true, None).is_expired(now));
    }

    #[test]
    fn test_schedule_window_is_half_open() {
        let start = Utc::now();
        let end = start + Duration::hours(1);
        let schedule = Schedule {
            id: Uuid::new_v4(),
            shortlink_id: Uuid::new_v4(),
            target_url: "https://b.com".to_string(),
            start_time: start,
            end_time: end,
            is_password_protected: false,
            password_hash: None,
            is_active: true,
            created_at: start,
        };

        assert!(schedule.contains(start));
        assert!(schedule.contains(end - Duration::milliseconds(1)));
        assert!(!schedule.contains(end));
        assert!(!schedule.contains(start - Duration::milliseconds(1)));

        assert!(schedule.overlaps(end - Duration::minutes(1), end + Duration::hours(1)));
        assert!(!schedule.overlaps(end, end + Duration::hours(1)));
    }

    #[test]
    fn test_link_update_keeps_flags_in_step() {
        let now = Utc::now();
        let original = link(false, None);

        let update = LinkUpdate {
            password_hash: Some(Some("hash".to_string())),
            expires_at: Some(Some(now)),
            is_active: Some(false),
            ..LinkUpdate::default()
        };
        let updated = update.apply(&original);
        assert!(updated.is_password_protected);
        assert!(updated.is_time_restricted);
        assert!(!updated.is_active);
        assert_eq!(updated.target_url, original.target_url);

        let cleared = LinkUpdate {
            password_hash: Some(None),
            expires_at: Some(None),
            ..LinkUpdate::default()
        }
        .apply(&updated);
        assert!(!cleared.is_password_protected);
        assert!(cleared.password_hash.is_none());
        assert!(!cleared.is_time_restricted);
        assert!(LinkUpdate::default().is_empty());
    }

    #[test]
    fn test_schedule_update_merge() {
        let start = Utc::now();
        let current = Schedule {
            id: Uuid::new_v4(),
            shortlink_id: Uuid::new_v4(),
            target_url: "https://b.com".to_string(),
            start_time: start,
            end_time: start + Duration::hours(1),
            is_password_protected: true,
            password_hash: Some("hash".to_string()),
            is_active: true,
            created_at: start,
        };

        let merged = ScheduleUpdate {
            end_time: Some(start + Duration::hours(3)),
            ..ScheduleUpdate::default()
        }
        .merge(&current);
        assert_eq!(merged.shortlink_id, current.shortlink_id);
        assert_eq!(merged.start_time, start);
        assert_eq!(merged.end_time, start + Duration::hours(3));
        assert_eq!(merged.password_hash.as_deref(), Some("hash"));

        let cleared = ScheduleUpdate {
            password_hash: Some(None),
            ..ScheduleUpdate::default()
        }
        .merge(&current);
        assert!(cleared.password_hash.is_none());
    }

    #[test]
    fn test_device_type_serialization() {
        assert_eq!(serde_json::to_string(&DeviceType::Tablet).unwrap(), "\"tablet\"");
        assert_eq!(DeviceType::Mobile.as_str(), "mobile");
    }
}
