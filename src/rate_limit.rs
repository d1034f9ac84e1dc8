//! Invalid-credential attempt limiter.
//!
//! Counts failed password submissions per `code + client address` in fixed
//! windows. Owned by the application state and swept by a background task;
//! the redirect engine itself never consults it.

use crate::clock::Clock;
use crate::config::AttemptLimitConfig;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Result of consulting the limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Allowed,
    Blocked { retry_after_seconds: i64 },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: DateTime<Utc>,
    failures: u32,
}

/// Longest supported counting window (one week)
pub const MAX_WINDOW_SECONDS: i64 = 7 * 24 * 60 * 60;

pub struct AttemptLimiter {
    windows: DashMap<String, Window>,
    max_failures: u32,
    window: Duration,
    capacity: usize,
}

impl AttemptLimiter {
    /// `window_seconds` is clamped to `1..=MAX_WINDOW_SECONDS`
    pub fn new(max_failures: u32, window_seconds: i64, capacity: usize) -> Self {
        let window_seconds = window_seconds.clamp(1, MAX_WINDOW_SECONDS);
        Self {
            windows: DashMap::new(),
            max_failures,
            window: Duration::try_seconds(window_seconds)
                .unwrap_or_else(|| Duration::seconds(MAX_WINDOW_SECONDS)),
            capacity,
        }
    }

    pub fn from_config(config: &AttemptLimitConfig) -> Self {
        Self::new(config.max_failures, config.window_seconds, config.capacity)
    }

    /// Limiter key for one code seen from one address
    pub fn key(code: &str, client_ip: &str) -> String {
        format!("{}|{}", code, client_ip)
    }

    pub fn check(&self, key: &str, now: DateTime<Utc>) -> AttemptStatus {
        match self.windows.get(key) {
            Some(window) => self.status_of(&window, now),
            None => AttemptStatus::Allowed,
        }
    }

    /// Count one failure and report whether the key is now blocked.
    pub fn record_failure(&self, key: &str, now: DateTime<Utc>) -> AttemptStatus {
        if !self.windows.contains_key(key) && self.windows.len() >= self.capacity {
            self.evict_oldest();
        }

        let mut window = self.windows.entry(key.to_string()).or_insert(Window {
            started_at: now,
            failures: 0,
        });
        if self.is_expired(&window, now) {
            *window = Window {
                started_at: now,
                failures: 0,
            };
        }
        window.failures += 1;

        let status = self.status_of(&window, now);
        if let AttemptStatus::Blocked { retry_after_seconds } = status {
            warn!(key = %key, retry_after_seconds, "Too many invalid credentials");
        }
        status
    }

    pub fn reset(&self, key: &str) {
        self.windows.remove(key);
    }

    /// Drop every expired window. Returns how many were removed.
    pub fn tick(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| !self.is_expired(window, now));
        before.saturating_sub(self.windows.len())
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Run `tick` on a fixed interval until the handle is aborted
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: std::time::Duration,
        clock: Arc<dyn Clock>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = self.tick(clock.now());
                if removed > 0 {
                    debug!(removed, remaining = self.len(), "Swept attempt windows");
                }
            }
        })
    }

    fn is_expired(&self, window: &Window, now: DateTime<Utc>) -> bool {
        window.started_at + self.window <= now
    }

    fn status_of(&self, window: &Window, now: DateTime<Utc>) -> AttemptStatus {
        if self.is_expired(window, now) || window.failures < self.max_failures {
            return AttemptStatus::Allowed;
        }
        let remaining = (window.started_at + self.window - now).num_seconds();
        AttemptStatus::Blocked {
            retry_after_seconds: remaining.max(1),
        }
    }

    fn evict_oldest(&self) {
        let oldest = self
            .windows
            .iter()
            .min_by_key(|entry| entry.value().started_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.windows.remove(&key);
        }
    }
}
