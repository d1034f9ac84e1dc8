use crate::models::{Schedule, ShortLink};
use crate::services::credentials::CredentialHasher;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Which password gate produced a denial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateScope {
    Link,
    Schedule,
}

impl GateScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateScope::Link => "link",
            GateScope::Schedule => "schedule",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Granted,
    DeniedNeedsCredential(GateScope),
    DeniedInvalidCredential(GateScope),
}

/// Password gate evaluation.
///
/// The selected schedule's gate is checked before the link's own gate. Both
/// gates are tested against the same supplied credential, so a link and an
/// overlapping protected schedule only open together when their passwords are
/// equal.
#[derive(Clone)]
pub struct AccessGate {
    hasher: Arc<dyn CredentialHasher>,
}

impl AccessGate {
    pub fn new(hasher: Arc<dyn CredentialHasher>) -> Self {
        Self { hasher }
    }

    pub async fn evaluate(
        &self,
        link: &ShortLink,
        schedule: Option<&Schedule>,
        supplied: Option<&str>,
    ) -> GateDecision {
        // An empty form field counts as no credential
        let supplied = supplied.filter(|c| !c.is_empty());

        if let Some(schedule) = schedule.filter(|s| s.is_password_protected) {
            if let Some(denied) = self
                .check(GateScope::Schedule, schedule.password_hash.as_deref(), supplied)
                .await
            {
                return denied;
            }
        }

        if link.is_password_protected {
            if let Some(denied) = self
                .check(GateScope::Link, link.password_hash.as_deref(), supplied)
                .await
            {
                return denied;
            }
        }

        GateDecision::Granted
    }

    /// `None` when the gate is satisfied.
    async fn check(
        &self,
        scope: GateScope,
        stored: Option<&str>,
        supplied: Option<&str>,
    ) -> Option<GateDecision> {
        let Some(credential) = supplied else {
            return Some(GateDecision::DeniedNeedsCredential(scope));
        };

        let Some(hash) = stored else {
            warn!("{} gate is protected but has no stored hash", scope.as_str());
            return Some(GateDecision::DeniedInvalidCredential(scope));
        };

        if self.hasher.verify(credential, hash).await {
            None
        } else {
            Some(GateDecision::DeniedInvalidCredential(scope))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::credentials::BcryptHasher;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn link(password_hash: Option<String>) -> ShortLink {
        ShortLink {
            id: Uuid::new_v4(),
            code: "abc".to_string(),
            target_url: "https://a.com".to_string(),
            owner_id: "owner".to_string(),
            is_active: true,
            is_password_protected: password_hash.is_some(),
            password_hash,
            is_time_restricted: false,
            expires_at: None,
            clicks: 0,
            created_at: Utc::now(),
        }
    }

    fn schedule(password_hash: Option<String>) -> Schedule {
        let now = Utc::now();
        Schedule {
            id: Uuid::new_v4(),
            shortlink_id: Uuid::new_v4(),
            target_url: "https://b.com".to_string(),
            start_time: now - Duration::hours(1),
            end_time: now + Duration::hours(1),
            is_password_protected: password_hash.is_some(),
            password_hash,
            is_active: true,
            created_at: now,
        }
    }

    async fn setup() -> (AccessGate, String, String) {
        let hasher = BcryptHasher::new(4);
        let link_hash = hasher.hash("link-pass").await.unwrap();
        let schedule_hash = hasher.hash("schedule-pass").await.unwrap();
        (AccessGate::new(Arc::new(hasher)), link_hash, schedule_hash)
    }

    #[tokio::test]
    async fn test_unprotected_is_granted_with_any_credential() {
        let (gate, _, _) = setup().await;
        let link = link(None);

        assert_eq!(gate.evaluate(&link, None, None).await, GateDecision::Granted);
        assert_eq!(
            gate.evaluate(&link, Some(&schedule(None)), Some("anything")).await,
            GateDecision::Granted
        );
    }

    #[tokio::test]
    async fn test_link_gate() {
        let (gate, link_hash, _) = setup().await;
        let link = link(Some(link_hash));

        assert_eq!(
            gate.evaluate(&link, None, None).await,
            GateDecision::DeniedNeedsCredential(GateScope::Link)
        );
        assert_eq!(
            gate.evaluate(&link, None, Some("")).await,
            GateDecision::DeniedNeedsCredential(GateScope::Link)
        );
        assert_eq!(
            gate.evaluate(&link, None, Some("wrong")).await,
            GateDecision::DeniedInvalidCredential(GateScope::Link)
        );
        assert_eq!(
            gate.evaluate(&link, None, Some("link-pass")).await,
            GateDecision::Granted
        );
    }

    #[tokio::test]
    async fn test_schedule_gate_is_checked_first() {
        let (gate, link_hash, schedule_hash) = setup().await;
        let link = link(Some(link_hash));
        let schedule = schedule(Some(schedule_hash));

        assert_eq!(
            gate.evaluate(&link, Some(&schedule), None).await,
            GateDecision::DeniedNeedsCredential(GateScope::Schedule)
        );
        assert_eq!(
            gate.evaluate(&link, Some(&schedule), Some("link-pass")).await,
            GateDecision::DeniedInvalidCredential(GateScope::Schedule)
        );
        // Passing the schedule gate still leaves the link gate
        assert_eq!(
            gate.evaluate(&link, Some(&schedule), Some("schedule-pass")).await,
            GateDecision::DeniedInvalidCredential(GateScope::Link)
        );
    }

    #[tokio::test]
    async fn test_shared_credential_opens_both_gates() {
        let hasher = BcryptHasher::new(4);
        let link = link(Some(hasher.hash("same").await.unwrap()));
        let schedule = schedule(Some(hasher.hash("same").await.unwrap()));
        let gate = AccessGate::new(Arc::new(hasher));

        assert_eq!(
            gate.evaluate(&link, Some(&schedule), Some("same")).await,
            GateDecision::Granted
        );
    }

    #[tokio::test]
    async fn test_schedule_gate_alone() {
        let (gate, _, schedule_hash) = setup().await;
        let link = link(None);
        let schedule = schedule(Some(schedule_hash));

        assert_eq!(
            gate.evaluate(&link, Some(&schedule), Some("schedule-pass")).await,
            GateDecision::Granted
        );
    }

    #[tokio::test]
    async fn test_protected_without_hash_fails_closed() {
        let (gate, _, _) = setup().await;
        let mut link = link(None);
        link.is_password_protected = true;

        assert_eq!(
            gate.evaluate(&link, None, Some("anything")).await,
            GateDecision::DeniedInvalidCredential(GateScope::Link)
        );
    }
}
