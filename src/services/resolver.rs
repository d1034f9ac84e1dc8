use crate::error::AppResult;
use crate::jobs::JobSender;
use crate::models::AccessRequest;
use crate::services::access_gate::{AccessGate, GateDecision, GateScope};
use crate::services::schedule_selector::{matching_schedules, select_schedule};
use crate::services::short_code::is_well_formed_code;
use crate::store::LinkStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Final decision for one redirect request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    Redirect(String),
    NotFound,
    Inactive,
    Expired,
    NeedsCredential(GateScope),
    InvalidCredential(GateScope),
}

impl RedirectOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedirectOutcome::Redirect(_) => "redirect",
            RedirectOutcome::NotFound => "not_found",
            RedirectOutcome::Inactive => "inactive",
            RedirectOutcome::Expired => "expired",
            RedirectOutcome::NeedsCredential(_) => "needs_credential",
            RedirectOutcome::InvalidCredential(_) => "invalid_credential",
        }
    }
}

/// Who asked for the redirect; only used for access recording
#[derive(Debug, Clone, Default)]
pub struct Visitor {
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub request_id: Option<String>,
}

/// Orchestrates lookup, expiry, schedule selection and password gates.
///
/// Reads the link and its schedules once per call. Side effects of a granted
/// redirect (access log, click counter) are handed to the background worker
/// and can never change the returned outcome.
#[derive(Clone)]
pub struct RedirectResolver {
    store: Arc<dyn LinkStore>,
    gate: AccessGate,
    jobs: JobSender,
}

impl RedirectResolver {
    pub fn new(store: Arc<dyn LinkStore>, gate: AccessGate, jobs: JobSender) -> Self {
        Self { store, gate, jobs }
    }

    /// `Err` means the store failed; it is never reported as `NotFound`.
    pub async fn resolve(
        &self,
        code: &str,
        credential: Option<&str>,
        now: DateTime<Utc>,
        visitor: &Visitor,
    ) -> AppResult<RedirectOutcome> {
        if !is_well_formed_code(code) {
            return Ok(RedirectOutcome::NotFound);
        }

        let link = match self.store.get_short_link_by_code(code).await {
            Ok(Some(link)) => link,
            Ok(None) => return Ok(RedirectOutcome::NotFound),
            Err(e) => {
                error!(code = %code, "Short link lookup failed: {}", e);
                return Err(e);
            }
        };

        if !link.is_active {
            return Ok(RedirectOutcome::Inactive);
        }

        if link.is_expired(now) {
            return Ok(RedirectOutcome::Expired);
        }

        let schedules = self.store.get_active_schedules(link.id).await.map_err(|e| {
            error!(code = %code, "Schedule lookup failed: {}", e);
            e
        })?;

        if matching_schedules(&schedules, now).nth(1).is_some() {
            warn!(code = %code, "Overlapping active schedules, using the earliest");
        }
        let schedule = select_schedule(&schedules, now);

        match self.gate.evaluate(&link, schedule, credential).await {
            GateDecision::Granted => {}
            GateDecision::DeniedNeedsCredential(scope) => {
                debug!(code = %code, scope = scope.as_str(), "Credential required");
                return Ok(RedirectOutcome::NeedsCredential(scope));
            }
            GateDecision::DeniedInvalidCredential(scope) => {
                info!(code = %code, scope = scope.as_str(), "Invalid credential");
                return Ok(RedirectOutcome::InvalidCredential(scope));
            }
        }

        let target_url = schedule
            .map(|s| s.target_url.clone())
            .unwrap_or_else(|| link.target_url.clone());

        self.jobs.record_access(AccessRequest {
            shortlink_id: link.id,
            ip_address: visitor.ip_address.clone(),
            user_agent: visitor.user_agent.clone(),
            referer: visitor.referer.clone(),
            request_id: visitor.request_id.clone(),
            occurred_at: now,
        });
        self.jobs.increment_clicks(link.id, 1);

        debug!(code = %code, target = %target_url, scheduled = schedule.is_some(), "Resolved");
        Ok(RedirectOutcome::Redirect(target_url))
    }
}
