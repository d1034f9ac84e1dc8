//! Administrative command handlers.
//!
//! Link and schedule management lives here rather than behind HTTP: the
//! server only exposes the redirect surface.

use crate::cache::{Cache, CachedLinkStore};
use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, AppResult};
use crate::models::{LinkUpdate, NewSchedule, NewShortLink, Schedule, ScheduleUpdate, ShortLink};
use crate::services::credentials::{BcryptHasher, CredentialHasher};
use crate::services::short_code::{validate_custom_code, ShortCodeService};
use crate::store::LinkStore;
use chrono::{DateTime, Duration, Utc};
use clap::Subcommand;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Administrative commands available via CLI.
#[derive(Subcommand, Debug)]
pub enum AdminCommands {
    /// Run database migrations
    Migrate,

    /// Create a short link
    CreateLink {
        /// Destination URL
        #[arg(long)]
        target: String,

        /// Custom code (4-16 of [A-Za-z0-9_-]); generated when omitted
        #[arg(long)]
        code: Option<String>,

        /// Password required before redirecting
        #[arg(long)]
        password: Option<String>,

        /// Hard expiry, counted from now
        #[arg(long)]
        expires_in_hours: Option<i64>,

        #[arg(long, default_value = "admin")]
        owner: String,
    },

    /// Attach a time window with its own destination to a link
    AddSchedule {
        #[arg(long)]
        code: String,

        #[arg(long)]
        target: String,

        /// Window start, RFC 3339 (inclusive)
        #[arg(long)]
        start: String,

        /// Window end, RFC 3339 (exclusive)
        #[arg(long)]
        end: String,

        #[arg(long)]
        password: Option<String>,

        /// Store the schedule disabled
        #[arg(long)]
        inactive: bool,
    },

    /// Change a link's destination, password, expiry or active state
    UpdateLink {
        #[arg(long)]
        code: String,

        #[arg(long)]
        target: Option<String>,

        #[arg(long, conflicts_with = "clear_password")]
        password: Option<String>,

        /// Remove password protection
        #[arg(long)]
        clear_password: bool,

        /// New hard expiry, counted from now
        #[arg(long, conflicts_with = "no_expiry")]
        expires_in_hours: Option<i64>,

        /// Remove the expiry
        #[arg(long)]
        no_expiry: bool,

        #[arg(long, conflicts_with = "deactivate")]
        activate: bool,

        /// Soft-disable the link; it resolves as inactive until re-activated
        #[arg(long)]
        deactivate: bool,
    },

    /// List every schedule of a link
    ListSchedules {
        #[arg(long)]
        code: String,
    },

    /// Change a schedule; the overlap check runs again
    UpdateSchedule {
        #[arg(long)]
        id: Uuid,

        #[arg(long)]
        target: Option<String>,

        /// New window start, RFC 3339 (inclusive)
        #[arg(long)]
        start: Option<String>,

        /// New window end, RFC 3339 (exclusive)
        #[arg(long)]
        end: Option<String>,

        #[arg(long, conflicts_with = "clear_password")]
        password: Option<String>,

        #[arg(long)]
        clear_password: bool,

        #[arg(long, conflicts_with = "deactivate")]
        activate: bool,

        #[arg(long)]
        deactivate: bool,
    },

    /// Delete one schedule
    DeleteSchedule {
        #[arg(long)]
        id: Uuid,
    },

    /// Delete a link with its schedules and access logs
    DeleteLink {
        #[arg(long)]
        code: String,
    },

    /// Show statistics for one link
    Stats {
        #[arg(long)]
        code: String,
    },

    /// Print the bcrypt hash of a password
    HashPassword { plaintext: String },

    /// Ping the cache server
    PingCache,
}

/// Run an administrative command with the given configuration.
pub async fn run(config: Config, admin_command: AdminCommands) -> AppResult<()> {
    match admin_command {
        AdminCommands::Migrate => migrate(config).await,
        AdminCommands::CreateLink {
            target,
            code,
            password,
            expires_in_hours,
            owner,
        } => {
            let store = connect_store(&config).await?;
            let hasher = BcryptHasher::new(config.security.bcrypt_cost);
            let code = match code {
                Some(code) => {
                    validate_custom_code(&code)?;
                    code
                }
                None => {
                    ShortCodeService::generate_short_code(
                        config.links.short_code_length,
                        config.links.short_code_max_attempts,
                        store.as_ref(),
                    )
                    .await?
                }
            };
            let new = NewShortLink {
                code,
                target_url: target,
                owner_id: owner,
                password_hash: hash_optional(&hasher, password.as_deref()).await?,
                expires_at: expires_in_hours
                    .map(|hours| expiry_from(Utc::now(), hours))
                    .transpose()?,
            };

            let link = store.create_short_link(new).await?;
            println!("Created {} -> {}", link.code, link.target_url);
            if let Some(expires_at) = link.expires_at {
                println!("Expires at {}", expires_at.to_rfc3339());
            }
            Ok(())
        }
        AdminCommands::AddSchedule {
            code,
            target,
            start,
            end,
            password,
            inactive,
        } => {
            let store = connect_store(&config).await?;
            let hasher = BcryptHasher::new(config.security.bcrypt_cost);
            let link = store
                .get_short_link_by_code(&code)
                .await?
                .ok_or_else(|| AppError::LinkNotFound(code.clone()))?;

            let schedule = store
                .create_schedule(NewSchedule {
                    shortlink_id: link.id,
                    target_url: target,
                    start_time: parse_timestamp(&start)?,
                    end_time: parse_timestamp(&end)?,
                    password_hash: hash_optional(&hasher, password.as_deref()).await?,
                    is_active: !inactive,
                })
                .await?;

            println!(
                "Schedule {} on {}: {} .. {} -> {}",
                schedule.id,
                code,
                schedule.start_time.to_rfc3339(),
                schedule.end_time.to_rfc3339(),
                schedule.target_url
            );
            Ok(())
        }
        AdminCommands::UpdateLink {
            code,
            target,
            password,
            clear_password,
            expires_in_hours,
            no_expiry,
            activate,
            deactivate,
        } => {
            let store = connect_store(&config).await?;
            let hasher = BcryptHasher::new(config.security.bcrypt_cost);
            let expires_at = match (expires_in_hours, no_expiry) {
                (Some(hours), _) => Some(Some(expiry_from(Utc::now(), hours)?)),
                (None, true) => Some(None),
                (None, false) => None,
            };
            let update = LinkUpdate {
                target_url: target,
                is_active: active_flag(activate, deactivate),
                password_hash: password_change(&hasher, password.as_deref(), clear_password)
                    .await?,
                expires_at,
            };

            let link = apply_link_update(store.as_ref(), &code, update).await?;
            print_link(&link);
            Ok(())
        }
        AdminCommands::ListSchedules { code } => {
            let store = connect_store(&config).await?;
            let link = store
                .get_short_link_by_code(&code)
                .await?
                .ok_or_else(|| AppError::LinkNotFound(code.clone()))?;

            let schedules = store.list_schedules(link.id).await?;
            if schedules.is_empty() {
                println!("No schedules for {}", code);
            }
            for schedule in &schedules {
                print_schedule(schedule);
            }
            Ok(())
        }
        AdminCommands::UpdateSchedule {
            id,
            target,
            start,
            end,
            password,
            clear_password,
            activate,
            deactivate,
        } => {
            let store = connect_store(&config).await?;
            let hasher = BcryptHasher::new(config.security.bcrypt_cost);
            let update = ScheduleUpdate {
                target_url: target,
                start_time: start.as_deref().map(parse_timestamp).transpose()?,
                end_time: end.as_deref().map(parse_timestamp).transpose()?,
                password_hash: password_change(&hasher, password.as_deref(), clear_password)
                    .await?,
                is_active: active_flag(activate, deactivate),
            };

            let schedule = apply_schedule_update(store.as_ref(), id, update).await?;
            print_schedule(&schedule);
            Ok(())
        }
        AdminCommands::DeleteSchedule { id } => {
            let store = connect_store(&config).await?;
            if store.delete_schedule(id).await? {
                info!("Deleted schedule {}", id);
                Ok(())
            } else {
                Err(AppError::ScheduleNotFound(id))
            }
        }
        AdminCommands::DeleteLink { code } => {
            let store = connect_store(&config).await?;
            if store.delete_short_link(&code).await? {
                info!("Deleted short link {}", code);
                Ok(())
            } else {
                Err(AppError::LinkNotFound(code))
            }
        }
        AdminCommands::Stats { code } => stats(config, code).await,
        AdminCommands::HashPassword { plaintext } => {
            let hasher = BcryptHasher::new(config.security.bcrypt_cost);
            println!("{}", hasher.hash(&plaintext).await?);
            Ok(())
        }
        AdminCommands::PingCache => ping_cache(config).await,
    }
}

async fn connect_repository(config: &Config) -> AppResult<Repository> {
    Repository::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
        config.database.acquire_timeout_seconds,
    )
    .await
}

/// Repository behind the cache when enabled, so writes evict stale snapshots
async fn connect_store(config: &Config) -> AppResult<Arc<dyn LinkStore>> {
    let repository = connect_repository(config).await?;
    if !config.cache.enabled {
        return Ok(Arc::new(repository));
    }

    match Cache::new(
        &config.cache.url,
        config.cache.max_connections,
        config.cache.default_ttl_seconds,
    )
    .await
    {
        Ok(cache) => Ok(Arc::new(CachedLinkStore::new(Arc::new(repository), cache))),
        Err(e) => {
            warn!("Cache unavailable: {}", e);
            Ok(Arc::new(repository))
        }
    }
}

async fn hash_optional(
    hasher: &BcryptHasher,
    password: Option<&str>,
) -> AppResult<Option<String>> {
    match password.filter(|p| !p.is_empty()) {
        Some(password) => Ok(Some(hasher.hash(password).await?)),
        None => Ok(None),
    }
}

/// Out-of-range hour counts are rejected rather than overflowing
fn expiry_from(now: DateTime<Utc>, hours: i64) -> AppResult<DateTime<Utc>> {
    Duration::try_hours(hours)
        .and_then(|offset| now.checked_add_signed(offset))
        .ok_or_else(|| {
            AppError::InvalidRequest(format!("Expiry of {} hours is out of range", hours))
        })
}

fn active_flag(activate: bool, deactivate: bool) -> Option<bool> {
    match (activate, deactivate) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

/// `Some(None)` clears the password, `Some(Some(hash))` replaces it
async fn password_change(
    hasher: &BcryptHasher,
    password: Option<&str>,
    clear: bool,
) -> AppResult<Option<Option<String>>> {
    if clear {
        return Ok(Some(None));
    }
    match hash_optional(hasher, password).await? {
        Some(hash) => Ok(Some(Some(hash))),
        None => Ok(None),
    }
}

async fn apply_link_update(
    store: &dyn LinkStore,
    code: &str,
    update: LinkUpdate,
) -> AppResult<ShortLink> {
    if update.is_empty() {
        return Err(AppError::InvalidRequest("Nothing to update".to_string()));
    }

    let link = store
        .update_link(code, update)
        .await?
        .ok_or_else(|| AppError::LinkNotFound(code.to_string()))?;
    info!(code = %code, is_active = link.is_active, "Updated short link");
    Ok(link)
}

async fn apply_schedule_update(
    store: &dyn LinkStore,
    id: Uuid,
    update: ScheduleUpdate,
) -> AppResult<Schedule> {
    if update.is_empty() {
        return Err(AppError::InvalidRequest("Nothing to update".to_string()));
    }

    let schedule = store.update_schedule(id, update).await?;
    info!(schedule_id = %id, is_active = schedule.is_active, "Updated schedule");
    Ok(schedule)
}

fn print_link(link: &ShortLink) {
    println!("{} -> {}", link.code, link.target_url);
    println!("  active:    {}", link.is_active);
    println!("  password:  {}", link.is_password_protected);
    match link.expires_at {
        Some(expires_at) => println!("  expires:   {}", expires_at.to_rfc3339()),
        None => println!("  expires:   never"),
    }
}

fn print_schedule(schedule: &Schedule) {
    println!(
        "{} {} .. {} -> {} (active: {}, password: {})",
        schedule.id,
        schedule.start_time.to_rfc3339(),
        schedule.end_time.to_rfc3339(),
        schedule.target_url,
        schedule.is_active,
        schedule.is_password_protected
    );
}

fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::InvalidRequest(format!("Invalid RFC 3339 timestamp {}: {}", raw, e)))
}

/// Run database migrations.
async fn migrate(config: Config) -> AppResult<()> {
    info!("Running database migrations...");

    let repository = connect_repository(&config).await?;
    repository.run_migrations().await?;

    info!("Migrations completed successfully");
    Ok(())
}

/// Display statistics for one link.
async fn stats(config: Config, code: String) -> AppResult<()> {
    info!("Fetching statistics...");

    let repository = connect_repository(&config).await?;
    let link = repository
        .get_short_link_by_code(&code)
        .await?
        .ok_or_else(|| AppError::LinkNotFound(code.clone()))?;
    let stats = repository.link_stats(link.id).await?;

    println!("\n=== {} ===", link.code);
    println!("Target:          {}", link.target_url);
    println!("Active:          {}", link.is_active);
    println!("Clicks:          {}", stats.clicks);
    println!("Visits:          {}", stats.total_visits);
    println!("Unique visitors: {}", stats.unique_visitors);
    println!("Devices:");
    for (device, count) in &stats.devices {
        println!("  {:<14} {}", device, count);
    }
    println!("Countries:");
    for (country, count) in &stats.countries {
        println!("  {:<14} {}", country, count);
    }
    println!("Daily:");
    for (day, count) in &stats.daily {
        println!("  {:<14} {}", day, count);
    }
    println!();

    Ok(())
}

/// Ping the cache server.
async fn ping_cache(config: Config) -> AppResult<()> {
    info!("Pinging cache server...");

    let cache = Cache::new(
        &config.cache.url,
        config.cache.max_connections,
        config.cache.default_ttl_seconds,
    )
    .await?;

    let response = cache.ping().await?;

    info!("Cache server responded: {}", response);

    Ok(())
}
