use crate::error::{AppError, AppResult};
use crate::rate_limit::MAX_WINDOW_SECONDS;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub links: LinkConfig,
    pub security: SecurityConfig,
    pub geoip: GeoIpConfig,
    pub rate_limit: RateLimitConfig,
    pub attempts: AttemptLimitConfig,
    pub worker: WorkerSettings,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub url: String,
    pub max_connections: u32,
    pub default_ttl_seconds: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    pub short_code_length: usize,
    pub short_code_max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// bcrypt work factor used when hashing link and schedule passwords
    pub bcrypt_cost: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoIpConfig {
    pub enabled: bool,
    /// `{ip}` is replaced with the visitor address
    pub api_url: String,
    pub timeout_ms: u64,
    pub cache_ttl_seconds: u64,
    pub cache_capacity: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_minute: u64,
    pub burst_size: u32,
}

/// Largest accepted `RATE_LIMIT_BURST`; browser routes get twice this
pub const MAX_BURST_SIZE: u32 = 100_000;

/// Invalid-credential attempt tracking per code and client address
#[derive(Debug, Clone, Deserialize)]
pub struct AttemptLimitConfig {
    pub max_failures: u32,
    pub window_seconds: i64,
    pub capacity: usize,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

/// Read an environment variable, falling back to `default`, and parse it.
fn env_parse<T: FromStr>(key: &str, default: &str) -> AppResult<T> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| AppError::Configuration(format!("Invalid {}", key)))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env_parse("SERVER_PORT", "3000")?;

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::MissingEnvVar("DATABASE_URL".to_string()))?;

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        // CORS config
        let allowed_origins_str = env::var("ALLOWED_ORIGINS").unwrap_or_else(|_| "*".to_string());
        let allowed_origins: Vec<String> = if allowed_origins_str == "*" {
            vec!["*".to_string()]
        } else {
            allowed_origins_str
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };

        let config = Config {
            server: ServerConfig {
                host: server_host,
                port: server_port,
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: env_parse("DB_MAX_CONNECTIONS", "10")?,
                min_connections: env_parse("DB_MIN_CONNECTIONS", "1")?,
                acquire_timeout_seconds: env_parse("DB_ACQUIRE_TIMEOUT_SECONDS", "30")?,
            },
            cache: CacheConfig {
                url: redis_url,
                max_connections: env_parse("CACHE_MAX_CONNECTIONS", "10")?,
                default_ttl_seconds: env_parse("CACHE_DEFAULT_TTL_SECONDS", "60")?,
                enabled: env_parse("CACHE_ENABLED", "true")?,
            },
            links: LinkConfig {
                short_code_length: env_parse("SHORT_CODE_LENGTH", "6")?,
                short_code_max_attempts: env_parse("SHORT_CODE_MAX_ATTEMPTS", "10")?,
            },
            security: SecurityConfig {
                bcrypt_cost: env_parse("BCRYPT_COST", "10")?,
            },
            geoip: GeoIpConfig {
                enabled: env_parse("GEOIP_ENABLED", "false")?,
                api_url: env::var("GEOIP_API_URL").unwrap_or_else(|_| {
                    "http://ip-api.com/json/{ip}?fields=status,countryCode,city,regionName,timezone"
                        .to_string()
                }),
                timeout_ms: env_parse("GEOIP_TIMEOUT_MS", "1500")?,
                cache_ttl_seconds: env_parse("GEOIP_CACHE_TTL_SECONDS", "900")?,
                cache_capacity: env_parse("GEOIP_CACHE_CAPACITY", "10000")?,
            },
            rate_limit: RateLimitConfig {
                requests_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", "30")?,
                burst_size: env_parse("RATE_LIMIT_BURST", "10")?,
            },
            attempts: AttemptLimitConfig {
                max_failures: env_parse("CREDENTIAL_MAX_FAILURES", "5")?,
                window_seconds: env_parse("CREDENTIAL_WINDOW_SECONDS", "300")?,
                capacity: env_parse("CREDENTIAL_TRACKER_CAPACITY", "10000")?,
                sweep_interval_seconds: env_parse("CREDENTIAL_SWEEP_SECONDS", "60")?,
            },
            worker: WorkerSettings {
                max_retries: env_parse("WORKER_MAX_RETRIES", "3")?,
                retry_delay_ms: env_parse("WORKER_RETRY_DELAY_MS", "200")?,
                concurrency: env_parse("WORKER_CONCURRENCY", "8")?,
            },
            cors: CorsConfig { allowed_origins },
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> AppResult<()> {
        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::Configuration(
                "DB_MIN_CONNECTIONS cannot be greater than DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        if self.database.acquire_timeout_seconds == 0 {
            return Err(AppError::Configuration(
                "DB_ACQUIRE_TIMEOUT_SECONDS must be greater than 0".to_string(),
            ));
        }

        if self.cache.default_ttl_seconds == 0 {
            return Err(AppError::Configuration(
                "CACHE_DEFAULT_TTL_SECONDS must be greater than 0".to_string(),
            ));
        }

        if self.links.short_code_length < 4 || self.links.short_code_length > 16 {
            return Err(AppError::Configuration(
                "SHORT_CODE_LENGTH must be between 4 and 16".to_string(),
            ));
        }

        if self.links.short_code_max_attempts < 1 || self.links.short_code_max_attempts > 100 {
            return Err(AppError::Configuration(
                "SHORT_CODE_MAX_ATTEMPTS must be between 1 and 100".to_string(),
            ));
        }

        // bcrypt rejects costs outside this range
        if !(4..=31).contains(&self.security.bcrypt_cost) {
            return Err(AppError::Configuration(
                "BCRYPT_COST must be between 4 and 31".to_string(),
            ));
        }

        if self.geoip.enabled && !self.geoip.api_url.contains("{ip}") {
            return Err(AppError::Configuration(
                "GEOIP_API_URL must contain an {ip} placeholder".to_string(),
            ));
        }

        if self.rate_limit.requests_per_minute == 0 || self.rate_limit.requests_per_minute > 30000 {
            return Err(AppError::Configuration(
                "RATE_LIMIT_PER_MINUTE must be between 1 and 30000".to_string(),
            ));
        }

        if self.geoip.cache_ttl_seconds == 0 || self.geoip.cache_capacity == 0 {
            return Err(AppError::Configuration(
                "GEOIP_CACHE_TTL_SECONDS and GEOIP_CACHE_CAPACITY must be greater than 0"
                    .to_string(),
            ));
        }

        if self.rate_limit.burst_size == 0 || self.rate_limit.burst_size > MAX_BURST_SIZE {
            return Err(AppError::Configuration(format!(
                "RATE_LIMIT_BURST must be between 1 and {}",
                MAX_BURST_SIZE
            )));
        }

        if self.attempts.max_failures == 0 {
            return Err(AppError::Configuration(
                "CREDENTIAL_MAX_FAILURES must be greater than 0".to_string(),
            ));
        }

        if !(1..=MAX_WINDOW_SECONDS).contains(&self.attempts.window_seconds) {
            return Err(AppError::Configuration(format!(
                "CREDENTIAL_WINDOW_SECONDS must be between 1 and {}",
                MAX_WINDOW_SECONDS
            )));
        }

        if !(1..=1024).contains(&self.worker.concurrency) {
            return Err(AppError::Configuration(
                "WORKER_CONCURRENCY must be between 1 and 1024".to_string(),
            ));
        }

        if self.attempts.capacity == 0 || self.attempts.sweep_interval_seconds == 0 {
            return Err(AppError::Configuration(
                "CREDENTIAL_TRACKER_CAPACITY and CREDENTIAL_SWEEP_SECONDS must be greater than 0"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/test".to_string(),
                max_connections: 10,
                min_connections: 1,
                acquire_timeout_seconds: 30,
            },
            cache: CacheConfig {
                url: "redis://127.0.0.1".to_string(),
                max_connections: 10,
                default_ttl_seconds: 60,
                enabled: true,
            },
            links: LinkConfig {
                short_code_length: 6,
                short_code_max_attempts: 10,
            },
            security: SecurityConfig { bcrypt_cost: 10 },
            geoip: GeoIpConfig {
                enabled: false,
                api_url: "http://ip-api.com/json/{ip}".to_string(),
                timeout_ms: 1500,
                cache_ttl_seconds: 900,
                cache_capacity: 10_000,
            },
            rate_limit: RateLimitConfig {
                requests_per_minute: 30,
                burst_size: 10,
            },
            attempts: AttemptLimitConfig {
                max_failures: 5,
                window_seconds: 300,
                capacity: 10_000,
                sweep_interval_seconds: 60,
            },
            worker: WorkerSettings {
                max_retries: 3,
                retry_delay_ms: 200,
                concurrency: 8,
            },
            cors: CorsConfig {
                allowed_origins: vec!["*".to_string()],
            },
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_rejects_bcrypt_cost_out_of_range() {
        let mut config = test_config();
        config.security.bcrypt_cost = 3;
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));

        config.security.bcrypt_cost = 32;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_pool_bounds() {
        let mut config = test_config();
        config.database.min_connections = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_geoip_template_needs_placeholder() {
        let mut config = test_config();
        config.geoip.enabled = true;
        config.geoip.api_url = "http://ip-api.com/json/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_attempt_window() {
        let mut config = test_config();
        config.attempts.window_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_limits() {
        let mut config = test_config();
        config.rate_limit.burst_size = u32::MAX;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.attempts.window_seconds = i64::MAX;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.worker.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.geoip.cache_capacity = 0;
        assert!(config.validate().is_err());
    }
}
