//! Worker configuration loaded from environment variables.
//!
//! All fields except `JWT_SECRET` have defaults suitable for local
//! development. In production, override via environment variables.

use relay_queue::dispatcher::DEFAULT_CONCURRENCY;

/// Default Redis port.
const DEFAULT_REDIS_PORT: u16 = 6379;

/// Worker service configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Deployment environment name (e.g. `dev`, `qa`, `prod`). Namespaces
    /// every cache key.
    pub env: String,
    /// Whether this process runs the queue worker loop.
    pub worker: bool,
    /// Maximum simultaneously executing jobs.
    pub concurrency: usize,
    /// HMAC secret used to verify tokens.
    pub jwt_secret: String,
    /// Cache backend configuration.
    pub redis: RedisConfig,
}

/// Redis connection and cache behaviour configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis hostname. When unset, the in-process cache backend is used.
    pub host: Option<String>,
    /// Redis port (default: `6379`).
    pub port: u16,
    /// Whether cached reads/writes are globally enabled.
    pub cache_enabled: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var              | Required | Default |
    /// |----------------------|----------|---------|
    /// | `ENVIRONMENT`        | no       | `dev`   |
    /// | `ENABLE_WORKER`      | no       | `false` |
    /// | `WORKER_CONCURRENCY` | no       | `20`    |
    /// | `JWT_SECRET`         | **yes**  | --      |
    /// | `REDIS_HOST`         | no       | --      |
    /// | `REDIS_PORT`         | no       | `6379`  |
    /// | `REDIS_CACHE`        | no       | `false` |
    ///
    /// # Panics
    ///
    /// Panics if `JWT_SECRET` is not set or is empty, or if a numeric
    /// variable does not parse. Misconfiguration should fail at startup.
    pub fn from_env() -> Self {
        let env = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".into());

        let worker = std::env::var("ENABLE_WORKER")
            .map(|v| flag_enabled(&v))
            .unwrap_or(false);

        let concurrency: usize = std::env::var("WORKER_CONCURRENCY")
            .unwrap_or_else(|_| DEFAULT_CONCURRENCY.to_string())
            .parse()
            .expect("WORKER_CONCURRENCY must be a valid usize");

        let jwt_secret =
            std::env::var("JWT_SECRET").expect("JWT_SECRET must be set in the environment");
        assert!(!jwt_secret.is_empty(), "JWT_SECRET must not be empty");

        Self {
            env,
            worker,
            concurrency,
            jwt_secret,
            redis: RedisConfig::from_env(),
        }
    }
}

impl RedisConfig {
    fn from_env() -> Self {
        let host = std::env::var("REDIS_HOST").ok().filter(|h| !h.is_empty());

        let port: u16 = std::env::var("REDIS_PORT")
            .unwrap_or_else(|_| DEFAULT_REDIS_PORT.to_string())
            .parse()
            .expect("REDIS_PORT must be a valid u16");

        let cache_enabled = std::env::var("REDIS_CACHE")
            .map(|v| flag_enabled(&v))
            .unwrap_or(false);

        Self {
            host,
            port,
            cache_enabled,
        }
    }
}

/// Whether an environment flag value counts as enabled.
///
/// Matches `TRUE` case-insensitively; anything else is disabled.
fn flag_enabled(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
