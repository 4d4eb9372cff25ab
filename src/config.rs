//! Server configuration via CLI args and environment variables.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use phoenix_guard_service::ServiceConfig;
use phoenix_guard_service::attack::AttackPolicy;
use phoenix_guard_service::bucket::{Bucket, BucketTable};
use phoenix_guard_service::identity::IdentityPolicy;
use phoenix_guard_service::rate_limit::FailMode;

/// Counter store backend.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// In-process store; counters are per instance and lost on restart.
    Memory,
    /// Shared Redis store.
    Redis,
    /// No store: every check passes.
    None,
}

/// Client identification, rate limiting and abuse detection service.
#[derive(Parser, Debug, Clone)]
#[command(name = "phoenix-guard", version, about)]
pub struct Config {
    /// Bind address.
    #[arg(long, default_value = "0.0.0.0", env = "PHOENIX_HOST")]
    pub host: String,

    /// Bind port.
    #[arg(long, default_value_t = 8080, env = "PHOENIX_PORT")]
    pub port: u16,

    /// Counter store backend.
    #[arg(long, value_enum, default_value_t = StoreKind::Memory, env = "PHOENIX_STORE")]
    pub store: StoreKind,

    /// Redis connection URL, used with `--store redis`.
    #[arg(long, default_value = "redis://127.0.0.1:6379", env = "PHOENIX_REDIS_URL")]
    pub redis_url: String,

    /// Running behind a managed platform edge that sets X-Forwarded-For.
    #[arg(long, env = "PHOENIX_MANAGED_PLATFORM")]
    pub managed_platform: bool,

    /// Development mode: every client maps to the loopback identifier.
    #[arg(long, env = "PHOENIX_DEV_MODE")]
    pub dev_mode: bool,

    /// Trust X-Forwarded-For from any source. Only safe behind a proxy
    /// that overwrites the header.
    #[arg(long, env = "PHOENIX_TRUST_FORWARDED_FOR")]
    pub trust_forwarded_for: bool,

    /// Behaviour when the counter store fails: open, closed or propagate.
    #[arg(long, default_value = "open", env = "PHOENIX_FAIL_MODE")]
    pub fail_mode: FailMode,

    /// Requests per attack window above which a client is flagged.
    #[arg(long, default_value_t = 50, env = "PHOENIX_ATTACK_THRESHOLD")]
    pub attack_threshold: u64,

    /// Attack detection window in seconds.
    #[arg(long, default_value_t = 60, env = "PHOENIX_ATTACK_WINDOW")]
    pub attack_window: u64,

    /// Default block duration in seconds.
    #[arg(long, default_value_t = 3600, env = "PHOENIX_BLOCK_DURATION")]
    pub block_duration: u64,

    /// Block clients as soon as the attack detector flags them.
    #[arg(long, env = "PHOENIX_AUTO_BLOCK")]
    pub auto_block: bool,

    /// Override the contact bucket limit.
    #[arg(long, env = "PHOENIX_CONTACT_LIMIT")]
    pub contact_limit: Option<u64>,

    /// Override the contact bucket window in seconds.
    #[arg(long, env = "PHOENIX_CONTACT_WINDOW")]
    pub contact_window: Option<u64>,

    /// Override the api bucket limit.
    #[arg(long, env = "PHOENIX_API_LIMIT")]
    pub api_limit: Option<u64>,

    /// Override the api bucket window in seconds.
    #[arg(long, env = "PHOENIX_API_WINDOW")]
    pub api_window: Option<u64>,

    /// Override the analytics bucket limit.
    #[arg(long, env = "PHOENIX_ANALYTICS_LIMIT")]
    pub analytics_limit: Option<u64>,

    /// Override the analytics bucket window in seconds.
    #[arg(long, env = "PHOENIX_ANALYTICS_WINDOW")]
    pub analytics_window: Option<u64>,

    /// Override the strict bucket limit.
    #[arg(long, env = "PHOENIX_STRICT_LIMIT")]
    pub strict_limit: Option<u64>,

    /// Override the strict bucket window in seconds.
    #[arg(long, env = "PHOENIX_STRICT_WINDOW")]
    pub strict_window: Option<u64>,

    /// Bearer token for the admin routes. Admin routes answer 401 without it.
    #[arg(long, env = "PHOENIX_ADMIN_TOKEN")]
    pub admin_token: Option<String>,

    /// CORS allowed origins (comma-separated). Empty for no CORS.
    #[arg(long, env = "PHOENIX_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Log level.
    #[arg(long, default_value = "info", env = "PHOENIX_LOG_LEVEL")]
    pub log_level: String,

    /// Log format: "text" or "json".
    #[arg(long, default_value = "text", env = "PHOENIX_LOG_FORMAT")]
    pub log_format: String,
}

impl Config {
    /// Parses configuration from CLI args and env vars.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Builds the service-layer configuration.
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            buckets: self.bucket_table(),
            identity: IdentityPolicy {
                managed_platform: self.managed_platform,
                development: self.dev_mode,
                trust_forwarded_for: self.trust_forwarded_for,
            },
            fail_mode: self.fail_mode,
            attack: AttackPolicy {
                threshold: self.attack_threshold,
                window: Duration::from_secs(self.attack_window.max(1)),
                block_duration: Duration::from_secs(self.block_duration.max(1)),
            },
            auto_block: self.auto_block,
            admin_token: self.admin_token.clone(),
        }
    }

    fn bucket_table(&self) -> BucketTable {
        let overrides = [
            (Bucket::Contact, self.contact_limit, self.contact_window),
            (Bucket::Api, self.api_limit, self.api_window),
            (Bucket::Analytics, self.analytics_limit, self.analytics_window),
            (Bucket::Strict, self.strict_limit, self.strict_window),
        ];

        overrides
            .into_iter()
            .fold(BucketTable::default(), |table, (bucket, limit, window)| {
                if limit.is_none() && window.is_none() {
                    return table;
                }
                let current = table.get(bucket);
                let limit = limit.unwrap_or(current.limit());
                let window = window.map_or(current.window(), |secs| {
                    Duration::from_secs(secs.max(1))
                });
                table.with_policy(bucket, limit, window)
            })
    }
}
