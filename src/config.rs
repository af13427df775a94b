use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::models::plan::PlanTier;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
    pub pro_product_ids: HashSet<String>,
    pub ultra_pro_product_ids: HashSet<String>,
    pub request_timeout: Duration,
}

impl StripeSettings {
    pub fn is_test_mode(&self) -> bool {
        self.secret_key.starts_with("sk_test_") || self.secret_key.starts_with("rk_test_")
    }
}

/// Generation allowance per billing period, by tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageLimits {
    pub free: i32,
    pub pro: i32,
    pub ultra_pro: i32,
}

impl Default for UsageLimits {
    fn default() -> Self {
        Self {
            free: 0,
            pro: 500,
            ultra_pro: 2000,
        }
    }
}

impl UsageLimits {
    pub fn for_tier(&self, tier: PlanTier) -> i32 {
        match tier {
            PlanTier::Free => self.free,
            PlanTier::Pro => self.pro,
            PlanTier::UltraPro => self.ultra_pro,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: i32,
    pub base_delay_minutes: i64,
    pub backoff_multiplier: i64,
    pub batch_size: i64,
    pub claim_timeout: Duration,
    pub interval: Duration,
    pub intake_url: String,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub concurrency: usize,
    /// `None` disables the periodic sync loop.
    pub interval: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub frontend_origin: String,
    pub bind_addr: String,
    pub supabase_jwt_secret: String,
    pub jwt_audience: String,
    pub service_api_key: String,
    pub sentry_dsn: Option<String>,
    pub stripe: StripeSettings,
    pub usage_limits: UsageLimits,
    pub retry: RetrySettings,
    pub sync: SyncSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let database_url = env.required("DATABASE_URL")?;
        let frontend_origin = env.required("FRONTEND_ORIGIN")?;
        let bind_addr = env
            .optional("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let supabase_jwt_secret = env.required("SUPABASE_JWT_SECRET")?;
        let jwt_audience = env
            .optional("SUPABASE_JWT_AUDIENCE")
            .unwrap_or_else(|| "authenticated".to_string());
        let service_api_key = env.required("SERVICE_API_KEY")?;
        let sentry_dsn = env.optional("SENTRY_DSN");

        let stripe = StripeSettings {
            secret_key: env.required("STRIPE_SECRET_KEY")?,
            webhook_secret: env.required("STRIPE_WEBHOOK_SECRET")?,
            pro_product_ids: parse_csv(env.optional("STRIPE_PRO_PRODUCT_IDS").as_deref()),
            ultra_pro_product_ids: parse_csv(
                env.optional("STRIPE_ULTRA_PRO_PRODUCT_IDS").as_deref(),
            ),
            request_timeout: Duration::from_secs(env.parsed_or("STRIPE_TIMEOUT_SECS", 20u64)?),
        };

        let defaults = UsageLimits::default();
        let usage_limits = UsageLimits {
            free: env.parsed_or("FREE_IMAGE_LIMIT", defaults.free)?,
            pro: env.parsed_or("PRO_IMAGE_LIMIT", defaults.pro)?,
            ultra_pro: env.parsed_or("ULTRA_PRO_IMAGE_LIMIT", defaults.ultra_pro)?,
        };

        let intake_url = env.optional("INTAKE_URL").unwrap_or_else(|| {
            let port = bind_addr.rsplit(':').next().unwrap_or("3000");
            format!("http://127.0.0.1:{port}/webhook-intake")
        });

        let retry = RetrySettings {
            max_attempts: env.parsed_or("RETRY_MAX_ATTEMPTS", 5)?,
            base_delay_minutes: env.parsed_or("RETRY_BASE_DELAY_MINUTES", 5)?,
            backoff_multiplier: env.parsed_or("RETRY_BACKOFF_MULTIPLIER", 3)?,
            batch_size: env.parsed_or("RETRY_BATCH_SIZE", 50)?,
            claim_timeout: Duration::from_secs(env.parsed_or("RETRY_CLAIM_TIMEOUT_SECS", 600u64)?),
            interval: Duration::from_secs(env.parsed_or("RETRY_INTERVAL_SECS", 60u64)?),
            intake_url,
            http_timeout: Duration::from_secs(env.parsed_or("HTTP_TIMEOUT_SECS", 30u64)?),
        };
        if retry.max_attempts < 1 {
            return Err(ConfigError::Invalid {
                name: "RETRY_MAX_ATTEMPTS",
                reason: "must be at least 1".into(),
            });
        }

        let concurrency: usize = env.parsed_or("SYNC_CONCURRENCY", 4)?;
        let sync_interval: u64 = env.parsed_or("SYNC_INTERVAL_SECS", 21_600)?;
        let sync = SyncSettings {
            concurrency: concurrency.max(1),
            interval: (sync_interval > 0).then(|| Duration::from_secs(sync_interval)),
        };

        Ok(Config {
            database_url,
            frontend_origin,
            bind_addr,
            supabase_jwt_secret,
            jwt_audience,
            service_api_key,
            sentry_dsn,
            stripe,
            usage_limits,
            retry,
            sync,
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            database_url: "postgres://localhost/test".into(),
            frontend_origin: "http://localhost:5173".into(),
            bind_addr: "127.0.0.1:3000".into(),
            supabase_jwt_secret: "0123456789abcdef0123456789abcdef".into(),
            jwt_audience: "authenticated".into(),
            service_api_key: "svc_test_key_0123456789".into(),
            sentry_dsn: None,
            stripe: StripeSettings {
                secret_key: "sk_live_unit".into(),
                webhook_secret: "whsec_unit".into(),
                pro_product_ids: parse_csv(Some("prod_pro")),
                ultra_pro_product_ids: parse_csv(Some("prod_ultra")),
                request_timeout: Duration::from_secs(5),
            },
            usage_limits: UsageLimits::default(),
            retry: RetrySettings {
                max_attempts: 5,
                base_delay_minutes: 5,
                backoff_multiplier: 3,
                batch_size: 50,
                claim_timeout: Duration::from_secs(600),
                interval: Duration::from_secs(60),
                intake_url: "http://127.0.0.1:3000/webhook-intake".into(),
                http_timeout: Duration::from_secs(5),
            },
            sync: SyncSettings {
                concurrency: 4,
                interval: None,
            },
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn parsed_or<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            None => Ok(default),
            Some(raw) => raw.parse::<T>().map_err(|err| ConfigError::Invalid {
                name,
                reason: err.to_string(),
            }),
        }
    }
}

pub fn parse_csv(raw: Option<&str>) -> HashSet<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
