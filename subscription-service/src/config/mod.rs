//! Configuration module for subscription-service.

use crate::models::{PlanCatalog, PlanType};
use rust_decimal::Decimal;
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreConfig,
    pub webhooks: WebhookConfig,
    pub plans: PlansConfig,
    pub pagarme_api: PagarmeApiConfig,
    pub engine: EngineConfig,
}

/// Which persistence backend to run against.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    Postgres(DatabaseConfig),
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub stripe_secret: Secret<String>,
    pub pagarme_secret: Secret<String>,
    pub stripe_tolerance_secs: i64,
}

#[derive(Debug, Clone)]
pub struct PlansConfig {
    pub monthly: PlanSettings,
    pub quarterly: PlanSettings,
    pub annual: PlanSettings,
}

#[derive(Debug, Clone)]
pub struct PlanSettings {
    pub amount: Decimal,
    pub provider_plan_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PagarmeApiConfig {
    pub base_url: String,
    pub api_key: Option<Secret<String>>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub provider_timeout: Duration,
    pub trial_days: i64,
    /// Zero disables the lapse sweep.
    pub sweep_interval: Duration,
}

impl PlansConfig {
    pub fn catalog(&self) -> PlanCatalog {
        PlanCatalog::new(
            (self.monthly.amount, self.monthly.provider_plan_id.clone()),
            (self.quarterly.amount, self.quarterly.provider_plan_id.clone()),
            (self.annual.amount, self.annual.provider_plan_id.clone()),
        )
    }
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            monthly: PlanSettings {
                amount: PlanType::Monthly.default_amount(),
                provider_plan_id: None,
            },
            quarterly: PlanSettings {
                amount: PlanType::Quarterly.default_amount(),
                provider_plan_id: None,
            },
            annual: PlanSettings {
                amount: PlanType::Annual.default_amount(),
                provider_plan_id: None,
            },
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_millis(1500),
            trial_days: 7,
            sweep_interval: Duration::ZERO,
        }
    }
}

/// Unset falls back to `default`; a value that does not parse is an error.
fn parse_or<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} is not a valid number: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}

fn plan_settings(prefix: &str, plan: PlanType) -> Result<PlanSettings, AppError> {
    let amount = match env::var(format!("PLAN_{}_AMOUNT", prefix)) {
        Ok(raw) => Decimal::from_str(&raw).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "PLAN_{}_AMOUNT is not a decimal: {}",
                prefix,
                e
            ))
        })?,
        Err(_) => plan.default_amount(),
    };

    Ok(PlanSettings {
        amount,
        provider_plan_id: env::var(format!("PLAN_{}_PROVIDER_ID", prefix)).ok(),
    })
}

impl SubscriptionConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let store = match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .as_str()
        {
            "memory" => StoreConfig::Memory,
            "postgres" => StoreConfig::Postgres(DatabaseConfig {
                url: Secret::new(env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?),
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_or("DATABASE_MIN_CONNECTIONS", 2)?,
            }),
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Unknown STORE_BACKEND '{}', expected postgres or memory",
                    other
                )))
            }
        };

        let stripe_secret = env::var("STRIPE_WEBHOOK_SECRET").map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("STRIPE_WEBHOOK_SECRET is required"))
        })?;
        let pagarme_secret = env::var("PAGARME_WEBHOOK_SECRET").map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("PAGARME_WEBHOOK_SECRET is required"))
        })?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "subscription-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            store,
            webhooks: WebhookConfig {
                stripe_secret: Secret::new(stripe_secret),
                pagarme_secret: Secret::new(pagarme_secret),
                stripe_tolerance_secs: parse_or("STRIPE_SIGNATURE_TOLERANCE_SECS", 300)?,
            },
            plans: PlansConfig {
                monthly: plan_settings("MONTHLY", PlanType::Monthly)?,
                quarterly: plan_settings("QUARTERLY", PlanType::Quarterly)?,
                annual: plan_settings("ANNUAL", PlanType::Annual)?,
            },
            pagarme_api: PagarmeApiConfig {
                base_url: env::var("PAGARME_API_URL")
                    .unwrap_or_else(|_| "https://api.pagar.me/core/v5".to_string()),
                api_key: env::var("PAGARME_API_KEY").ok().map(Secret::new),
            },
            engine: EngineConfig {
                provider_timeout: Duration::from_millis(parse_or("PROVIDER_TIMEOUT_MS", 1500)?),
                trial_days: parse_or("TRIAL_DAYS", 7)?,
                sweep_interval: Duration::from_secs(parse_or("SWEEP_INTERVAL_SECS", 0)?),
            },
        })
    }
}
