//! Service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_URL` - `PostgreSQL` connection string
//! - `PAYMENT_GATEWAY_SECRET` - key used to verify gateway payment signatures
//!
//! ## Optional
//! - `PORT` - listen port (default: 8083)
//! - `NATS_URL` - event broker; events are only logged when unset
//! - `DATABASE_MAX_CONNECTIONS` - pool size (default: 10)
//! - `WALLET_BALANCE_CEILING` - maximum wallet balance (default: 100000)
//! - `REFERRAL_BONUS` - amount credited to a referrer (default: 100)
//! - `UNPAID_ORDER_TTL_MINUTES` - age after which unpaid items are released (default: 30)

use chrono::Duration;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_WALLET_CEILING: i64 = 100_000;
pub const DEFAULT_REFERRAL_BONUS: i64 = 100;
pub const DEFAULT_UNPAID_TTL_MINUTES: i64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Settings the order engine needs at runtime.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub wallet_ceiling: Decimal,
    pub referral_bonus: Decimal,
    pub gateway_secret: String,
    pub unpaid_order_ttl: Duration,
}

impl EngineConfig {
    pub fn new(gateway_secret: impl Into<String>) -> Self {
        Self {
            wallet_ceiling: Decimal::from(DEFAULT_WALLET_CEILING),
            referral_bonus: Decimal::from(DEFAULT_REFERRAL_BONUS),
            gateway_secret: gateway_secret.into(),
            unpaid_order_ttl: Duration::minutes(DEFAULT_UNPAID_TTL_MINUTES),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub port: u16,
    pub nats_url: Option<String>,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut engine = EngineConfig::new(required("PAYMENT_GATEWAY_SECRET")?);
        engine.wallet_ceiling = optional("WALLET_BALANCE_CEILING", engine.wallet_ceiling)?;
        engine.referral_bonus = optional("REFERRAL_BONUS", engine.referral_bonus)?;
        engine.unpaid_order_ttl = Duration::minutes(optional("UNPAID_ORDER_TTL_MINUTES", DEFAULT_UNPAID_TTL_MINUTES)?);
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            database_max_connections: optional("DATABASE_MAX_CONNECTIONS", 10)?,
            port: optional("PORT", 8083)?,
            nats_url: std::env::var("NATS_URL").ok().filter(|v| !v.is_empty()),
            engine,
        })
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn optional<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => raw.parse().map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let c = EngineConfig::new("secret");
        assert_eq!(c.wallet_ceiling, Decimal::new(100_000, 0));
        assert_eq!(c.referral_bonus, Decimal::new(100, 0));
        assert_eq!(c.unpaid_order_ttl, Duration::minutes(30));
    }

    #[test]
    fn test_optional_defaults_when_unset() {
        let port = optional::<u16>("STOREFRONT_ORDERS_TEST_UNSET_PORT", 8083).unwrap();
        assert_eq!(port, 8083);
    }
}
