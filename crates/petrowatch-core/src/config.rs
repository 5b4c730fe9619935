use std::str::FromStr;

use rust_decimal::Decimal;

use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Parsing and validation are decoupled from the real environment so tests can
/// drive this with a plain `HashMap`.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let optional = |var: &str| -> Option<String> {
        lookup(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let database_url = require("DATABASE_URL")?;
    let api_base_url = parse_base_url("PETROWATCH_API_BASE_URL", &require("PETROWATCH_API_BASE_URL")?)?;

    let env = parse_environment(&or_default("PETROWATCH_ENV", "development"))?;
    let log_level = or_default("PETROWATCH_LOG_LEVEL", "info");

    let db_max_connections = parse_or(&lookup, "PETROWATCH_DB_MAX_CONNECTIONS", 10u32)?;
    let db_min_connections = parse_or(&lookup, "PETROWATCH_DB_MIN_CONNECTIONS", 1u32)?;
    let db_acquire_timeout_secs = parse_or(&lookup, "PETROWATCH_DB_ACQUIRE_TIMEOUT_SECS", 10u64)?;

    let http_timeout_secs = parse_or(&lookup, "PETROWATCH_HTTP_TIMEOUT_SECS", 30u64)?;
    let http_user_agent = or_default(
        "PETROWATCH_HTTP_USER_AGENT",
        "petrowatch/0.1 (fuel-price-ingestion)",
    );
    let max_concurrent_requests = at_least_one(
        "PETROWATCH_MAX_CONCURRENT_REQUESTS",
        parse_or(&lookup, "PETROWATCH_MAX_CONCURRENT_REQUESTS", 10usize)?,
    )?;
    let min_request_spacing_ms = parse_or(&lookup, "PETROWATCH_MIN_REQUEST_SPACING_MS", 100u64)?;
    let max_retries = parse_or(&lookup, "PETROWATCH_MAX_RETRIES", 3u32)?;
    let retry_base_delay_ms = parse_or(&lookup, "PETROWATCH_RETRY_BASE_DELAY_MS", 1_000u64)?;
    let retry_multiplier = parse_or(&lookup, "PETROWATCH_RETRY_MULTIPLIER", 2.0f64)?;
    if !retry_multiplier.is_finite() || retry_multiplier < 1.0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "PETROWATCH_RETRY_MULTIPLIER".to_string(),
            reason: format!("must be a finite number >= 1.0, got {retry_multiplier}"),
        });
    }
    let retry_max_delay_ms = parse_or(&lookup, "PETROWATCH_RETRY_MAX_DELAY_MS", 30_000u64)?;

    let breaker_failure_threshold = at_least_one(
        "PETROWATCH_BREAKER_FAILURE_THRESHOLD",
        parse_or(&lookup, "PETROWATCH_BREAKER_FAILURE_THRESHOLD", 5u32)?,
    )?;
    let breaker_success_threshold = at_least_one(
        "PETROWATCH_BREAKER_SUCCESS_THRESHOLD",
        parse_or(&lookup, "PETROWATCH_BREAKER_SUCCESS_THRESHOLD", 2u32)?,
    )?;
    let breaker_cooldown_secs = parse_or(&lookup, "PETROWATCH_BREAKER_COOLDOWN_SECS", 60u64)?;

    let price_epsilon = parse_or(&lookup, "PETROWATCH_PRICE_EPSILON", Decimal::new(1, 3))?;
    if price_epsilon.is_sign_negative() {
        return Err(ConfigError::InvalidEnvVar {
            var: "PETROWATCH_PRICE_EPSILON".to_string(),
            reason: format!("must not be negative, got {price_epsilon}"),
        });
    }
    let max_reported_errors = parse_or(&lookup, "PETROWATCH_MAX_REPORTED_ERRORS", 50usize)?;

    let webhook_url = match optional("PETROWATCH_WEBHOOK_URL") {
        Some(raw) => Some(parse_base_url("PETROWATCH_WEBHOOK_URL", &raw)?),
        None => None,
    };
    let webhook_secret = optional("PETROWATCH_WEBHOOK_SECRET");
    let webhook_max_attempts = at_least_one(
        "PETROWATCH_WEBHOOK_MAX_ATTEMPTS",
        parse_or(&lookup, "PETROWATCH_WEBHOOK_MAX_ATTEMPTS", 3u32)?,
    )?;
    let webhook_backoff_base_ms = parse_or(&lookup, "PETROWATCH_WEBHOOK_BACKOFF_BASE_MS", 1_000u64)?;
    let webhook_timeout_secs = parse_or(&lookup, "PETROWATCH_WEBHOOK_TIMEOUT_SECS", 10u64)?;

    Ok(AppConfig {
        database_url,
        env,
        log_level,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        api_base_url,
        http_timeout_secs,
        http_user_agent,
        max_concurrent_requests,
        min_request_spacing_ms,
        max_retries,
        retry_base_delay_ms,
        retry_multiplier,
        retry_max_delay_ms,
        breaker_failure_threshold,
        breaker_success_threshold,
        breaker_cooldown_secs,
        price_epsilon,
        max_reported_errors,
        webhook_url,
        webhook_secret,
        webhook_max_attempts,
        webhook_backoff_base_ms,
        webhook_timeout_secs,
    })
}

/// Parse `var` with `FromStr`, falling back to `default` when it is unset.
fn parse_or<T, F>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    match lookup(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(default),
    }
}

fn at_least_one<T>(var: &str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + From<u8> + std::fmt::Display,
{
    if value < T::from(1) {
        return Err(ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: format!("must be at least 1, got {value}"),
        });
    }
    Ok(value)
}

/// Validate an absolute http(s) URL and strip any trailing slash.
fn parse_base_url(var: &str, raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = reqwest::Url::parse(trimmed).map_err(|e| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: format!("unsupported scheme \"{}\"", url.scheme()),
        });
    }
    Ok(trimmed.to_string())
}

/// Parse a string into an `Environment` variant.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnvVar` for values other than
/// `development`, `test`, or `production`.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "PETROWATCH_ENV".to_string(),
            reason: format!("unknown environment \"{other}\""),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
