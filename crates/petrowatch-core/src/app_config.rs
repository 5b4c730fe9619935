use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub log_level: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    /// Root of the upstream catalog API, without a trailing slash.
    pub api_base_url: String,
    pub http_timeout_secs: u64,
    pub http_user_agent: String,
    pub max_concurrent_requests: usize,
    pub min_request_spacing_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_multiplier: f64,
    pub retry_max_delay_ms: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_success_threshold: u32,
    pub breaker_cooldown_secs: u64,
    /// Price differences at or below this value are treated as unchanged.
    pub price_epsilon: Decimal,
    /// Cap on the number of error entries reported in the webhook payload.
    pub max_reported_errors: usize,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_max_attempts: u32,
    pub webhook_backoff_base_ms: u64,
    pub webhook_timeout_secs: u64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("api_base_url", &self.api_base_url)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("http_user_agent", &self.http_user_agent)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("min_request_spacing_ms", &self.min_request_spacing_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("retry_multiplier", &self.retry_multiplier)
            .field("retry_max_delay_ms", &self.retry_max_delay_ms)
            .field("breaker_failure_threshold", &self.breaker_failure_threshold)
            .field("breaker_success_threshold", &self.breaker_success_threshold)
            .field("breaker_cooldown_secs", &self.breaker_cooldown_secs)
            .field("price_epsilon", &self.price_epsilon)
            .field("max_reported_errors", &self.max_reported_errors)
            .field("webhook_url", &self.webhook_url)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[redacted]"),
            )
            .field("webhook_max_attempts", &self.webhook_max_attempts)
            .field("webhook_backoff_base_ms", &self.webhook_backoff_base_ms)
            .field("webhook_timeout_secs", &self.webhook_timeout_secs)
            .finish()
    }
}
