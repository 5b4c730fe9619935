//! Offline tests for petrowatch-db pool configuration and row types.
//! These tests do not require a live database connection.

use chrono::Utc;
use petrowatch_core::{AppConfig, Environment};
use petrowatch_db::{IngestionRunRow, PoolConfig, PriceHistoryRow, StationRow};
use rust_decimal::Decimal;
use uuid::Uuid;

fn app_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://example".to_string(),
        env: Environment::Test,
        log_level: "info".to_string(),
        db_max_connections: 42,
        db_min_connections: 7,
        db_acquire_timeout_secs: 9,
        api_base_url: "https://api.example.test/v1".to_string(),
        http_timeout_secs: 30,
        http_user_agent: "ua".to_string(),
        max_concurrent_requests: 4,
        min_request_spacing_ms: 100,
        max_retries: 3,
        retry_base_delay_ms: 1_000,
        retry_multiplier: 2.0,
        retry_max_delay_ms: 30_000,
        breaker_failure_threshold: 5,
        breaker_success_threshold: 2,
        breaker_cooldown_secs: 60,
        price_epsilon: Decimal::new(1, 3),
        max_reported_errors: 50,
        webhook_url: None,
        webhook_secret: None,
        webhook_max_attempts: 3,
        webhook_backoff_base_ms: 1_000,
        webhook_timeout_secs: 10,
    }
}

#[test]
fn pool_config_from_app_config_uses_core_values() {
    let pool_config = PoolConfig::from_app_config(&app_config());
    assert_eq!(
        pool_config,
        PoolConfig {
            max_connections: 42,
            min_connections: 7,
            acquire_timeout_secs: 9,
        }
    );
}

/// Compile-time smoke test for the `ingestion_runs` row shape.
#[test]
fn ingestion_run_row_has_expected_fields() {
    let row = IngestionRunRow {
        id: 1_i64,
        public_id: Uuid::new_v4(),
        trigger_source: "cli".to_string(),
        status: "running".to_string(),
        dry_run: false,
        started_at: Utc::now(),
        completed_at: None,
        statistics: serde_json::json!({}),
        error_message: None,
        created_at: Utc::now(),
    };

    assert_eq!(row.status, "running");
    assert!(row.completed_at.is_none());
    assert!(row.statistics.as_object().is_some_and(serde_json::Map::is_empty));
}

#[test]
fn station_and_history_rows_have_expected_fields() {
    let station = StationRow {
        id: "PL/101/EXP/ES/2015".to_string(),
        name: "Servicio Azcapotzalco".to_string(),
        brand: Some("PEMEX".to_string()),
        address: None,
        estado_id: "09".to_string(),
        municipio_id: "002".to_string(),
        latitude: Some(19.48),
        longitude: Some(-99.18),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let history = PriceHistoryRow {
        id: 7,
        station_id: station.id.clone(),
        fuel_type: "regular".to_string(),
        price: Decimal::new(2249, 2),
        previous_price: None,
        change_kind: "new_price".to_string(),
        recorded_at: Utc::now(),
    };

    assert_eq!(history.station_id, station.id);
    assert_eq!(history.change_kind, "new_price");
}
