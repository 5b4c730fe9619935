//! `ingest` command: wires the pipeline from `AppConfig` and records the run
//! in `ingestion_runs`.

use std::time::Duration;

use petrowatch_core::AppConfig;
use petrowatch_db::PgPriceStore;
use petrowatch_http::{
    CircuitBreaker, CircuitBreakerConfig, HttpClientConfig, ResilientHttpClient, RetryPolicy,
};
use petrowatch_ingest::{
    build_payload, CatalogClient, ChangeDetector, Orchestrator, OrchestratorConfig, RunReport,
    RunStatus, StopSignal, WebhookConfig, WebhookNotifier,
};

pub(crate) fn http_config(config: &AppConfig) -> HttpClientConfig {
    HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: config.http_user_agent.clone(),
        max_concurrent: config.max_concurrent_requests,
        min_request_spacing: Duration::from_millis(config.min_request_spacing_ms),
        retry: RetryPolicy {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            multiplier: config.retry_multiplier,
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        },
    }
}

pub(crate) fn breaker_config(config: &AppConfig) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: config.breaker_failure_threshold,
        success_threshold: config.breaker_success_threshold,
        cooldown: Duration::from_secs(config.breaker_cooldown_secs),
    }
}

pub(crate) fn webhook_config(config: &AppConfig) -> WebhookConfig {
    WebhookConfig {
        url: config.webhook_url.clone(),
        secret: config.webhook_secret.clone(),
        max_attempts: config.webhook_max_attempts,
        backoff_base: Duration::from_millis(config.webhook_backoff_base_ms),
        timeout: Duration::from_secs(config.webhook_timeout_secs),
        user_agent: config.http_user_agent.clone(),
    }
}

pub(crate) fn orchestrator_config(config: &AppConfig, dry_run: bool) -> OrchestratorConfig {
    OrchestratorConfig {
        max_reported_errors: config.max_reported_errors,
        dry_run,
        subregion_concurrency: config.max_concurrent_requests,
    }
}

fn build_orchestrator(
    config: &AppConfig,
    store: PgPriceStore,
    dry_run: bool,
) -> anyhow::Result<Orchestrator<PgPriceStore>> {
    let http = ResilientHttpClient::new(http_config(config))?;
    let breaker = CircuitBreaker::new("catalog-api", breaker_config(config));
    let catalog = CatalogClient::new(&config.api_base_url, http, breaker);
    let notifier = WebhookNotifier::new(webhook_config(config))?;
    if !notifier.is_configured() {
        tracing::warn!(
            "PETROWATCH_WEBHOOK_URL or PETROWATCH_WEBHOOK_SECRET unset, notifications disabled"
        );
    }

    Ok(Orchestrator::new(
        catalog,
        ChangeDetector::new(config.price_epsilon),
        notifier,
        store,
        orchestrator_config(config, dry_run),
    ))
}

/// Runs one ingestion and records it in `ingestion_runs`.
///
/// # Errors
///
/// Returns an error if the run could not be recorded, aborted, or was
/// stopped before completing, so the process exits non-zero.
pub(crate) async fn run_ingest(
    pool: &sqlx::PgPool,
    config: &AppConfig,
    dry_run: bool,
) -> anyhow::Result<()> {
    let run = petrowatch_db::create_ingestion_run(pool, "cli", dry_run).await?;

    let store = PgPriceStore::new(pool.clone());
    let mut orchestrator = match build_orchestrator(config, store, dry_run) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            fail_run_best_effort(pool, run.id, format!("{e:#}"), None).await;
            return Err(e);
        }
    };

    let stop = orchestrator.stop_signal();
    let signal_listener = tokio::spawn(stop_on_signal(stop));
    let result = orchestrator.run().await;
    signal_listener.abort();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            fail_run_best_effort(pool, run.id, format!("{e:#}"), None).await;
            return Err(e.into());
        }
    };

    let statistics = statistics_json(&report)?;
    if report.status == RunStatus::Failed {
        let message = "run stopped before completion".to_owned();
        fail_run_best_effort(pool, run.id, message, Some(&statistics)).await;
        anyhow::bail!("ingestion run {} stopped before completion", run.public_id);
    }

    petrowatch_db::complete_ingestion_run(pool, run.id, &statistics).await?;
    println!(
        "ingestion {}: {} estados, {} municipios, {} stations, {} price changes ({} new, {} changed), {} new stations, {} errors{}",
        run.public_id,
        report.statistics.regions_processed,
        report.statistics.subregions_processed,
        report.statistics.stations_seen,
        report.statistics.price_changes,
        report.changes.new_prices,
        report.changes.changed_prices,
        report.statistics.new_stations,
        report.statistics.error_count,
        if dry_run { " (dry run)" } else { "" },
    );
    Ok(())
}

/// The webhook payload plus counters that only matter operationally.
pub(crate) fn statistics_json(report: &RunReport) -> anyhow::Result<serde_json::Value> {
    let payload = build_payload(
        report.started_at,
        report.completed_at,
        report.status,
        &report.statistics,
        report.statistics.errors(),
    );
    let mut value = serde_json::to_value(&payload)?;
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "skipped_rows".to_owned(),
            serde_json::json!(report.statistics.skipped_rows),
        );
        object.insert(
            "unchanged_prices".to_owned(),
            serde_json::json!(report.changes.unchanged_prices),
        );
        object.insert(
            "unreported_errors".to_owned(),
            serde_json::json!(report.statistics.dropped_errors()),
        );
    }
    Ok(value)
}

async fn fail_run_best_effort(
    pool: &sqlx::PgPool,
    run_id: i64,
    message: String,
    statistics: Option<&serde_json::Value>,
) {
    if let Err(mark_err) =
        petrowatch_db::fail_ingestion_run(pool, run_id, &message, statistics).await
    {
        tracing::error!(run_id, error = %mark_err, "failed to mark ingestion run as failed");
    }
}

/// Trips `stop` on Ctrl-C or SIGTERM.
async fn stop_on_signal(stop: StopSignal) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, finishing in-flight requests");
    stop.request_stop();
}
