//! One ingestion run, end to end.
//!
//! Sequence: load baseline, fetch estados, fetch municipios per estado, fetch
//! prices per municipio, detect changes, persist, notify. The webhook is sent
//! exactly once, after everything else, whatever the outcome.
//!
//! A failed municipios or prices fetch is recorded and skipped. Failing to
//! load the baseline, list the estados, or persist the change set fails the
//! whole run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use petrowatch_core::{ParsedStation, PriceStore, StationRecord};

use crate::catalog::{CatalogClient, Estado, Municipio};
use crate::detector::{ChangeDetector, ChangeStats};
use crate::error::IngestError;
use crate::parse::parse_station_prices;
use crate::stats::{RunStatistics, RunStatus};
use crate::webhook::{build_payload, Delivery, WebhookNotifier};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Retained error details in the webhook payload.
    pub max_reported_errors: usize,
    /// Detect changes without writing them.
    pub dry_run: bool,
    /// Municipio fetches driven at once within an estado.
    pub subregion_concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_reported_errors: 50,
            dry_run: false,
            subregion_concurrency: 10,
        }
    }
}

/// Cooperative cancellation flag shared between the signal handler and a run.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        if !self.0.swap(true, Ordering::SeqCst) {
            tracing::info!("stop requested, no new fetches will be scheduled");
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub statistics: RunStatistics,
    pub changes: ChangeStats,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// `None` when the webhook failed; the failure is logged.
    pub delivery: Option<Delivery>,
}

pub struct Orchestrator<S> {
    catalog: CatalogClient,
    detector: ChangeDetector,
    notifier: WebhookNotifier,
    store: S,
    config: OrchestratorConfig,
    stop: StopSignal,
}

impl<S: PriceStore> Orchestrator<S> {
    pub fn new(
        catalog: CatalogClient,
        detector: ChangeDetector,
        notifier: WebhookNotifier,
        store: S,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            catalog,
            detector,
            notifier,
            store,
            config,
            stop: StopSignal::new(),
        }
    }

    #[must_use]
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Executes one run and sends its completion webhook.
    ///
    /// A cancelled run still detects and persists what it fetched, and
    /// reports [`RunStatus::Failed`].
    ///
    /// # Errors
    ///
    /// Returns the [`IngestError`] that aborted the run. The failed webhook
    /// has already been sent by then.
    pub async fn run(&mut self) -> Result<RunReport, IngestError> {
        let started_at = Utc::now();
        let mut stats = RunStatistics::new(self.config.max_reported_errors);
        tracing::info!(dry_run = self.config.dry_run, "ingestion run started");

        let outcome = self.execute(&mut stats).await;
        let cancelled = self.stop.is_stopped();
        if cancelled {
            stats.record_error("run", "cancelled", "run stopped before all municipios were fetched");
        }
        if let Err(err) = &outcome {
            tracing::error!(category = err.category(), error = %err, "ingestion run failed");
            stats.record_error("run", err.category(), err.to_string());
        }

        let status = if outcome.is_ok() && !cancelled {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        let completed_at = Utc::now();

        let payload = build_payload(started_at, completed_at, status, &stats, stats.errors());
        let delivery = match self.notifier.send_completion_webhook(&payload).await {
            Ok(delivery) => Some(delivery),
            Err(err) => {
                tracing::error!(error = %err, "completion webhook not delivered");
                None
            }
        };

        let changes = outcome?;
        tracing::info!(
            %status,
            estados = stats.regions_processed,
            municipios = stats.subregions_processed,
            stations = stats.stations_seen,
            price_changes = stats.price_changes,
            new_stations = stats.new_stations,
            errors = stats.error_count,
            unreported_errors = stats.dropped_errors(),
            requests = self.catalog.http().stats().submitted_count,
            elapsed_ms = (completed_at - started_at).num_milliseconds(),
            "ingestion run finished"
        );
        Ok(RunReport {
            status,
            statistics: stats,
            changes,
            started_at,
            completed_at,
            delivery,
        })
    }

    async fn execute(&mut self, stats: &mut RunStatistics) -> Result<ChangeStats, IngestError> {
        self.detector.load_existing_data(&self.store).await?;

        let estados = self.catalog.fetch_estados().await?;
        tracing::info!(count = estados.len(), "estados fetched");

        let mut parsed: Vec<ParsedStation> = Vec::new();
        for estado in &estados {
            if self.stop.is_stopped() {
                break;
            }
            let municipios = match self.catalog.fetch_municipios(&estado.id).await {
                Ok(municipios) => municipios,
                Err(err) => {
                    tracing::warn!(
                        estado_id = %estado.id,
                        category = err.category(),
                        error = %err,
                        "municipios fetch failed, skipping estado"
                    );
                    stats.record_error(
                        format!("estado {}", estado.id),
                        err.category(),
                        err.to_string(),
                    );
                    continue;
                }
            };
            stats.regions_processed += 1;
            self.collect_estado(estado, municipios, stats, &mut parsed)
                .await;
        }

        let changes = self.detector.detect_changes(&parsed)?;
        stats.price_changes = changes.price_changes.len() as u64;
        stats.new_stations = changes.stats.new_stations;

        if self.config.dry_run {
            tracing::info!(
                stations = parsed.len(),
                price_changes = changes.price_changes.len(),
                "dry run, skipping persistence"
            );
            return Ok(changes.stats);
        }

        let stations: Vec<StationRecord> = changes.all_stations().cloned().collect();
        let written_stations = self
            .store
            .upsert_stations(&stations)
            .await
            .map_err(|e| IngestError::Persistence {
                operation: "upsert_stations",
                source: Box::new(e),
            })?;
        let written_prices = self
            .store
            .insert_price_changes(&changes.price_changes)
            .await
            .map_err(|e| IngestError::Persistence {
                operation: "insert_price_changes",
                source: Box::new(e),
            })?;
        tracing::info!(written_stations, written_prices, "change set persisted");

        Ok(changes.stats)
    }

    /// Fetches and parses every municipio of one estado. Failures are
    /// recorded and the municipio is skipped.
    async fn collect_estado(
        &self,
        estado: &Estado,
        municipios: Vec<Municipio>,
        stats: &mut RunStatistics,
        parsed: &mut Vec<ParsedStation>,
    ) {
        let catalog = &self.catalog;
        let stop = &self.stop;
        let results: Vec<_> = stream::iter(municipios)
            .map(|municipio| async move {
                // Checked when the fetch is about to start, not when queued.
                if stop.is_stopped() {
                    return (municipio, None);
                }
                let result = catalog
                    .fetch_station_prices(&estado.id, &municipio.id)
                    .await;
                (municipio, Some(result))
            })
            .buffer_unordered(self.config.subregion_concurrency.max(1))
            .collect()
            .await;

        for (municipio, result) in results {
            match result {
                Some(Ok(rows)) => {
                    let outcome = parse_station_prices(&estado.id, &municipio.id, rows);
                    stats.subregions_processed += 1;
                    stats.stations_seen += outcome.stations.len() as u64;
                    stats.skipped_rows += outcome.skipped_rows as u64;
                    parsed.extend(outcome.stations);
                }
                Some(Err(err)) => {
                    tracing::warn!(
                        estado_id = %estado.id,
                        municipio_id = %municipio.id,
                        category = err.category(),
                        error = %err,
                        "prices fetch failed, skipping municipio"
                    );
                    stats.record_error(
                        format!("municipio {}/{}", estado.id, municipio.id),
                        err.category(),
                        err.to_string(),
                    );
                }
                None => {
                    tracing::debug!(
                        estado_id = %estado.id,
                        municipio_id = %municipio.id,
                        "municipio not fetched, run stopping"
                    );
                }
            }
        }
    }
}
