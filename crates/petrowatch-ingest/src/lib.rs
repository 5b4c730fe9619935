//! Fuel-price ingestion: catalog discovery, change detection, and signed
//! run-completion webhooks.

pub mod catalog;
pub mod detector;
pub mod error;
pub mod orchestrator;
pub mod parse;
pub mod stats;
pub mod webhook;

pub use catalog::{CatalogClient, Estado, Municipio, RawStationPrice};
pub use detector::{ChangeDetector, ChangeSet, ChangeStats, PriceClassification};
pub use error::IngestError;
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunReport, StopSignal};
pub use parse::{parse_station_prices, ParseOutcome};
pub use stats::{ErrorDetail, RunStatistics, RunStatus};
pub use webhook::{
    build_payload, sign_payload, verify_signature, Delivery, WebhookConfig, WebhookError,
    WebhookNotifier, WebhookPayload, WebhookStatistics,
};
