//! Persistence seam for the ingestion pipeline.

use std::future::Future;

use crate::stations::{LastKnownPrice, PriceChange, StationRecord};

/// Storage the pipeline reads its baseline from and writes change sets to.
///
/// Implementations own their own retry behaviour; callers treat every method
/// as a fallible remote call.
pub trait PriceStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the latest known price for every `(station, fuel)` pair.
    fn all_last_prices(&self) -> impl Future<Output = Result<Vec<LastKnownPrice>, Self::Error>>;

    /// Inserts or refreshes station identity rows. Returns the number of rows written.
    fn upsert_stations(
        &self,
        stations: &[StationRecord],
    ) -> impl Future<Output = Result<u64, Self::Error>>;

    /// Records new and changed prices. Returns the number of history rows written.
    fn insert_price_changes(
        &self,
        changes: &[PriceChange],
    ) -> impl Future<Output = Result<u64, Self::Error>>;
}
