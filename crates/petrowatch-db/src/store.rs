use petrowatch_core::{LastKnownPrice, PriceChange, PriceStore, StationRecord};
use sqlx::PgPool;

use crate::DbError;

/// [`PriceStore`] backed by the Postgres schema in `migrations/`.
#[derive(Debug, Clone)]
pub struct PgPriceStore {
    pool: PgPool,
}

impl PgPriceStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl PriceStore for PgPriceStore {
    type Error = DbError;

    async fn all_last_prices(&self) -> Result<Vec<LastKnownPrice>, DbError> {
        crate::prices::all_last_prices(&self.pool).await
    }

    async fn upsert_stations(&self, stations: &[StationRecord]) -> Result<u64, DbError> {
        crate::stations::upsert_stations(&self.pool, stations).await
    }

    async fn insert_price_changes(&self, changes: &[PriceChange]) -> Result<u64, DbError> {
        crate::prices::insert_price_changes(&self.pool, changes).await
    }
}
