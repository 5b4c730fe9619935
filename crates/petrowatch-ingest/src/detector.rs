//! Classifies a run's parsed stations against the last known prices.
//!
//! The detector never writes anywhere. It loads a baseline once per run
//! through [`PriceStore::all_last_prices`] and then answers, for every
//! incoming price, whether it is new, changed beyond `epsilon`, or unchanged.

use std::collections::{HashMap, HashSet};

use petrowatch_core::{
    LastKnownPrice, ParsedPrice, ParsedStation, PriceChange, PriceChangeKind, PriceKey,
    PriceStore, StationRecord,
};
use rust_decimal::Decimal;

use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceClassification {
    NewPrice,
    ChangedPrice,
    UnchangedPrice,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeStats {
    pub new_prices: u64,
    pub changed_prices: u64,
    pub unchanged_prices: u64,
    pub new_stations: u64,
    pub updated_stations: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Stations absent from the baseline.
    pub new_stations: Vec<StationRecord>,
    /// Stations with at least one baseline price.
    pub updated_stations: Vec<StationRecord>,
    /// New and changed prices, in input order. Unchanged prices are only counted.
    pub price_changes: Vec<PriceChange>,
    pub stats: ChangeStats,
}

impl ChangeSet {
    /// Every station in the batch, new ones first.
    pub fn all_stations(&self) -> impl Iterator<Item = &StationRecord> {
        self.new_stations.iter().chain(self.updated_stations.iter())
    }
}

#[derive(Debug)]
pub struct ChangeDetector {
    epsilon: Decimal,
    baseline: HashMap<PriceKey, LastKnownPrice>,
    known_stations: HashSet<String>,
    loaded: bool,
}

impl ChangeDetector {
    #[must_use]
    pub fn new(epsilon: Decimal) -> Self {
        Self {
            epsilon,
            baseline: HashMap::new(),
            known_stations: HashSet::new(),
            loaded: false,
        }
    }

    #[must_use]
    pub fn epsilon(&self) -> Decimal {
        self.epsilon
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Replaces the in-memory baseline with the store's last known prices.
    /// Returns the number of price series loaded.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::BaselineLoad`] if the store call fails. The
    /// detector is left unloaded in that case.
    pub async fn load_existing_data<S: PriceStore>(
        &mut self,
        store: &S,
    ) -> Result<usize, IngestError> {
        self.reset();
        let prices = store
            .all_last_prices()
            .await
            .map_err(|e| IngestError::BaselineLoad {
                source: Box::new(e),
            })?;

        for price in prices {
            self.known_stations.insert(price.station_id.clone());
            self.baseline.insert(price.key(), price);
        }
        self.loaded = true;

        tracing::info!(
            prices = self.baseline.len(),
            stations = self.known_stations.len(),
            "price baseline loaded"
        );
        Ok(self.baseline.len())
    }

    /// Classifies `stations` against the loaded baseline.
    ///
    /// A station or price key repeated within the batch is classified once,
    /// on its first occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::BaselineNotLoaded`] if
    /// [`Self::load_existing_data`] has not succeeded since the last reset.
    pub fn detect_changes(&self, stations: &[ParsedStation]) -> Result<ChangeSet, IngestError> {
        if !self.loaded {
            return Err(IngestError::BaselineNotLoaded);
        }

        let mut set = ChangeSet::default();
        let mut seen_stations: HashSet<&str> = HashSet::new();
        let mut seen_keys: HashSet<PriceKey> = HashSet::new();

        for parsed in stations {
            let station = &parsed.station;
            if !seen_stations.insert(station.id.as_str()) {
                tracing::debug!(station_id = %station.id, "duplicate station in batch ignored");
                continue;
            }

            if self.known_stations.contains(&station.id) {
                set.updated_stations.push(station.clone());
                set.stats.updated_stations += 1;
            } else {
                set.new_stations.push(station.clone());
                set.stats.new_stations += 1;
            }

            for price in &parsed.prices {
                if !seen_keys.insert(price.key()) {
                    tracing::debug!(key = %price.key(), "duplicate price in batch ignored");
                    continue;
                }
                match self.classify(price) {
                    PriceClassification::NewPrice => {
                        set.stats.new_prices += 1;
                        set.price_changes
                            .push(to_change(price, None, PriceChangeKind::NewPrice));
                    }
                    PriceClassification::ChangedPrice => {
                        set.stats.changed_prices += 1;
                        let previous = self.last_price(price).map(|p| p.price);
                        set.price_changes
                            .push(to_change(price, previous, PriceChangeKind::ChangedPrice));
                    }
                    PriceClassification::UnchangedPrice => set.stats.unchanged_prices += 1,
                }
            }
        }

        tracing::info!(
            new_prices = set.stats.new_prices,
            changed_prices = set.stats.changed_prices,
            unchanged_prices = set.stats.unchanged_prices,
            new_stations = set.stats.new_stations,
            updated_stations = set.stats.updated_stations,
            "change detection complete"
        );
        Ok(set)
    }

    /// New if no baseline entry exists; changed if the difference exceeds
    /// `epsilon`; otherwise unchanged.
    #[must_use]
    pub fn classify(&self, price: &ParsedPrice) -> PriceClassification {
        match self.last_price(price) {
            None => PriceClassification::NewPrice,
            Some(last) if (price.price - last.price).abs() > self.epsilon => {
                PriceClassification::ChangedPrice
            }
            Some(_) => PriceClassification::UnchangedPrice,
        }
    }

    /// `true` when `price` would be written to history.
    #[must_use]
    pub fn is_price_changed(&self, price: &ParsedPrice) -> bool {
        self.classify(price) != PriceClassification::UnchangedPrice
    }

    #[must_use]
    pub fn has_existing_price(&self, price: &ParsedPrice) -> bool {
        self.baseline.contains_key(&price.key())
    }

    #[must_use]
    pub fn last_price(&self, price: &ParsedPrice) -> Option<&LastKnownPrice> {
        self.baseline.get(&price.key())
    }

    /// Drops the baseline. [`Self::detect_changes`] fails until the next load.
    pub fn reset(&mut self) {
        self.baseline.clear();
        self.known_stations.clear();
        self.loaded = false;
    }
}

fn to_change(
    price: &ParsedPrice,
    previous_price: Option<Decimal>,
    kind: PriceChangeKind,
) -> PriceChange {
    PriceChange {
        station_id: price.station_id.clone(),
        fuel_type: price.fuel_type,
        price: price.price,
        previous_price,
        kind,
    }
}
