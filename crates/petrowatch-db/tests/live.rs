//! Live tests using `#[sqlx::test]`. Each test gets a fresh, migrated
//! database from the harness, so they need `DATABASE_URL` pointing at a
//! Postgres server:
//!
//! ```text
//! cargo test -p petrowatch-db --test live -- --ignored
//! ```

use petrowatch_core::{
    FuelType, PriceChange, PriceChangeKind, PriceStore, StationRecord,
};
use petrowatch_db::{
    complete_ingestion_run, create_ingestion_run, fail_ingestion_run, get_ingestion_run,
    get_station, list_ingestion_runs, list_price_history, ping, DbError, PgPriceStore,
};
use rust_decimal::Decimal;

fn station(id: &str, name: &str) -> StationRecord {
    StationRecord {
        id: id.to_string(),
        name: name.to_string(),
        brand: Some("PEMEX".to_string()),
        address: Some("Av. Insurgentes Sur 1".to_string()),
        estado_id: "09".to_string(),
        municipio_id: "002".to_string(),
        latitude: Some(19.43),
        longitude: Some(-99.13),
    }
}

fn change(id: &str, price: Decimal, previous: Option<Decimal>) -> PriceChange {
    PriceChange {
        station_id: id.to_string(),
        fuel_type: FuelType::Regular,
        price,
        previous_price: previous,
        kind: if previous.is_some() {
            PriceChangeKind::ChangedPrice
        } else {
            PriceChangeKind::NewPrice
        },
    }
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn ping_answers_on_a_live_pool(pool: sqlx::PgPool) {
    ping(&pool).await.expect("ping should succeed");
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn upsert_stations_refreshes_existing_rows(pool: sqlx::PgPool) {
    let store = PgPriceStore::new(pool.clone());

    let written = store
        .upsert_stations(&[station("A", "Old name"), station("A", "Duplicate")])
        .await
        .expect("first upsert");
    assert_eq!(written, 1);

    store
        .upsert_stations(&[station("A", "New name")])
        .await
        .expect("second upsert");

    let row = get_station(&pool, "A").await.expect("station A");
    assert_eq!(row.name, "New name");
    assert!(row.updated_at >= row.created_at);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn price_changes_move_last_prices_and_append_history(pool: sqlx::PgPool) {
    let store = PgPriceStore::new(pool.clone());
    store.upsert_stations(&[station("A", "A")]).await.unwrap();

    store
        .insert_price_changes(&[change("A", Decimal::new(2000, 2), None)])
        .await
        .unwrap();
    store
        .insert_price_changes(&[change(
            "A",
            Decimal::new(2050, 2),
            Some(Decimal::new(2000, 2)),
        )])
        .await
        .unwrap();

    let baseline = store.all_last_prices().await.unwrap();
    assert_eq!(baseline.len(), 1);
    assert_eq!(baseline[0].price, Decimal::new(2050, 2));

    let history = list_price_history(&pool, "A", FuelType::Regular, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].change_kind, "changed_price");
    assert_eq!(history[0].previous_price, Some(Decimal::new(2000, 2)));
    assert_eq!(history[1].change_kind, "new_price");
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn failed_change_batch_writes_nothing(pool: sqlx::PgPool) {
    let store = PgPriceStore::new(pool.clone());
    store.upsert_stations(&[station("A", "A")]).await.unwrap();

    // "missing" violates the stations foreign key, so the whole batch rolls back.
    let result = store
        .insert_price_changes(&[
            change("A", Decimal::new(2000, 2), None),
            change("missing", Decimal::new(1900, 2), None),
        ])
        .await;
    assert!(matches!(result, Err(DbError::Sqlx(_))));

    assert!(store.all_last_prices().await.unwrap().is_empty());
    assert!(list_price_history(&pool, "A", FuelType::Regular, 10)
        .await
        .unwrap()
        .is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn ingestion_run_lifecycle(pool: sqlx::PgPool) {
    let run = create_ingestion_run(&pool, "cli", false).await.unwrap();
    assert_eq!(run.status, "running");
    assert!(run.completed_at.is_none());

    let stats = serde_json::json!({ "estados_processed": 32, "errors_encountered": 0 });
    complete_ingestion_run(&pool, run.id, &stats).await.unwrap();

    let fetched = get_ingestion_run(&pool, run.id).await.unwrap();
    assert_eq!(fetched.status, "succeeded");
    assert!(fetched.completed_at.is_some());
    assert_eq!(fetched.statistics["estados_processed"], 32);

    // A finished run cannot transition again.
    let again = fail_ingestion_run(&pool, run.id, "late failure", None).await;
    assert!(matches!(again, Err(DbError::InvalidRunTransition { .. })));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn failed_run_keeps_message(pool: sqlx::PgPool) {
    let run = create_ingestion_run(&pool, "cli", true).await.unwrap();
    fail_ingestion_run(&pool, run.id, "baseline unavailable", None)
        .await
        .unwrap();

    let runs = list_ingestion_runs(&pool, 5).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "failed");
    assert!(runs[0].dry_run);
    assert_eq!(runs[0].error_message.as_deref(), Some("baseline unavailable"));
}
