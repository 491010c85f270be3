//! At-most-once guarantee under concurrent kiosk submissions: for any
//! single-use voucher, N concurrent redeem calls yield exactly one success
//! and N-1 AlreadyUsed outcomes, regardless of scheduling order.

use std::sync::Arc;

use cantina_kiosk::config::RedemptionConfig;
use cantina_kiosk::error::Rejection;
use cantina_kiosk::redemption::RedemptionCoordinator;
use cantina_kiosk::storage::Database;
use chrono::{TimeZone, Utc};
use futures::future::join_all;

fn seed(db: &Database) -> i64 {
    let company = db.insert_company("Acme", true).unwrap();
    let shift = db.insert_shift("day", 6 * 60, 14 * 60, true).unwrap();
    let lunch = db
        .insert_meal_type("Almoço", 12 * 60, 13 * 60, 15, None, true)
        .unwrap();
    let _ = (company, shift);
    lunch
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn disposable_voucher_redeems_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kiosk.db");
    let db = Arc::new(Database::new(path.to_str().unwrap()).unwrap());

    let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 30, 0).unwrap();
    let lunch = seed(&db);
    db.insert_disposable_voucher("4821", None, now.date_naive())
        .unwrap();

    let coordinator = RedemptionCoordinator::new(db, RedemptionConfig::default());

    let attempts = 16;
    let tasks: Vec<_> = (0..attempts)
        .map(|_| {
            let c = coordinator.clone();
            tokio::spawn(async move { c.redeem("4821", lunch, now).await })
        })
        .collect();

    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let already_used = results
        .iter()
        .filter(|r| matches!(r, Err(Rejection::AlreadyUsed)))
        .count();

    assert_eq!(successes, 1);
    assert_eq!(already_used, attempts - 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn extra_voucher_redeems_exactly_once() {
    let db = Arc::new(Database::open_in_memory().unwrap());

    let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 30, 0).unwrap();
    let lunch = seed(&db);
    let company = db.insert_company("Beta", true).unwrap();
    let shift = db.insert_shift("late", 10 * 60, 18 * 60, true).unwrap();
    let holder = db.insert_holder("Jorge", company, shift, false).unwrap();
    db.insert_extra_voucher(holder, "2001", None, now.date_naive())
        .unwrap();

    let coordinator = RedemptionCoordinator::new(db, RedemptionConfig::default());

    let attempts = 12;
    let tasks: Vec<_> = (0..attempts)
        .map(|_| {
            let c = coordinator.clone();
            tokio::spawn(async move { c.redeem("2001", lunch, now).await })
        })
        .collect();

    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let already_used = results
        .iter()
        .filter(|r| matches!(r, Err(Rejection::AlreadyUsed)))
        .count();

    assert_eq!(successes, 1);
    assert_eq!(already_used, attempts - 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn common_voucher_one_ledger_row_per_meal_per_day() {
    let db = Arc::new(Database::open_in_memory().unwrap());

    let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 30, 0).unwrap();
    let lunch = seed(&db);
    let company = db.insert_company("Beta", true).unwrap();
    let shift = db.insert_shift("day2", 6 * 60, 14 * 60, true).unwrap();
    let holder = db.insert_holder("Maria", company, shift, false).unwrap();
    db.insert_common_voucher(holder, "1001").unwrap();

    // Interval rule off so every loser reaches the ledger insert and the
    // unique index is what arbitrates.
    let rules = RedemptionConfig {
        min_interval_minutes: 0,
        ..RedemptionConfig::default()
    };
    let coordinator = RedemptionCoordinator::new(db.clone(), rules);

    let attempts = 12;
    let tasks: Vec<_> = (0..attempts)
        .map(|_| {
            let c = coordinator.clone();
            tokio::spawn(async move { c.redeem("1001", lunch, now).await })
        })
        .collect();

    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    // Losers of the ledger-insert race see the daily-limit rejection, never
    // a generic failure.
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let limited = results
        .iter()
        .filter(|r| matches!(r, Err(Rejection::DailyLimitReached)))
        .count();

    assert_eq!(successes, 1);
    assert_eq!(limited, attempts - 1);
    assert_eq!(db.usage_count_on(holder, now.date_naive()).unwrap(), 1);
}
