//! Import reconciler integration tests: idempotent upserts, per-row error
//! collection, all-or-nothing batches and the async status lifecycle.

mod common;

use billing_service::models::{ImportKind, ImportRow};
use billing_service::services::{process_import_batch, reconcile_leases, reconcile_rooms};
use billing_service::workers::{ImportJob, ImportQueue};
use common::TestDb;
use rust_decimal::Decimal;
use serial_test::serial;
use service_core::error::AppError;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

fn row(pairs: &[(&str, &str)]) -> ImportRow {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn room_row(unit_no: &str, remark: Option<&str>) -> ImportRow {
    let mut pairs = vec![
        ("company_code", "C1"),
        ("community_code", "CM1"),
        ("building_code", "B1"),
        ("unit_no", unit_no),
    ];
    if let Some(remark) = remark {
        pairs.push(("remark", remark));
    }
    row(&pairs)
}

fn lease_row(unit_no: &str, start: &str, end: &str, rent: &str) -> ImportRow {
    row(&[
        ("company_code", "C1"),
        ("community_code", "CM1"),
        ("building_code", "B1"),
        ("unit_no", unit_no),
        ("tenant_name", "T1"),
        ("tenant_mobile", "13800000000"),
        ("start_date", start),
        ("end_date", end),
        ("rent_amount", rent),
        ("deposit_amount", rent),
    ])
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn rooms_import_is_idempotent() {
    let test_db = TestDb::spawn().await;
    let db = &test_db.db;

    let rows = vec![room_row("101", None), room_row("102", None)];

    let first = reconcile_rooms(db, &rows).await.unwrap();
    assert_eq!(first.created, 2);
    assert_eq!(first.updated, 0);

    let second = reconcile_rooms(db, &rows).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 0);

    // A changed remark counts as an update.
    let remarked = vec![room_row("101", Some("corner unit")), room_row("102", None)];
    let third = reconcile_rooms(db, &remarked).await.unwrap();
    assert_eq!(third.created, 0);
    assert_eq!(third.updated, 1);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn rooms_import_rolls_back_on_any_invalid_row() {
    let test_db = TestDb::spawn().await;
    let db = &test_db.db;

    let rows = vec![
        room_row("101", None),
        row(&[
            ("company_code", "C1"),
            ("community_code", "CM1"),
            ("building_code", "B1"),
        ]),
    ];

    let result = reconcile_rooms(db, &rows).await;
    match result {
        Err(AppError::RowValidation(errors)) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].row, 3);
            assert_eq!(errors[0].error, "missing required field(s)");
        }
        other => panic!("expected RowValidation, got {:?}", other.map(|_| ())),
    }

    // The valid first row must not have been persisted.
    assert!(db.find_company_by_code("C1").await.unwrap().is_none());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn leases_import_creates_then_updates_in_place() {
    let test_db = TestDb::spawn().await;
    let db = &test_db.db;

    reconcile_rooms(db, &[room_row("101", None)]).await.unwrap();

    let created = reconcile_leases(
        db,
        &[lease_row("101", "2026-02-15", "2027-02-14", "1000")],
    )
    .await
    .unwrap();
    assert_eq!(created.created, 1);
    assert_eq!(created.updated, 0);

    // Same start date: update-in-place, not an overlap.
    let updated = reconcile_leases(
        db,
        &[lease_row("101", "2026-02-15", "2027-02-14", "1200")],
    )
    .await
    .unwrap();
    assert_eq!(updated.created, 0);
    assert_eq!(updated.updated, 1);

    let company = db.find_company_by_code("C1").await.unwrap().unwrap();
    let leases = db.leases_for_company(company.company_id).await.unwrap();
    assert_eq!(leases.len(), 1);
    assert_eq!(leases[0].rent_amount, Decimal::from_str("1200").unwrap());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn lease_touching_an_existing_boundary_overlaps() {
    let test_db = TestDb::spawn().await;
    let db = &test_db.db;

    reconcile_rooms(db, &[room_row("101", None)]).await.unwrap();
    reconcile_leases(db, &[lease_row("101", "2026-01-01", "2026-12-31", "1000")])
        .await
        .unwrap();

    // Boundary dates are inclusive on both sides.
    let result = reconcile_leases(
        db,
        &[lease_row("101", "2026-12-31", "2027-12-30", "1000")],
    )
    .await;
    match result {
        Err(AppError::RowValidation(errors)) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].error, "lease date overlaps existing lease");
        }
        other => panic!("expected RowValidation, got {:?}", other.map(|_| ())),
    }

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn lease_rows_validate_against_missing_hierarchy() {
    let test_db = TestDb::spawn().await;
    let db = &test_db.db;

    let result = reconcile_leases(
        db,
        &[lease_row("101", "2026-02-15", "2027-02-14", "1000")],
    )
    .await;
    match result {
        Err(AppError::RowValidation(errors)) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].error, "company C1 not found");
        }
        other => panic!("expected RowValidation, got {:?}", other.map(|_| ())),
    }

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn mixed_batch_collects_one_error_per_invalid_row_and_rolls_back() {
    let test_db = TestDb::spawn().await;
    let db = &test_db.db;

    reconcile_rooms(db, &[room_row("101", None), room_row("102", None)])
        .await
        .unwrap();

    let rows = vec![
        lease_row("101", "2026-02-15", "2027-02-14", "1000"),
        lease_row("102", "15/02/2026", "2027-02-14", "1000"),
        lease_row("102", "2026-02-15", "2027-02-14", "not-a-number"),
    ];

    let result = reconcile_leases(db, &rows).await;
    match result {
        Err(AppError::RowValidation(errors)) => {
            assert_eq!(errors.len(), 2);
            assert_eq!(errors[0].row, 3);
            assert_eq!(errors[0].error, "invalid date format, expected YYYY-MM-DD");
            assert_eq!(errors[1].row, 4);
            assert_eq!(errors[1].error, "invalid amount format");
        }
        other => panic!("expected RowValidation, got {:?}", other.map(|_| ())),
    }

    // The valid first row was rolled back with the rest of the batch.
    let company = db.find_company_by_code("C1").await.unwrap().unwrap();
    assert!(db
        .leases_for_company(company.company_id)
        .await
        .unwrap()
        .is_empty());

    test_db.cleanup().await;
}

#[tokio::test]
#[serial]
#[ignore] // Requires running PostgreSQL
async fn batch_processing_records_done_with_result() {
    let test_db = TestDb::spawn().await;
    let db = &test_db.db;

    let batch = db
        .create_import_batch("rooms.csv", ImportKind::Rooms)
        .await
        .unwrap();
    assert_eq!(batch.status, "pending");

    let rows = vec![room_row("101", None), room_row("102", None)];
    process_import_batch(db, batch.batch_id, ImportKind::Rooms, &rows)
        .await
        .unwrap();

    let finished = db
        .get_import_batch(batch.batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, "done");
    assert!(finished.started_utc.is_some());
    assert!(finished.finished_utc.is_some());

    let result: serde_json::Value =
        serde_json::from_str(finished.result.as_deref().unwrap()).unwrap();
    assert_eq!(result["created"], 2);
    assert_eq!(result["updated"], 0);

    test_db.cleanup().await;
}

#[tokio::test]
#[serial]
#[ignore] // Requires running PostgreSQL
async fn batch_processing_records_failure_with_row_errors() {
    let test_db = TestDb::spawn().await;
    let db = &test_db.db;

    let batch = db
        .create_import_batch("leases.csv", ImportKind::Leases)
        .await
        .unwrap();

    let rows = vec![lease_row("101", "2026-02-15", "2027-02-14", "1000")];
    process_import_batch(db, batch.batch_id, ImportKind::Leases, &rows)
        .await
        .unwrap();

    let failed = db
        .get_import_batch(batch.batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, "failed");

    let errors: serde_json::Value =
        serde_json::from_str(failed.errors.as_deref().unwrap()).unwrap();
    assert_eq!(errors.as_array().map(Vec::len), Some(1));
    assert_eq!(errors[0]["error"], "company C1 not found");

    test_db.cleanup().await;
}

#[tokio::test]
#[serial]
#[ignore] // Requires running PostgreSQL
async fn queued_job_is_processed_by_the_worker() {
    let test_db = TestDb::spawn().await;
    let db = Arc::new(test_db.db.clone());

    let queue = ImportQueue::start(db.clone());
    let batch = db
        .create_import_batch("rooms.csv", ImportKind::Rooms)
        .await
        .unwrap();

    queue
        .enqueue(ImportJob {
            batch_id: batch.batch_id,
            kind: ImportKind::Rooms,
            rows: vec![room_row("101", None)],
        })
        .unwrap();

    // The caller's contract is polling the batch record.
    let mut status = batch.status.clone();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let current = db.get_import_batch(batch.batch_id).await.unwrap().unwrap();
        status = current.status.clone();
        if status == "done" || status == "failed" {
            break;
        }
    }
    assert_eq!(status, "done");

    test_db.cleanup().await;
}
