//! Import reconciler: idempotent upsert of hierarchy entities and leases
//! from tabular rows.
//!
//! Rows are validated one by one and every invalid row contributes exactly
//! one error; the whole batch commits only when no row failed, so a partial
//! import never persists. Row numbers count from 2, the first data line of
//! the source file.

use crate::models::{
    row_field, Building, Community, Company, ImportKind, ImportRow, ImportSummary, Lease, Tenant,
    Unit,
};
use crate::services::database::Database;
use crate::services::metrics::{DB_QUERY_DURATION, IMPORT_ROWS_TOTAL};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::{AppError, RowError};
use sqlx::PgConnection;
use std::str::FromStr;
use tracing::{info, instrument, warn};
use uuid::Uuid;

fn db_err(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("Import query failed: {}", e))
}

/// Reconcile room rows: find-or-create each hierarchy node by its natural
/// key, create missing units, and update changed remarks.
///
/// Re-importing identical rows yields `created = 0, updated = 0`.
#[instrument(skip(db, rows), fields(rows = rows.len()))]
pub async fn reconcile_rooms(db: &Database, rows: &[ImportRow]) -> Result<ImportSummary, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["reconcile_rooms"])
        .start_timer();

    let mut errors: Vec<RowError> = Vec::new();
    let mut summary = ImportSummary::default();

    let mut tx = db.pool().begin().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    for (idx, row) in rows.iter().enumerate() {
        let rownum = idx + 2;

        let parsed = match parse_room_row(row) {
            Ok(parsed) => parsed,
            Err(message) => {
                errors.push(RowError::new(rownum, message));
                continue;
            }
        };

        let company = match find_company(&mut tx, parsed.company_code)
            .await
            .map_err(db_err)?
        {
            Some(company) => company,
            None => insert_company(&mut tx, parsed.company_code)
                .await
                .map_err(db_err)?,
        };

        let community = match find_community(&mut tx, company.company_id, parsed.community_code)
            .await
            .map_err(db_err)?
        {
            Some(community) => community,
            None => insert_community(&mut tx, company.company_id, parsed.community_code)
                .await
                .map_err(db_err)?,
        };

        let building = match find_building(&mut tx, community.community_id, parsed.building_code)
            .await
            .map_err(db_err)?
        {
            Some(building) => building,
            None => insert_building(&mut tx, community.community_id, parsed.building_code)
                .await
                .map_err(db_err)?,
        };

        match find_unit(&mut tx, building.building_id, parsed.unit_no)
            .await
            .map_err(db_err)?
        {
            None => {
                insert_unit(&mut tx, building.building_id, parsed.unit_no, parsed.remark)
                    .await
                    .map_err(db_err)?;
                summary.created += 1;
            }
            Some(unit) => {
                if unit.remark.as_deref() != parsed.remark {
                    update_unit_remark(&mut tx, unit.unit_id, parsed.remark)
                        .await
                        .map_err(db_err)?;
                    summary.updated += 1;
                }
            }
        }
    }

    if !errors.is_empty() {
        IMPORT_ROWS_TOTAL
            .with_label_values(&["rooms", "error"])
            .inc_by(errors.len() as f64);
        // Dropping the transaction rolls every row back.
        return Err(AppError::RowValidation(errors));
    }

    tx.commit().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    timer.observe_duration();

    IMPORT_ROWS_TOTAL
        .with_label_values(&["rooms", "created"])
        .inc_by(f64::from(summary.created));
    IMPORT_ROWS_TOTAL
        .with_label_values(&["rooms", "updated"])
        .inc_by(f64::from(summary.updated));

    info!(
        created = summary.created,
        updated = summary.updated,
        "Rooms import reconciled"
    );

    Ok(summary)
}

/// Reconcile lease rows against an existing hierarchy.
///
/// Hierarchy nodes must already exist; a row whose start date matches an
/// existing lease of the unit is an update-in-place, any other overlap is a
/// per-row error.
#[instrument(skip(db, rows), fields(rows = rows.len()))]
pub async fn reconcile_leases(
    db: &Database,
    rows: &[ImportRow],
) -> Result<ImportSummary, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["reconcile_leases"])
        .start_timer();

    let mut errors: Vec<RowError> = Vec::new();
    let mut summary = ImportSummary::default();

    let mut tx = db.pool().begin().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    for (idx, row) in rows.iter().enumerate() {
        let rownum = idx + 2;

        let parsed = match parse_lease_row(row) {
            Ok(parsed) => parsed,
            Err(message) => {
                errors.push(RowError::new(rownum, message));
                continue;
            }
        };

        let Some(company) = find_company(&mut tx, parsed.company_code)
            .await
            .map_err(db_err)?
        else {
            errors.push(RowError::new(
                rownum,
                format!("company {} not found", parsed.company_code),
            ));
            continue;
        };

        let Some(community) = find_community(&mut tx, company.company_id, parsed.community_code)
            .await
            .map_err(db_err)?
        else {
            errors.push(RowError::new(
                rownum,
                format!("community {} not found", parsed.community_code),
            ));
            continue;
        };

        let Some(building) = find_building(&mut tx, community.community_id, parsed.building_code)
            .await
            .map_err(db_err)?
        else {
            errors.push(RowError::new(
                rownum,
                format!("building {} not found", parsed.building_code),
            ));
            continue;
        };

        let Some(unit) = find_unit(&mut tx, building.building_id, parsed.unit_no)
            .await
            .map_err(db_err)?
        else {
            errors.push(RowError::new(
                rownum,
                format!("unit {} not found", parsed.unit_no),
            ));
            continue;
        };

        let existing = leases_for_unit(&mut tx, unit.unit_id).await.map_err(db_err)?;

        // An exact start-date match is the row to update, never an overlap.
        let overlap = existing.iter().any(|lease| {
            lease.start_date != parsed.start_date
                && lease.overlaps(parsed.start_date, parsed.end_date)
        });
        if overlap {
            errors.push(RowError::new(rownum, "lease date overlaps existing lease"));
            continue;
        }

        let tenant = match find_tenant(&mut tx, parsed.tenant_name, parsed.tenant_mobile)
            .await
            .map_err(db_err)?
        {
            Some(tenant) => tenant,
            None => insert_tenant(&mut tx, parsed.tenant_name, parsed.tenant_mobile)
                .await
                .map_err(db_err)?,
        };

        match existing
            .iter()
            .find(|lease| lease.start_date == parsed.start_date)
        {
            Some(lease) => {
                update_lease(
                    &mut tx,
                    lease.lease_id,
                    tenant.tenant_id,
                    parsed.end_date,
                    parsed.rent_amount,
                    parsed.deposit_amount,
                )
                .await
                .map_err(db_err)?;
                summary.updated += 1;
            }
            None => {
                insert_lease(
                    &mut tx,
                    unit.unit_id,
                    tenant.tenant_id,
                    parsed.start_date,
                    parsed.end_date,
                    parsed.rent_amount,
                    parsed.deposit_amount,
                )
                .await
                .map_err(db_err)?;
                summary.created += 1;
            }
        }
    }

    if !errors.is_empty() {
        IMPORT_ROWS_TOTAL
            .with_label_values(&["leases", "error"])
            .inc_by(errors.len() as f64);
        return Err(AppError::RowValidation(errors));
    }

    tx.commit().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    timer.observe_duration();

    IMPORT_ROWS_TOTAL
        .with_label_values(&["leases", "created"])
        .inc_by(f64::from(summary.created));
    IMPORT_ROWS_TOTAL
        .with_label_values(&["leases", "updated"])
        .inc_by(f64::from(summary.updated));

    info!(
        created = summary.created,
        updated = summary.updated,
        "Leases import reconciled"
    );

    Ok(summary)
}

/// Run a batch through its status lifecycle: processing → done | failed.
///
/// Row validation failures land in the batch record as structured errors;
/// fatal errors are recorded and propagated to the worker.
#[instrument(skip(db, rows), fields(batch_id = %batch_id, kind = kind.as_str()))]
pub async fn process_import_batch(
    db: &Database,
    batch_id: Uuid,
    kind: ImportKind,
    rows: &[ImportRow],
) -> Result<(), AppError> {
    if db.get_import_batch(batch_id).await?.is_none() {
        warn!(batch_id = %batch_id, "Import batch record missing, nothing to process");
        return Ok(());
    }

    db.mark_batch_processing(batch_id).await?;

    let outcome = match kind {
        ImportKind::Rooms => reconcile_rooms(db, rows).await,
        ImportKind::Leases => reconcile_leases(db, rows).await,
    };

    match outcome {
        Ok(summary) => {
            let result_json = serde_json::to_string(&summary).map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("Failed to serialize result: {}", e))
            })?;
            db.mark_batch_done(batch_id, &result_json).await
        }
        Err(AppError::RowValidation(row_errors)) => {
            let errors_json = serde_json::to_string(&row_errors).map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("Failed to serialize errors: {}", e))
            })?;
            db.mark_batch_failed(batch_id, &errors_json).await
        }
        Err(e) => {
            let detail = serde_json::json!({ "error": e.to_string() }).to_string();
            db.mark_batch_failed(batch_id, &detail).await?;
            Err(e)
        }
    }
}

// -------------------------------------------------------------------------
// Row parsing
// -------------------------------------------------------------------------

#[derive(Debug)]
struct RoomRow<'a> {
    company_code: &'a str,
    community_code: &'a str,
    building_code: &'a str,
    unit_no: &'a str,
    remark: Option<&'a str>,
}

fn parse_room_row(row: &ImportRow) -> Result<RoomRow<'_>, String> {
    let (Some(company_code), Some(community_code), Some(building_code), Some(unit_no)) = (
        row_field(row, "company_code"),
        row_field(row, "community_code"),
        row_field(row, "building_code"),
        row_field(row, "unit_no"),
    ) else {
        return Err("missing required field(s)".to_string());
    };

    Ok(RoomRow {
        company_code,
        community_code,
        building_code,
        unit_no,
        remark: row_field(row, "remark"),
    })
}

#[derive(Debug)]
struct LeaseRow<'a> {
    company_code: &'a str,
    community_code: &'a str,
    building_code: &'a str,
    unit_no: &'a str,
    tenant_name: &'a str,
    tenant_mobile: Option<&'a str>,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    rent_amount: Decimal,
    deposit_amount: Decimal,
}

fn parse_lease_row(row: &ImportRow) -> Result<LeaseRow<'_>, String> {
    let (
        Some(company_code),
        Some(community_code),
        Some(building_code),
        Some(unit_no),
        Some(tenant_name),
        Some(start_date_s),
    ) = (
        row_field(row, "company_code"),
        row_field(row, "community_code"),
        row_field(row, "building_code"),
        row_field(row, "unit_no"),
        row_field(row, "tenant_name"),
        row_field(row, "start_date"),
    )
    else {
        return Err("missing required field(s)".to_string());
    };

    let start_date = parse_date(start_date_s)?;
    // An empty end date means open-ended.
    let end_date = match row_field(row, "end_date") {
        Some(raw) => Some(parse_date(raw)?),
        None => None,
    };

    let rent_amount = parse_amount(row_field(row, "rent_amount"))?;
    let deposit_amount = parse_amount(row_field(row, "deposit_amount"))?;

    Ok(LeaseRow {
        company_code,
        community_code,
        building_code,
        unit_no,
        tenant_name,
        tenant_mobile: row_field(row, "tenant_mobile"),
        start_date,
        end_date,
        rent_amount,
        deposit_amount,
    })
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| "invalid date format, expected YYYY-MM-DD".to_string())
}

fn parse_amount(raw: Option<&str>) -> Result<Decimal, String> {
    match raw {
        None => Ok(Decimal::ZERO),
        Some(raw) => Decimal::from_str(raw).map_err(|_| "invalid amount format".to_string()),
    }
}

// -------------------------------------------------------------------------
// Transaction-scoped queries
// -------------------------------------------------------------------------

async fn find_company(conn: &mut PgConnection, code: &str) -> Result<Option<Company>, sqlx::Error> {
    sqlx::query_as::<_, Company>("SELECT company_id, code, name FROM companies WHERE code = $1")
        .bind(code)
        .fetch_optional(conn)
        .await
}

async fn insert_company(conn: &mut PgConnection, code: &str) -> Result<Company, sqlx::Error> {
    sqlx::query_as::<_, Company>(
        r#"
        INSERT INTO companies (company_id, code, name)
        VALUES ($1, $2, $2)
        RETURNING company_id, code, name
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(code)
    .fetch_one(conn)
    .await
}

async fn find_community(
    conn: &mut PgConnection,
    company_id: Uuid,
    code: &str,
) -> Result<Option<Community>, sqlx::Error> {
    sqlx::query_as::<_, Community>(
        r#"
        SELECT community_id, company_id, code, name
        FROM communities
        WHERE company_id = $1 AND code = $2
        "#,
    )
    .bind(company_id)
    .bind(code)
    .fetch_optional(conn)
    .await
}

async fn insert_community(
    conn: &mut PgConnection,
    company_id: Uuid,
    code: &str,
) -> Result<Community, sqlx::Error> {
    sqlx::query_as::<_, Community>(
        r#"
        INSERT INTO communities (community_id, company_id, code, name)
        VALUES ($1, $2, $3, $3)
        RETURNING community_id, company_id, code, name
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(company_id)
    .bind(code)
    .fetch_one(conn)
    .await
}

async fn find_building(
    conn: &mut PgConnection,
    community_id: Uuid,
    code: &str,
) -> Result<Option<Building>, sqlx::Error> {
    sqlx::query_as::<_, Building>(
        r#"
        SELECT building_id, community_id, code, name
        FROM buildings
        WHERE community_id = $1 AND code = $2
        "#,
    )
    .bind(community_id)
    .bind(code)
    .fetch_optional(conn)
    .await
}

async fn insert_building(
    conn: &mut PgConnection,
    community_id: Uuid,
    code: &str,
) -> Result<Building, sqlx::Error> {
    sqlx::query_as::<_, Building>(
        r#"
        INSERT INTO buildings (building_id, community_id, code, name)
        VALUES ($1, $2, $3, $3)
        RETURNING building_id, community_id, code, name
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(community_id)
    .bind(code)
    .fetch_one(conn)
    .await
}

async fn find_unit(
    conn: &mut PgConnection,
    building_id: Uuid,
    unit_no: &str,
) -> Result<Option<Unit>, sqlx::Error> {
    sqlx::query_as::<_, Unit>(
        r#"
        SELECT unit_id, building_id, unit_no, remark
        FROM units
        WHERE building_id = $1 AND unit_no = $2
        "#,
    )
    .bind(building_id)
    .bind(unit_no)
    .fetch_optional(conn)
    .await
}

async fn insert_unit(
    conn: &mut PgConnection,
    building_id: Uuid,
    unit_no: &str,
    remark: Option<&str>,
) -> Result<Unit, sqlx::Error> {
    sqlx::query_as::<_, Unit>(
        r#"
        INSERT INTO units (unit_id, building_id, unit_no, remark)
        VALUES ($1, $2, $3, $4)
        RETURNING unit_id, building_id, unit_no, remark
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(building_id)
    .bind(unit_no)
    .bind(remark)
    .fetch_one(conn)
    .await
}

async fn update_unit_remark(
    conn: &mut PgConnection,
    unit_id: Uuid,
    remark: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE units SET remark = $2 WHERE unit_id = $1")
        .bind(unit_id)
        .bind(remark)
        .execute(conn)
        .await
        .map(|_| ())
}

async fn leases_for_unit(
    conn: &mut PgConnection,
    unit_id: Uuid,
) -> Result<Vec<Lease>, sqlx::Error> {
    sqlx::query_as::<_, Lease>(
        r#"
        SELECT lease_id, unit_id, tenant_id, start_date, end_date, rent_amount, deposit_amount, created_utc
        FROM leases
        WHERE unit_id = $1
        ORDER BY start_date
        "#,
    )
    .bind(unit_id)
    .fetch_all(conn)
    .await
}

async fn find_tenant(
    conn: &mut PgConnection,
    name: &str,
    mobile: Option<&str>,
) -> Result<Option<Tenant>, sqlx::Error> {
    sqlx::query_as::<_, Tenant>(
        r#"
        SELECT tenant_id, name, mobile
        FROM tenants
        WHERE name = $1 AND mobile IS NOT DISTINCT FROM $2
        "#,
    )
    .bind(name)
    .bind(mobile)
    .fetch_optional(conn)
    .await
}

async fn insert_tenant(
    conn: &mut PgConnection,
    name: &str,
    mobile: Option<&str>,
) -> Result<Tenant, sqlx::Error> {
    sqlx::query_as::<_, Tenant>(
        r#"
        INSERT INTO tenants (tenant_id, name, mobile)
        VALUES ($1, $2, $3)
        RETURNING tenant_id, name, mobile
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(mobile)
    .fetch_one(conn)
    .await
}

#[allow(clippy::too_many_arguments)]
async fn insert_lease(
    conn: &mut PgConnection,
    unit_id: Uuid,
    tenant_id: Uuid,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    rent_amount: Decimal,
    deposit_amount: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO leases (lease_id, unit_id, tenant_id, start_date, end_date, rent_amount, deposit_amount)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(unit_id)
    .bind(tenant_id)
    .bind(start_date)
    .bind(end_date)
    .bind(rent_amount)
    .bind(deposit_amount)
    .execute(conn)
    .await
    .map(|_| ())
}

async fn update_lease(
    conn: &mut PgConnection,
    lease_id: Uuid,
    tenant_id: Uuid,
    end_date: Option<NaiveDate>,
    rent_amount: Decimal,
    deposit_amount: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE leases
        SET tenant_id = $2, end_date = $3, rent_amount = $4, deposit_amount = $5
        WHERE lease_id = $1
        "#,
    )
    .bind(lease_id)
    .bind(tenant_id)
    .bind(end_date)
    .bind(rent_amount)
    .bind(deposit_amount)
    .execute(conn)
    .await
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> ImportRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn room_row_requires_all_hierarchy_fields() {
        let missing = row(&[
            ("company_code", "C1"),
            ("community_code", "CM1"),
            ("unit_no", "101"),
        ]);
        assert_eq!(
            parse_room_row(&missing).unwrap_err(),
            "missing required field(s)"
        );

        let complete = row(&[
            ("company_code", "C1"),
            ("community_code", "CM1"),
            ("building_code", "B1"),
            ("unit_no", "101"),
            ("remark", "corner unit"),
        ]);
        let parsed = parse_room_row(&complete).unwrap();
        assert_eq!(parsed.unit_no, "101");
        assert_eq!(parsed.remark, Some("corner unit"));
    }

    #[test]
    fn lease_row_parses_dates_and_amounts() {
        let complete = row(&[
            ("company_code", "C1"),
            ("community_code", "CM1"),
            ("building_code", "B1"),
            ("unit_no", "101"),
            ("tenant_name", "T1"),
            ("tenant_mobile", "13800000000"),
            ("start_date", "2026-02-15"),
            ("end_date", "2027-02-14"),
            ("rent_amount", "1000.50"),
            ("deposit_amount", "2000"),
        ]);
        let parsed = parse_lease_row(&complete).unwrap();
        assert_eq!(
            parsed.start_date,
            NaiveDate::from_ymd_opt(2026, 2, 15).unwrap()
        );
        assert_eq!(
            parsed.end_date,
            Some(NaiveDate::from_ymd_opt(2027, 2, 14).unwrap())
        );
        assert_eq!(parsed.rent_amount, Decimal::from_str("1000.50").unwrap());
        assert_eq!(parsed.deposit_amount, Decimal::from_str("2000").unwrap());
    }

    #[test]
    fn lease_row_with_empty_end_date_is_open_ended() {
        let open_ended = row(&[
            ("company_code", "C1"),
            ("community_code", "CM1"),
            ("building_code", "B1"),
            ("unit_no", "101"),
            ("tenant_name", "T1"),
            ("start_date", "2026-02-15"),
            ("end_date", "  "),
        ]);
        let parsed = parse_lease_row(&open_ended).unwrap();
        assert_eq!(parsed.end_date, None);
        assert_eq!(parsed.rent_amount, Decimal::ZERO);
    }

    #[test]
    fn lease_row_rejects_malformed_date() {
        let bad_date = row(&[
            ("company_code", "C1"),
            ("community_code", "CM1"),
            ("building_code", "B1"),
            ("unit_no", "101"),
            ("tenant_name", "T1"),
            ("start_date", "15/02/2026"),
        ]);
        assert_eq!(
            parse_lease_row(&bad_date).unwrap_err(),
            "invalid date format, expected YYYY-MM-DD"
        );
    }

    #[test]
    fn lease_row_rejects_malformed_amount() {
        let bad_amount = row(&[
            ("company_code", "C1"),
            ("community_code", "CM1"),
            ("building_code", "B1"),
            ("unit_no", "101"),
            ("tenant_name", "T1"),
            ("start_date", "2026-02-15"),
            ("rent_amount", "one thousand"),
        ]);
        assert_eq!(parse_lease_row(&bad_amount).unwrap_err(), "invalid amount format");
    }

    #[test]
    fn lease_row_requires_tenant_and_start() {
        let missing = row(&[
            ("company_code", "C1"),
            ("community_code", "CM1"),
            ("building_code", "B1"),
            ("unit_no", "101"),
        ]);
        assert_eq!(
            parse_lease_row(&missing).unwrap_err(),
            "missing required field(s)"
        );
    }
}
