//! Database service for billing-service.

use crate::config::DatabaseConfig;
use crate::models::{
    freeze_lines, AuditLog, Bill, BillLine, BillOperation, BillTemplate, BillTemplateLine,
    Building, ChargeItem, Community, Company, CreateAuditLog, CreateBillLine, CreateLease,
    CreateTemplate, ImportBatch, ImportBatchStatus, ImportKind, Lease, Meter, MeterKind,
    MeterReading, NewBill, Role, Tenant, Unit, UnitContext, UpdateTemplate, User,
};
use crate::services::metrics::{BILLS_TOTAL, DB_QUERY_DURATION};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Append an audit entry on the given connection (usually a transaction).
async fn insert_audit(
    conn: &mut PgConnection,
    entry: &CreateAuditLog,
) -> Result<AuditLog, sqlx::Error> {
    sqlx::query_as::<_, AuditLog>(
        r#"
        INSERT INTO audit_logs (audit_id, actor_id, action, before, after)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING audit_id, actor_id, action, before, after, created_utc
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry.actor_id)
    .bind(&entry.action)
    .bind(&entry.before)
    .bind(&entry.after)
    .fetch_one(conn)
    .await
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(config), fields(service = "billing-service"))]
    pub async fn new(config: &DatabaseConfig) -> Result<Self, AppError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Wrap an already-connected pool (used by tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Property Hierarchy Operations
    // -------------------------------------------------------------------------

    /// Create a company.
    #[instrument(skip(self))]
    pub async fn create_company(&self, code: &str, name: &str) -> Result<Company, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_company"])
            .start_timer();

        let company = sqlx::query_as::<_, Company>(
            r#"
            INSERT INTO companies (company_id, code, name)
            VALUES ($1, $2, $3)
            RETURNING company_id, code, name
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Company '{}' already exists", code))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create company: {}", e)),
        })?;

        timer.observe_duration();

        Ok(company)
    }

    /// Find a company by its code.
    #[instrument(skip(self))]
    pub async fn find_company_by_code(&self, code: &str) -> Result<Option<Company>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_company_by_code"])
            .start_timer();

        let company = sqlx::query_as::<_, Company>(
            "SELECT company_id, code, name FROM companies WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find company: {}", e)))?;

        timer.observe_duration();

        Ok(company)
    }

    /// Create a community under a company.
    #[instrument(skip(self), fields(company_id = %company_id))]
    pub async fn create_community(
        &self,
        company_id: Uuid,
        code: &str,
        name: &str,
    ) -> Result<Community, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_community"])
            .start_timer();

        let community = sqlx::query_as::<_, Community>(
            r#"
            INSERT INTO communities (community_id, company_id, code, name)
            VALUES ($1, $2, $3, $4)
            RETURNING community_id, company_id, code, name
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(company_id)
        .bind(code)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Community '{}' already exists", code))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create community: {}", e)),
        })?;

        timer.observe_duration();

        Ok(community)
    }

    /// Find a community by code within a company.
    #[instrument(skip(self), fields(company_id = %company_id))]
    pub async fn find_community(
        &self,
        company_id: Uuid,
        code: &str,
    ) -> Result<Option<Community>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_community"])
            .start_timer();

        let community = sqlx::query_as::<_, Community>(
            r#"
            SELECT community_id, company_id, code, name
            FROM communities
            WHERE company_id = $1 AND code = $2
            "#,
        )
        .bind(company_id)
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find community: {}", e)))?;

        timer.observe_duration();

        Ok(community)
    }

    /// Create a building under a community.
    #[instrument(skip(self), fields(community_id = %community_id))]
    pub async fn create_building(
        &self,
        community_id: Uuid,
        code: &str,
        name: &str,
    ) -> Result<Building, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_building"])
            .start_timer();

        let building = sqlx::query_as::<_, Building>(
            r#"
            INSERT INTO buildings (building_id, community_id, code, name)
            VALUES ($1, $2, $3, $4)
            RETURNING building_id, community_id, code, name
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(community_id)
        .bind(code)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Building '{}' already exists", code))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create building: {}", e)),
        })?;

        timer.observe_duration();

        Ok(building)
    }

    /// Find a building by code within a community.
    #[instrument(skip(self), fields(community_id = %community_id))]
    pub async fn find_building(
        &self,
        community_id: Uuid,
        code: &str,
    ) -> Result<Option<Building>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_building"])
            .start_timer();

        let building = sqlx::query_as::<_, Building>(
            r#"
            SELECT building_id, community_id, code, name
            FROM buildings
            WHERE community_id = $1 AND code = $2
            "#,
        )
        .bind(community_id)
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find building: {}", e)))?;

        timer.observe_duration();

        Ok(building)
    }

    /// Create a unit under a building.
    #[instrument(skip(self), fields(building_id = %building_id))]
    pub async fn create_unit(
        &self,
        building_id: Uuid,
        unit_no: &str,
        remark: Option<&str>,
    ) -> Result<Unit, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_unit"])
            .start_timer();

        let unit = sqlx::query_as::<_, Unit>(
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
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Unit '{}' already exists", unit_no))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create unit: {}", e)),
        })?;

        timer.observe_duration();

        Ok(unit)
    }

    /// Find a unit by its number within a building.
    #[instrument(skip(self), fields(building_id = %building_id))]
    pub async fn find_unit(
        &self,
        building_id: Uuid,
        unit_no: &str,
    ) -> Result<Option<Unit>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_unit"])
            .start_timer();

        let unit = sqlx::query_as::<_, Unit>(
            r#"
            SELECT unit_id, building_id, unit_no, remark
            FROM units
            WHERE building_id = $1 AND unit_no = $2
            "#,
        )
        .bind(building_id)
        .bind(unit_no)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find unit: {}", e)))?;

        timer.observe_duration();

        Ok(unit)
    }

    /// Get a unit by ID.
    #[instrument(skip(self), fields(unit_id = %unit_id))]
    pub async fn get_unit(&self, unit_id: Uuid) -> Result<Option<Unit>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_unit"])
            .start_timer();

        let unit = sqlx::query_as::<_, Unit>(
            "SELECT unit_id, building_id, unit_no, remark FROM units WHERE unit_id = $1",
        )
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get unit: {}", e)))?;

        timer.observe_duration();

        Ok(unit)
    }

    /// Resolve a unit's full ancestry: unit → building → community → company.
    ///
    /// Each link is an explicit foreign-key lookup; a broken link is a
    /// NotFound, never a silent null.
    #[instrument(skip(self), fields(unit_id = %unit_id))]
    pub async fn get_unit_context(&self, unit_id: Uuid) -> Result<UnitContext, AppError> {
        let unit = self
            .get_unit(unit_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("unit {} not found", unit_id)))?;

        let building = sqlx::query_as::<_, Building>(
            "SELECT building_id, community_id, code, name FROM buildings WHERE building_id = $1",
        )
        .bind(unit.building_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get building: {}", e)))?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("building {} not found", unit.building_id))
        })?;

        let community = sqlx::query_as::<_, Community>(
            "SELECT community_id, company_id, code, name FROM communities WHERE community_id = $1",
        )
        .bind(building.community_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get community: {}", e)))?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "community {} not found",
                building.community_id
            ))
        })?;

        let company = sqlx::query_as::<_, Company>(
            "SELECT company_id, code, name FROM companies WHERE company_id = $1",
        )
        .bind(community.company_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get company: {}", e)))?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("company {} not found", community.company_id))
        })?;

        Ok(UnitContext {
            unit,
            building,
            community,
            company,
        })
    }

    // -------------------------------------------------------------------------
    // Tenant & Lease Operations
    // -------------------------------------------------------------------------

    /// Create a tenant.
    #[instrument(skip(self))]
    pub async fn create_tenant(&self, name: &str, mobile: Option<&str>) -> Result<Tenant, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_tenant"])
            .start_timer();

        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (tenant_id, name, mobile)
            VALUES ($1, $2, $3)
            RETURNING tenant_id, name, mobile
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(mobile)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create tenant: {}", e)))?;

        timer.observe_duration();

        Ok(tenant)
    }

    /// Find a tenant by name and mobile.
    #[instrument(skip(self))]
    pub async fn find_tenant(
        &self,
        name: &str,
        mobile: Option<&str>,
    ) -> Result<Option<Tenant>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_tenant"])
            .start_timer();

        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT tenant_id, name, mobile
            FROM tenants
            WHERE name = $1 AND mobile IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(name)
        .bind(mobile)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find tenant: {}", e)))?;

        timer.observe_duration();

        Ok(tenant)
    }

    /// Create a lease.
    #[instrument(skip(self, input), fields(unit_id = %input.unit_id))]
    pub async fn create_lease(&self, input: &CreateLease) -> Result<Lease, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_lease"])
            .start_timer();

        let lease = sqlx::query_as::<_, Lease>(
            r#"
            INSERT INTO leases (lease_id, unit_id, tenant_id, start_date, end_date, rent_amount, deposit_amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING lease_id, unit_id, tenant_id, start_date, end_date, rent_amount, deposit_amount, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.unit_id)
        .bind(input.tenant_id)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.rent_amount)
        .bind(input.deposit_amount)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Lease starting {} already exists for this unit",
                    input.start_date
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create lease: {}", e)),
        })?;

        timer.observe_duration();

        info!(lease_id = %lease.lease_id, unit_id = %lease.unit_id, "Lease created");

        Ok(lease)
    }

    /// The governing lease for a unit: the one with the latest start date.
    #[instrument(skip(self), fields(unit_id = %unit_id))]
    pub async fn latest_lease_for_unit(&self, unit_id: Uuid) -> Result<Option<Lease>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["latest_lease_for_unit"])
            .start_timer();

        let lease = sqlx::query_as::<_, Lease>(
            r#"
            SELECT lease_id, unit_id, tenant_id, start_date, end_date, rent_amount, deposit_amount, created_utc
            FROM leases
            WHERE unit_id = $1
            ORDER BY start_date DESC
            LIMIT 1
            "#,
        )
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get lease: {}", e)))?;

        timer.observe_duration();

        Ok(lease)
    }

    /// All leases for a unit, oldest first.
    #[instrument(skip(self), fields(unit_id = %unit_id))]
    pub async fn leases_for_unit(&self, unit_id: Uuid) -> Result<Vec<Lease>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["leases_for_unit"])
            .start_timer();

        let leases = sqlx::query_as::<_, Lease>(
            r#"
            SELECT lease_id, unit_id, tenant_id, start_date, end_date, rent_amount, deposit_amount, created_utc
            FROM leases
            WHERE unit_id = $1
            ORDER BY start_date
            "#,
        )
        .bind(unit_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list leases: {}", e)))?;

        timer.observe_duration();

        Ok(leases)
    }

    /// Leases of every unit under a company, walked through the hierarchy.
    #[instrument(skip(self), fields(company_id = %company_id))]
    pub async fn leases_for_company(&self, company_id: Uuid) -> Result<Vec<Lease>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["leases_for_company"])
            .start_timer();

        let leases = sqlx::query_as::<_, Lease>(
            r#"
            SELECT l.lease_id, l.unit_id, l.tenant_id, l.start_date, l.end_date, l.rent_amount, l.deposit_amount, l.created_utc
            FROM leases l
            JOIN units u ON u.unit_id = l.unit_id
            JOIN buildings b ON b.building_id = u.building_id
            JOIN communities c ON c.community_id = b.community_id
            WHERE c.company_id = $1
            ORDER BY l.start_date
            "#,
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list company leases: {}", e))
        })?;

        timer.observe_duration();

        Ok(leases)
    }

    // -------------------------------------------------------------------------
    // Bill Operations
    // -------------------------------------------------------------------------

    /// Get a bill by ID.
    #[instrument(skip(self), fields(bill_id = %bill_id))]
    pub async fn get_bill(&self, bill_id: Uuid) -> Result<Option<Bill>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_bill"])
            .start_timer();

        let bill = sqlx::query_as::<_, Bill>(
            r#"
            SELECT bill_id, company_id, community_id, unit_id, cycle_start, cycle_end,
                status, total_amount, frozen_snapshot, template_id, created_utc
            FROM bills
            WHERE bill_id = $1
            "#,
        )
        .bind(bill_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get bill: {}", e)))?;

        timer.observe_duration();

        Ok(bill)
    }

    /// Find the bill for a unit and cycle start, the uniqueness key.
    #[instrument(skip(self), fields(unit_id = %unit_id))]
    pub async fn find_bill_for_cycle(
        &self,
        unit_id: Uuid,
        cycle_start: NaiveDate,
    ) -> Result<Option<Bill>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_bill_for_cycle"])
            .start_timer();

        let bill = sqlx::query_as::<_, Bill>(
            r#"
            SELECT bill_id, company_id, community_id, unit_id, cycle_start, cycle_end,
                status, total_amount, frozen_snapshot, template_id, created_utc
            FROM bills
            WHERE unit_id = $1 AND cycle_start = $2
            "#,
        )
        .bind(unit_id)
        .bind(cycle_start)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find bill: {}", e)))?;

        timer.observe_duration();

        Ok(bill)
    }

    /// Line items of a bill in creation order.
    #[instrument(skip(self), fields(bill_id = %bill_id))]
    pub async fn bill_lines(&self, bill_id: Uuid) -> Result<Vec<BillLine>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["bill_lines"])
            .start_timer();

        let lines = sqlx::query_as::<_, BillLine>(
            r#"
            SELECT line_id, bill_id, charge_code, qty, unit_price, amount, sort_order, created_utc
            FROM bill_lines
            WHERE bill_id = $1
            ORDER BY sort_order, created_utc
            "#,
        )
        .bind(bill_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list bill lines: {}", e)))?;

        timer.observe_duration();

        Ok(lines)
    }

    /// Create a bill, its line items and the audit entry as one atomic unit.
    ///
    /// A duplicate `(unit_id, cycle_start)` surfaces as Conflict; the caller
    /// decides whether that means "return the existing bill" (generator) or
    /// a hard failure (template instantiation).
    #[instrument(skip(self, input, lines), fields(unit_id = %input.unit_id))]
    pub async fn create_bill(
        &self,
        input: &NewBill,
        lines: &[CreateBillLine],
        audit_action: &str,
        actor_id: Option<Uuid>,
    ) -> Result<Bill, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_bill"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let bill_id = Uuid::new_v4();
        let bill = sqlx::query_as::<_, Bill>(
            r#"
            INSERT INTO bills (bill_id, company_id, community_id, unit_id, cycle_start, cycle_end, status, total_amount, template_id)
            VALUES ($1, $2, $3, $4, $5, $6, 'draft', $7, $8)
            RETURNING bill_id, company_id, community_id, unit_id, cycle_start, cycle_end,
                status, total_amount, frozen_snapshot, template_id, created_utc
            "#,
        )
        .bind(bill_id)
        .bind(input.company_id)
        .bind(input.community_id)
        .bind(input.unit_id)
        .bind(input.cycle_start)
        .bind(input.cycle_end)
        .bind(input.total_amount)
        .bind(input.template_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Bill already exists for unit {} cycle {}",
                    input.unit_id,
                    input.cycle_start
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create bill: {}", e)),
        })?;

        for line in lines {
            sqlx::query(
                r#"
                INSERT INTO bill_lines (line_id, bill_id, charge_code, qty, unit_price, amount, sort_order)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(bill_id)
            .bind(&line.charge_code)
            .bind(line.qty)
            .bind(line.unit_price)
            .bind(line.amount)
            .bind(line.sort_order)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create bill line: {}", e))
            })?;
        }

        let audit = CreateAuditLog::new(
            actor_id,
            audit_action,
            None,
            Some(format!("bill:{}", bill_id)),
        );
        insert_audit(&mut tx, &audit).await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record audit entry: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        BILLS_TOTAL.with_label_values(&["draft"]).inc();

        info!(
            bill_id = %bill.bill_id,
            unit_id = %bill.unit_id,
            cycle_start = %bill.cycle_start,
            "Draft bill created"
        );

        Ok(bill)
    }

    /// Apply a state-machine operation to a bill.
    ///
    /// Status check and update run under one transaction with the row
    /// locked, so no other operation can interleave between the check and
    /// the write. A wrong-state invocation rolls back without an audit row.
    #[instrument(skip(self), fields(bill_id = %bill_id, operation = op.as_str()))]
    pub async fn transition_bill(
        &self,
        bill_id: Uuid,
        op: BillOperation,
        actor_id: Uuid,
    ) -> Result<Bill, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["transition_bill"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let bill = sqlx::query_as::<_, Bill>(
            r#"
            SELECT bill_id, company_id, community_id, unit_id, cycle_start, cycle_end,
                status, total_amount, frozen_snapshot, template_id, created_utc
            FROM bills
            WHERE bill_id = $1
            FOR UPDATE
            "#,
        )
        .bind(bill_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load bill: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("bill {} not found", bill_id)))?;

        let current = bill.status();
        if !op.is_allowed_from(current) {
            return Err(AppError::StateConflict(anyhow::anyhow!(
                "cannot {} a bill in '{}' state",
                op.as_str(),
                current.as_str()
            )));
        }

        let next = op.resulting_state();

        // The approve step freezes the line items as they stand right now.
        let frozen_snapshot = if op == BillOperation::Approve {
            let lines = sqlx::query_as::<_, BillLine>(
                r#"
                SELECT line_id, bill_id, charge_code, qty, unit_price, amount, sort_order, created_utc
                FROM bill_lines
                WHERE bill_id = $1
                ORDER BY sort_order, created_utc
                "#,
            )
            .bind(bill_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to load bill lines: {}", e))
            })?;

            Some(
                serde_json::to_string(&freeze_lines(&lines)).map_err(|e| {
                    AppError::InternalError(anyhow::anyhow!("Failed to serialize snapshot: {}", e))
                })?,
            )
        } else {
            None
        };

        let updated = sqlx::query_as::<_, Bill>(
            r#"
            UPDATE bills
            SET status = $2,
                frozen_snapshot = COALESCE($3, frozen_snapshot)
            WHERE bill_id = $1
            RETURNING bill_id, company_id, community_id, unit_id, cycle_start, cycle_end,
                status, total_amount, frozen_snapshot, template_id, created_utc
            "#,
        )
        .bind(bill_id)
        .bind(next.as_str())
        .bind(&frozen_snapshot)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update bill: {}", e)))?;

        let audit = CreateAuditLog::new(
            Some(actor_id),
            op.as_str(),
            Some(serde_json::json!({ "status": current.as_str() }).to_string()),
            Some(serde_json::json!({ "status": next.as_str() }).to_string()),
        );
        insert_audit(&mut tx, &audit).await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record audit entry: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        BILLS_TOTAL.with_label_values(&[next.as_str()]).inc();

        info!(
            bill_id = %updated.bill_id,
            from = current.as_str(),
            to = next.as_str(),
            "Bill transitioned"
        );

        Ok(updated)
    }

    // -------------------------------------------------------------------------
    // Charge Item & Template Operations
    // -------------------------------------------------------------------------

    /// Create a charge item.
    #[instrument(skip(self))]
    pub async fn create_charge_item(&self, code: &str, name: &str) -> Result<ChargeItem, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_charge_item"])
            .start_timer();

        let item = sqlx::query_as::<_, ChargeItem>(
            r#"
            INSERT INTO charge_items (charge_item_id, code, name)
            VALUES ($1, $2, $3)
            RETURNING charge_item_id, code, name
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create charge item: {}", e))
        })?;

        timer.observe_duration();

        Ok(item)
    }

    /// Get a charge item by ID.
    #[instrument(skip(self), fields(charge_item_id = %charge_item_id))]
    pub async fn get_charge_item(
        &self,
        charge_item_id: Uuid,
    ) -> Result<Option<ChargeItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_charge_item"])
            .start_timer();

        let item = sqlx::query_as::<_, ChargeItem>(
            "SELECT charge_item_id, code, name FROM charge_items WHERE charge_item_id = $1",
        )
        .bind(charge_item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get charge item: {}", e)))?;

        timer.observe_duration();

        Ok(item)
    }

    /// Create a template with its ordered lines.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_template(
        &self,
        input: &CreateTemplate,
        created_by: Option<Uuid>,
    ) -> Result<BillTemplate, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_template"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let template_id = Uuid::new_v4();
        let template = sqlx::query_as::<_, BillTemplate>(
            r#"
            INSERT INTO bill_templates (template_id, name, description, is_active, created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING template_id, name, description, is_active, created_by, created_utc, updated_utc
            "#,
        )
        .bind(template_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.is_active)
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create template: {}", e)))?;

        for item in &input.items {
            sqlx::query(
                r#"
                INSERT INTO bill_template_lines (template_line_id, template_id, charge_item_id, is_required, sort_order, note)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(template_id)
            .bind(item.charge_item_id)
            .bind(item.is_required)
            .bind(item.sort_order)
            .bind(&item.note)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create template line: {}", e))
            })?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(template_id = %template.template_id, name = %template.name, "Template created");

        Ok(template)
    }

    /// Get a template by ID.
    #[instrument(skip(self), fields(template_id = %template_id))]
    pub async fn get_template(&self, template_id: Uuid) -> Result<Option<BillTemplate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_template"])
            .start_timer();

        let template = sqlx::query_as::<_, BillTemplate>(
            r#"
            SELECT template_id, name, description, is_active, created_by, created_utc, updated_utc
            FROM bill_templates
            WHERE template_id = $1
            "#,
        )
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get template: {}", e)))?;

        timer.observe_duration();

        Ok(template)
    }

    /// List templates, optionally filtered to (in)active ones.
    #[instrument(skip(self))]
    pub async fn list_templates(
        &self,
        active: Option<bool>,
    ) -> Result<Vec<BillTemplate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_templates"])
            .start_timer();

        let templates = sqlx::query_as::<_, BillTemplate>(
            r#"
            SELECT template_id, name, description, is_active, created_by, created_utc, updated_utc
            FROM bill_templates
            WHERE ($1::bool IS NULL OR is_active = $1)
            ORDER BY created_utc
            "#,
        )
        .bind(active)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list templates: {}", e)))?;

        timer.observe_duration();

        Ok(templates)
    }

    /// Lines of a template in sort order.
    #[instrument(skip(self), fields(template_id = %template_id))]
    pub async fn template_lines(
        &self,
        template_id: Uuid,
    ) -> Result<Vec<BillTemplateLine>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["template_lines"])
            .start_timer();

        let lines = sqlx::query_as::<_, BillTemplateLine>(
            r#"
            SELECT template_line_id, template_id, charge_item_id, is_required, sort_order, note
            FROM bill_template_lines
            WHERE template_id = $1
            ORDER BY sort_order
            "#,
        )
        .bind(template_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list template lines: {}", e))
        })?;

        timer.observe_duration();

        Ok(lines)
    }

    /// Update a template; `items = Some(..)` replaces every line.
    #[instrument(skip(self, input), fields(template_id = %template_id))]
    pub async fn update_template(
        &self,
        template_id: Uuid,
        input: &UpdateTemplate,
    ) -> Result<Option<BillTemplate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_template"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let template = sqlx::query_as::<_, BillTemplate>(
            r#"
            UPDATE bill_templates
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                is_active = COALESCE($4, is_active),
                updated_utc = NOW()
            WHERE template_id = $1
            RETURNING template_id, name, description, is_active, created_by, created_utc, updated_utc
            "#,
        )
        .bind(template_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.is_active)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update template: {}", e)))?;

        let Some(template) = template else {
            return Ok(None);
        };

        if let Some(items) = &input.items {
            sqlx::query("DELETE FROM bill_template_lines WHERE template_id = $1")
                .bind(template_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!(
                        "Failed to delete template lines: {}",
                        e
                    ))
                })?;

            for item in items {
                sqlx::query(
                    r#"
                    INSERT INTO bill_template_lines (template_line_id, template_id, charge_item_id, is_required, sort_order, note)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(template_id)
                .bind(item.charge_item_id)
                .bind(item.is_required)
                .bind(item.sort_order)
                .bind(&item.note)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!(
                        "Failed to create template line: {}",
                        e
                    ))
                })?;
            }
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        Ok(Some(template))
    }

    /// Delete a template and its lines.
    #[instrument(skip(self), fields(template_id = %template_id))]
    pub async fn delete_template(&self, template_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_template"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        sqlx::query("DELETE FROM bill_template_lines WHERE template_id = $1")
            .bind(template_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete template lines: {}", e))
            })?;

        let result = sqlx::query("DELETE FROM bill_templates WHERE template_id = $1")
            .bind(template_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete template: {}", e))
            })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(template_id = %template_id, "Template deleted");
        }

        Ok(deleted)
    }

    // -------------------------------------------------------------------------
    // Meter Operations
    // -------------------------------------------------------------------------

    /// Register a meter on a unit; duplicate (unit, kind, slot) is a Conflict.
    #[instrument(skip(self), fields(unit_id = %unit_id))]
    pub async fn create_meter(
        &self,
        unit_id: Uuid,
        kind: MeterKind,
        slot: i32,
        serial: Option<&str>,
    ) -> Result<Meter, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_meter"])
            .start_timer();

        let meter = sqlx::query_as::<_, Meter>(
            r#"
            INSERT INTO meters (meter_id, unit_id, kind, slot, serial)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING meter_id, unit_id, kind, slot, serial
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(unit_id)
        .bind(kind.as_str())
        .bind(slot)
        .bind(serial)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Meter {} slot {} already exists on this unit",
                    kind.as_str(),
                    slot
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create meter: {}", e)),
        })?;

        timer.observe_duration();

        Ok(meter)
    }

    /// Record a reading; duplicate (meter, period) is a Conflict.
    #[instrument(skip(self), fields(meter_id = %meter_id, period = %period))]
    pub async fn record_meter_reading(
        &self,
        meter_id: Uuid,
        period: &str,
        reading: Decimal,
        read_at: DateTime<Utc>,
    ) -> Result<MeterReading, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_meter_reading"])
            .start_timer();

        let row = sqlx::query_as::<_, MeterReading>(
            r#"
            INSERT INTO meter_readings (reading_id, meter_id, period, reading, read_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING reading_id, meter_id, period, reading, read_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(meter_id)
        .bind(period)
        .bind(reading)
        .bind(read_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Reading for period {} already recorded",
                    period
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to record reading: {}", e)),
        })?;

        timer.observe_duration();

        Ok(row)
    }

    // -------------------------------------------------------------------------
    // User Operations
    // -------------------------------------------------------------------------

    /// Create a user; duplicate username is a Conflict.
    #[instrument(skip(self, password_hash))]
    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<User, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_user"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (user_id, username, password_hash, role, is_active)
            VALUES ($1, $2, $3, $4, TRUE)
            RETURNING user_id, username, password_hash, role, is_active
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(password_hash)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("User '{}' already exists", username))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create user: {}", e)),
        })?;

        timer.observe_duration();

        info!(user_id = %user.user_id, username = %user.username, "User created");

        Ok(user)
    }

    /// Find a user by username.
    #[instrument(skip(self))]
    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_user_by_username"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, username, password_hash, role, is_active
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get user: {}", e)))?;

        timer.observe_duration();

        Ok(user)
    }

    // -------------------------------------------------------------------------
    // Audit Operations
    // -------------------------------------------------------------------------

    /// Audit entries for one action, oldest first.
    #[instrument(skip(self))]
    pub async fn audit_entries(&self, action: &str) -> Result<Vec<AuditLog>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["audit_entries"])
            .start_timer();

        let entries = sqlx::query_as::<_, AuditLog>(
            r#"
            SELECT audit_id, actor_id, action, before, after, created_utc
            FROM audit_logs
            WHERE action = $1
            ORDER BY created_utc
            "#,
        )
        .bind(action)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list audit entries: {}", e)))?;

        timer.observe_duration();

        Ok(entries)
    }

    // -------------------------------------------------------------------------
    // Import Batch Operations
    // -------------------------------------------------------------------------

    /// Create a pending import batch record.
    #[instrument(skip(self))]
    pub async fn create_import_batch(
        &self,
        filename: &str,
        kind: ImportKind,
    ) -> Result<ImportBatch, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_import_batch"])
            .start_timer();

        let batch = sqlx::query_as::<_, ImportBatch>(
            r#"
            INSERT INTO import_batches (batch_id, filename, kind, status)
            VALUES ($1, $2, $3, 'pending')
            RETURNING batch_id, filename, kind, status, created_utc, started_utc, finished_utc, result, errors
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(filename)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create import batch: {}", e))
        })?;

        timer.observe_duration();

        info!(batch_id = %batch.batch_id, kind = kind.as_str(), "Import batch created");

        Ok(batch)
    }

    /// Get an import batch by ID.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn get_import_batch(&self, batch_id: Uuid) -> Result<Option<ImportBatch>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_import_batch"])
            .start_timer();

        let batch = sqlx::query_as::<_, ImportBatch>(
            r#"
            SELECT batch_id, filename, kind, status, created_utc, started_utc, finished_utc, result, errors
            FROM import_batches
            WHERE batch_id = $1
            "#,
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get import batch: {}", e)))?;

        timer.observe_duration();

        Ok(batch)
    }

    /// Move a batch to processing and stamp its start time.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn mark_batch_processing(&self, batch_id: Uuid) -> Result<(), AppError> {
        self.update_batch_status(batch_id, ImportBatchStatus::Processing, None, None)
            .await
    }

    /// Record a finished batch with its result summary.
    #[instrument(skip(self, result_json), fields(batch_id = %batch_id))]
    pub async fn mark_batch_done(&self, batch_id: Uuid, result_json: &str) -> Result<(), AppError> {
        self.update_batch_status(batch_id, ImportBatchStatus::Done, Some(result_json), None)
            .await
    }

    /// Record a failed batch with structured error detail.
    #[instrument(skip(self, errors_json), fields(batch_id = %batch_id))]
    pub async fn mark_batch_failed(
        &self,
        batch_id: Uuid,
        errors_json: &str,
    ) -> Result<(), AppError> {
        self.update_batch_status(batch_id, ImportBatchStatus::Failed, None, Some(errors_json))
            .await
    }

    async fn update_batch_status(
        &self,
        batch_id: Uuid,
        status: ImportBatchStatus,
        result_json: Option<&str>,
        errors_json: Option<&str>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_batch_status"])
            .start_timer();

        let started = status == ImportBatchStatus::Processing;
        let finished = matches!(status, ImportBatchStatus::Done | ImportBatchStatus::Failed);

        sqlx::query(
            r#"
            UPDATE import_batches
            SET status = $2,
                started_utc = CASE WHEN $3 THEN NOW() ELSE started_utc END,
                finished_utc = CASE WHEN $4 THEN NOW() ELSE finished_utc END,
                result = COALESCE($5, result),
                errors = COALESCE($6, errors)
            WHERE batch_id = $1
            "#,
        )
        .bind(batch_id)
        .bind(status.as_str())
        .bind(started)
        .bind(finished)
        .bind(result_json)
        .bind(errors_json)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update import batch: {}", e))
        })?;

        timer.observe_duration();

        info!(batch_id = %batch_id, status = status.as_str(), "Import batch status updated");

        Ok(())
    }
}
