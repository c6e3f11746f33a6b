//! The billing engine: bill generation, lifecycle transitions and template
//! instantiation.
//!
//! Every operation takes the acting identity explicitly and checks its role
//! before touching the store. Transition legality lives in the
//! `BillOperation` table; this module wires it to the persistence layer.

use crate::models::{Actor, Bill, BillOperation, CreateBillLine, NewBill, Role};
use crate::services::cycle::compute_billing_cycle;
use crate::services::database::Database;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Charge code of the auto-computed rent line.
const RENT_CHARGE_CODE: &str = "rent";

#[derive(Clone)]
pub struct BillingEngine {
    db: Arc<Database>,
}

impl BillingEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Generate (or fetch) the bill for a unit's cycle containing
    /// `target_date`.
    ///
    /// Idempotent: when a bill already exists for the computed
    /// `(unit_id, cycle_start)` it is returned unchanged, with no new lines
    /// and no audit entry. Otherwise the bill, its rent line and the audit
    /// entry are written as one atomic unit.
    #[instrument(skip(self, actor), fields(unit_id = %unit_id, actor_id = %actor.id))]
    pub async fn generate_bill_for_unit(
        &self,
        unit_id: Uuid,
        target_date: NaiveDate,
        actor: &Actor,
    ) -> Result<Bill, AppError> {
        actor.require(Role::Clerk)?;

        let lease = self
            .db
            .latest_lease_for_unit(unit_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("no lease for unit {}", unit_id)))?;

        let (cycle_start, cycle_end) = compute_billing_cycle(lease.start_date, target_date);

        if let Some(existing) = self.db.find_bill_for_cycle(unit_id, cycle_start).await? {
            info!(
                bill_id = %existing.bill_id,
                cycle_start = %cycle_start,
                "Bill already exists for cycle, returning unchanged"
            );
            return Ok(existing);
        }

        let ctx = self.db.get_unit_context(unit_id).await?;

        let new_bill = NewBill {
            company_id: ctx.company.company_id,
            community_id: ctx.community.community_id,
            unit_id,
            cycle_start,
            cycle_end,
            total_amount: lease.rent_amount,
            template_id: None,
        };
        let rent_line = CreateBillLine {
            charge_code: RENT_CHARGE_CODE.to_string(),
            qty: Decimal::ONE,
            unit_price: lease.rent_amount,
            amount: lease.rent_amount,
            sort_order: 0,
        };

        match self
            .db
            .create_bill(&new_bill, &[rent_line], "create_bill", Some(actor.id))
            .await
        {
            Ok(bill) => Ok(bill),
            // A racing generator hit the (unit_id, cycle_start) constraint
            // first; its bill is the bill.
            Err(AppError::Conflict(_)) => self
                .db
                .find_bill_for_cycle(unit_id, cycle_start)
                .await?
                .ok_or_else(|| {
                    AppError::Conflict(anyhow::anyhow!(
                        "bill for unit {} cycle {} vanished after duplicate rejection",
                        unit_id,
                        cycle_start
                    ))
                }),
            Err(e) => Err(e),
        }
    }

    /// Generate bills for every leased unit under a company.
    ///
    /// Each bill runs in its own transaction; the first failure aborts the
    /// loop and surfaces the error.
    #[instrument(skip(self, actor), fields(company_id = %company_id, actor_id = %actor.id))]
    pub async fn generate_batch_for_company(
        &self,
        company_id: Uuid,
        target_date: NaiveDate,
        actor: &Actor,
    ) -> Result<Vec<Bill>, AppError> {
        actor.require(Role::Clerk)?;

        let leases = self.db.leases_for_company(company_id).await?;
        let mut bills = Vec::with_capacity(leases.len());
        for lease in &leases {
            let bill = self
                .generate_bill_for_unit(lease.unit_id, target_date, actor)
                .await?;
            bills.push(bill);
        }

        info!(
            company_id = %company_id,
            generated = bills.len(),
            "Batch bill generation completed"
        );

        Ok(bills)
    }

    /// Submit a draft bill for approval.
    #[instrument(skip(self, actor), fields(bill_id = %bill_id, actor_id = %actor.id))]
    pub async fn submit_bill(&self, bill_id: Uuid, actor: &Actor) -> Result<Bill, AppError> {
        actor.require(Role::Clerk)?;
        self.db
            .transition_bill(bill_id, BillOperation::Submit, actor.id)
            .await
    }

    /// Approve a submitted bill, freezing its line-item snapshot.
    #[instrument(skip(self, actor), fields(bill_id = %bill_id, actor_id = %actor.id))]
    pub async fn approve_bill(&self, bill_id: Uuid, actor: &Actor) -> Result<Bill, AppError> {
        actor.require(Role::Finance)?;
        self.db
            .transition_bill(bill_id, BillOperation::Approve, actor.id)
            .await
    }

    /// Issue an approved bill.
    #[instrument(skip(self, actor), fields(bill_id = %bill_id, actor_id = %actor.id))]
    pub async fn issue_bill(&self, bill_id: Uuid, actor: &Actor) -> Result<Bill, AppError> {
        actor.require(Role::Finance)?;
        self.db
            .transition_bill(bill_id, BillOperation::Issue, actor.id)
            .await
    }

    /// Void a bill from any non-terminal state.
    #[instrument(skip(self, actor), fields(bill_id = %bill_id, actor_id = %actor.id))]
    pub async fn void_bill(&self, bill_id: Uuid, actor: &Actor) -> Result<Bill, AppError> {
        actor.require(Role::Admin)?;
        self.db
            .transition_bill(bill_id, BillOperation::Void, actor.id)
            .await
    }

    /// Stamp a template onto a new draft bill for the unit's cycle at
    /// `date`.
    ///
    /// Unlike the generator this is a strict duplicate check: an existing
    /// bill for the computed cycle is a Conflict, since a template may be
    /// instantiated at many cycles but never twice for the same one.
    #[instrument(skip(self, actor), fields(template_id = %template_id, unit_id = %unit_id, actor_id = %actor.id))]
    pub async fn instantiate_template(
        &self,
        template_id: Uuid,
        unit_id: Uuid,
        date: NaiveDate,
        actor: &Actor,
    ) -> Result<Bill, AppError> {
        actor.require(Role::Clerk)?;

        let template = self
            .db
            .get_template(template_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("template {} not found", template_id))
            })?;

        let lease = self
            .db
            .latest_lease_for_unit(unit_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("no lease for unit {}", unit_id)))?;

        let (cycle_start, cycle_end) = compute_billing_cycle(lease.start_date, date);

        if self
            .db
            .find_bill_for_cycle(unit_id, cycle_start)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "bill already exists for unit {} cycle {}",
                unit_id,
                cycle_start
            )));
        }

        let ctx = self.db.get_unit_context(unit_id).await?;
        let template_lines = self.db.template_lines(template_id).await?;

        let mut lines = Vec::with_capacity(template_lines.len());
        for template_line in &template_lines {
            // Deleted charge items degrade to a synthetic label; the line
            // survives with its ordering intact.
            let charge_code = match self.db.get_charge_item(template_line.charge_item_id).await? {
                Some(item) => item.code,
                None => format!("item-{}", template_line.charge_item_id),
            };
            lines.push(CreateBillLine {
                charge_code,
                qty: Decimal::ONE,
                unit_price: Decimal::ZERO,
                amount: Decimal::ZERO,
                sort_order: template_line.sort_order,
            });
        }

        let new_bill = NewBill {
            company_id: ctx.company.company_id,
            community_id: ctx.community.community_id,
            unit_id,
            cycle_start,
            cycle_end,
            total_amount: Decimal::ZERO,
            template_id: Some(template.template_id),
        };

        let bill = self
            .db
            .create_bill(&new_bill, &lines, "instantiate_template", Some(actor.id))
            .await?;

        info!(
            bill_id = %bill.bill_id,
            template_id = %template_id,
            lines = lines.len(),
            "Template instantiated"
        );

        Ok(bill)
    }
}
