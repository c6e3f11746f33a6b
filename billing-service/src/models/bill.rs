//! Bill lifecycle models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Bill status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Draft,
    Submitted,
    Approved,
    Issued,
    Void,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Draft => "draft",
            BillStatus::Submitted => "submitted",
            BillStatus::Approved => "approved",
            BillStatus::Issued => "issued",
            BillStatus::Void => "void",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "submitted" => BillStatus::Submitted,
            "approved" => BillStatus::Approved,
            "issued" => BillStatus::Issued,
            "void" => BillStatus::Void,
            _ => BillStatus::Draft,
        }
    }

    /// Issued and void bills accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BillStatus::Issued | BillStatus::Void)
    }
}

/// State-machine operations on a bill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillOperation {
    Submit,
    Approve,
    Issue,
    Void,
}

impl BillOperation {
    /// Audit action name.
    pub fn as_str(&self) -> &'static str {
        match self {
            BillOperation::Submit => "submit",
            BillOperation::Approve => "approve",
            BillOperation::Issue => "issue",
            BillOperation::Void => "void",
        }
    }

    /// Statuses the bill must currently be in for this operation.
    pub fn required_states(&self) -> &'static [BillStatus] {
        match self {
            BillOperation::Submit => &[BillStatus::Draft],
            BillOperation::Approve => &[BillStatus::Submitted],
            BillOperation::Issue => &[BillStatus::Approved],
            BillOperation::Void => &[BillStatus::Draft, BillStatus::Submitted, BillStatus::Approved],
        }
    }

    /// Status the bill moves to when the operation succeeds.
    pub fn resulting_state(&self) -> BillStatus {
        match self {
            BillOperation::Submit => BillStatus::Submitted,
            BillOperation::Approve => BillStatus::Approved,
            BillOperation::Issue => BillStatus::Issued,
            BillOperation::Void => BillStatus::Void,
        }
    }

    pub fn is_allowed_from(&self, status: BillStatus) -> bool {
        self.required_states().contains(&status)
    }
}

/// A bill for one unit over one billing cycle.
///
/// `(unit_id, cycle_start)` is unique: at most one bill per unit per cycle.
/// Company and community references are denormalized from the unit's
/// hierarchy at creation time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bill {
    pub bill_id: Uuid,
    pub company_id: Uuid,
    pub community_id: Uuid,
    pub unit_id: Uuid,
    pub cycle_start: NaiveDate,
    pub cycle_end: NaiveDate,
    pub status: String,
    pub total_amount: Decimal,
    pub frozen_snapshot: Option<String>,
    pub template_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl Bill {
    pub fn status(&self) -> BillStatus {
        BillStatus::from_string(&self.status)
    }
}

/// Line item on a bill.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillLine {
    pub line_id: Uuid,
    pub bill_id: Uuid,
    pub charge_code: String,
    pub qty: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a bill.
#[derive(Debug, Clone)]
pub struct NewBill {
    pub company_id: Uuid,
    pub community_id: Uuid,
    pub unit_id: Uuid,
    pub cycle_start: NaiveDate,
    pub cycle_end: NaiveDate,
    pub total_amount: Decimal,
    pub template_id: Option<Uuid>,
}

/// Input for creating a bill line.
#[derive(Debug, Clone)]
pub struct CreateBillLine {
    pub charge_code: String,
    pub qty: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub sort_order: i32,
}

/// One line of a bill's frozen snapshot.
///
/// Decimal values are carried as exact strings so the snapshot reproduces
/// the approved amounts regardless of later line edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenLine {
    pub charge_code: String,
    pub qty: String,
    pub unit_price: String,
    pub amount: String,
}

impl From<&BillLine> for FrozenLine {
    fn from(line: &BillLine) -> Self {
        Self {
            charge_code: line.charge_code.clone(),
            qty: line.qty.to_string(),
            unit_price: line.unit_price.to_string(),
            amount: line.amount.to_string(),
        }
    }
}

/// Serialize the current line items into the snapshot stored at approval.
pub fn freeze_lines(lines: &[BillLine]) -> Vec<FrozenLine> {
    lines.iter().map(FrozenLine::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [BillStatus; 5] = [
        BillStatus::Draft,
        BillStatus::Submitted,
        BillStatus::Approved,
        BillStatus::Issued,
        BillStatus::Void,
    ];

    const ALL_OPS: [BillOperation; 4] = [
        BillOperation::Submit,
        BillOperation::Approve,
        BillOperation::Issue,
        BillOperation::Void,
    ];

    #[test]
    fn transition_table_matches_lifecycle() {
        assert!(BillOperation::Submit.is_allowed_from(BillStatus::Draft));
        assert!(BillOperation::Approve.is_allowed_from(BillStatus::Submitted));
        assert!(BillOperation::Issue.is_allowed_from(BillStatus::Approved));
        for status in [BillStatus::Draft, BillStatus::Submitted, BillStatus::Approved] {
            assert!(BillOperation::Void.is_allowed_from(status));
        }
    }

    #[test]
    fn terminal_states_accept_no_operation() {
        for status in ALL_STATES.into_iter().filter(BillStatus::is_terminal) {
            for op in ALL_OPS {
                assert!(
                    !op.is_allowed_from(status),
                    "{:?} must be rejected from {:?}",
                    op,
                    status
                );
            }
        }
    }

    #[test]
    fn exactly_one_forward_operation_per_live_state() {
        // Apart from void, each non-terminal state admits a single operation.
        for status in [BillStatus::Draft, BillStatus::Submitted, BillStatus::Approved] {
            let forward: Vec<_> = ALL_OPS
                .into_iter()
                .filter(|op| *op != BillOperation::Void && op.is_allowed_from(status))
                .collect();
            assert_eq!(forward.len(), 1);
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in ALL_STATES {
            assert_eq!(BillStatus::from_string(status.as_str()), status);
        }
    }

    #[test]
    fn frozen_lines_carry_exact_decimal_strings() {
        let line = BillLine {
            line_id: Uuid::new_v4(),
            bill_id: Uuid::new_v4(),
            charge_code: "rent".to_string(),
            qty: Decimal::new(1, 0),
            unit_price: Decimal::new(100050, 2),
            amount: Decimal::new(100050, 2),
            sort_order: 0,
            created_utc: Utc::now(),
        };
        let frozen = freeze_lines(std::slice::from_ref(&line));
        assert_eq!(frozen.len(), 1);
        assert_eq!(frozen[0].charge_code, "rent");
        assert_eq!(frozen[0].qty, "1");
        assert_eq!(frozen[0].unit_price, "1000.50");
        assert_eq!(frozen[0].amount, "1000.50");
    }
}
