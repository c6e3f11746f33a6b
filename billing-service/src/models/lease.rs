//! Tenant and lease models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub name: String,
    pub mobile: Option<String>,
}

/// A lease binds a tenant to a unit over an inclusive date interval.
///
/// `end_date = None` means open-ended: the lease extends to infinity for
/// every interval computation. No two leases for the same unit may overlap.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Lease {
    pub lease_id: Uuid,
    pub unit_id: Uuid,
    pub tenant_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub rent_amount: Decimal,
    pub deposit_amount: Decimal,
    pub created_utc: DateTime<Utc>,
}

impl Lease {
    /// Inclusive-interval overlap against `[start, end]`.
    ///
    /// Both boundary dates count as overlapping; an open end on either side
    /// is treated as extending to infinity.
    pub fn overlaps(&self, start: NaiveDate, end: Option<NaiveDate>) -> bool {
        let self_ends_after_start = match self.end_date {
            Some(self_end) => start <= self_end,
            None => true,
        };
        let other_ends_after_self_start = match end {
            Some(end) => self.start_date <= end,
            None => true,
        };
        self_ends_after_start && other_ends_after_self_start
    }
}

/// Input for creating a lease.
#[derive(Debug, Clone)]
pub struct CreateLease {
    pub unit_id: Uuid,
    pub tenant_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub rent_amount: Decimal,
    pub deposit_amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(start: (i32, u32, u32), end: Option<(i32, u32, u32)>) -> Lease {
        Lease {
            lease_id: Uuid::new_v4(),
            unit_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            start_date: date(start),
            end_date: end.map(date),
            rent_amount: Decimal::new(1000, 0),
            deposit_amount: Decimal::ZERO,
            created_utc: Utc::now(),
        }
    }

    fn date((y, m, d): (i32, u32, u32)) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn disjoint_intervals_do_not_overlap() {
        let existing = lease((2026, 1, 1), Some((2026, 6, 30)));
        assert!(!existing.overlaps(date((2026, 7, 1)), Some(date((2026, 12, 31)))));
    }

    #[test]
    fn boundary_dates_are_inclusive() {
        // A new lease starting on the existing lease's end date overlaps.
        let existing = lease((2026, 1, 1), Some((2026, 6, 30)));
        assert!(existing.overlaps(date((2026, 6, 30)), Some(date((2026, 12, 31)))));
        // And the mirror case: new lease ending on the existing start date.
        let existing = lease((2026, 7, 1), Some((2027, 6, 30)));
        assert!(existing.overlaps(date((2026, 1, 1)), Some(date((2026, 7, 1)))));
    }

    #[test]
    fn open_ended_lease_extends_to_infinity() {
        let existing = lease((2026, 1, 1), None);
        assert!(existing.overlaps(date((2030, 1, 1)), Some(date((2030, 12, 31)))));
        assert!(existing.overlaps(date((2030, 1, 1)), None));
    }

    #[test]
    fn open_ended_candidate_overlaps_future_lease() {
        let existing = lease((2027, 1, 1), Some((2027, 12, 31)));
        assert!(existing.overlaps(date((2026, 1, 1)), None));
    }

    #[test]
    fn interval_entirely_before_does_not_overlap() {
        let existing = lease((2026, 7, 1), None);
        assert!(!existing.overlaps(date((2026, 1, 1)), Some(date((2026, 6, 30)))));
    }
}
