//! Billing cycle arithmetic.
//!
//! Cycles span exactly one anchored month: the anchor day is the
//! day-of-month of the lease's start date, and each month's boundary is that
//! day clamped to the month's length. Clamping is recomputed from the anchor
//! on every month step, so an anchor of 31 lands on Feb 28 and back on
//! Mar 31.

use chrono::{Datelike, Duration, NaiveDate};

/// Date at (year, month, anchor day), clamped to the month's last day when
/// the anchor day does not exist in that month.
fn anchored_date(year: i32, month: u32, anchor_day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, anchor_day).unwrap_or_else(|| {
        let (next_year, next_month) = shift_month(year, month, 1);
        NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .and_then(|d| d.pred_opt())
            .expect("last day of a valid month")
    })
}

/// (year, month) shifted by `months`, which may be negative.
fn shift_month(year: i32, month: u32, months: i32) -> (i32, u32) {
    let zero_based = year * 12 + month as i32 - 1 + months;
    (zero_based.div_euclid(12), zero_based.rem_euclid(12) as u32 + 1)
}

/// Compute the billing cycle containing `target` for a lease starting at
/// `lease_start`.
///
/// The cycle starts on the anchor day of `target`'s month when `target` has
/// reached it, otherwise on the anchor day of the previous month. The cycle
/// end is the day before the next cycle's start, inclusive.
pub fn compute_billing_cycle(lease_start: NaiveDate, target: NaiveDate) -> (NaiveDate, NaiveDate) {
    let anchor_day = lease_start.day();

    let candidate = anchored_date(target.year(), target.month(), anchor_day);
    let cycle_start = if target >= candidate {
        candidate
    } else {
        let (year, month) = shift_month(target.year(), target.month(), -1);
        anchored_date(year, month, anchor_day)
    };

    let (next_year, next_month) = shift_month(cycle_start.year(), cycle_start.month(), 1);
    let next_start = anchored_date(next_year, next_month, anchor_day);
    let cycle_end = next_start - Duration::days(1);

    (cycle_start, cycle_end)
}
