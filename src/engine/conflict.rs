use chrono::NaiveDate;

use crate::model::Reservation;

use super::availability::reserved_dates;

/// Every date of `[start, end)` already held by a reservation, ascending.
/// `exclude` names the reservation being moved, which may overlap its own
/// previous dates.
pub fn find_conflicts(
    start: NaiveDate,
    end: NaiveDate,
    existing: &[Reservation],
    exclude: Option<&str>,
) -> Vec<NaiveDate> {
    reserved_dates(existing, start, end, exclude)
        .into_iter()
        .collect()
}
