use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::model::{Availability, Reservation, dates_between};

/// Dates in `[from, until)` occupied by any reservation other than `exclude`.
///
/// A reservation counts when its whole window overlaps the query, so a stay
/// starting before `from` still blocks the dates it holds inside it. Each
/// reservation is expanded only over its clamped overlap.
pub fn reserved_dates(
    reservations: &[Reservation],
    from: NaiveDate,
    until: NaiveDate,
    exclude: Option<&str>,
) -> BTreeSet<NaiveDate> {
    reservations
        .iter()
        .filter(|r| exclude != Some(r.id.as_str()))
        .filter(|r| r.overlaps(from, until))
        .flat_map(|r| dates_between(r.start_date.max(from), r.end_date.min(until)))
        .collect()
}

/// Free dates in `[from, until)`, ascending.
pub fn availability(from: NaiveDate, until: NaiveDate, reserved: &BTreeSet<NaiveDate>) -> Availability {
    Availability {
        available_dates: dates_between(from, until)
            .filter(|d| !reserved.contains(d))
            .collect(),
        from,
        until,
    }
}
