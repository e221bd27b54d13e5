use chrono::{Months, NaiveDate};

use crate::limits::*;
use crate::model::{User, days_between};

use super::{EngineError, RangeError};

/// Latest allowed start for a stay booked on `today`.
pub fn booking_horizon(today: NaiveDate) -> NaiveDate {
    today
        .checked_add_months(Months::new(BOOKING_HORIZON_MONTHS))
        .unwrap_or(NaiveDate::MAX)
}

/// Check a proposed stay `[start, end)`. The first broken rule is reported.
pub fn validate_window(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Result<(), RangeError> {
    if end < start {
        return Err(RangeError::EndBeforeStart);
    }
    if end == start {
        return Err(RangeError::ZeroLength);
    }
    if start < today {
        return Err(RangeError::StartInPast);
    }
    if start == today {
        return Err(RangeError::SameDayStart);
    }
    if start > booking_horizon(today) {
        return Err(RangeError::BeyondHorizon);
    }
    if days_between(start, end) > MAX_STAY_DAYS {
        return Err(RangeError::ExceedsMaxStay);
    }
    Ok(())
}

pub fn validate_user(user: Option<User>) -> Result<User, EngineError> {
    user.ok_or(EngineError::MissingUser)
}

/// Check an availability query window `[from, until)`. Today itself may be queried.
pub fn validate_query(from: NaiveDate, until: NaiveDate, today: NaiveDate) -> Result<(), RangeError> {
    if from < today {
        return Err(RangeError::StartInPast);
    }
    if until < from {
        return Err(RangeError::EndBeforeStart);
    }
    if until == from {
        return Err(RangeError::ZeroLength);
    }
    if days_between(from, until) > MAX_AVAILABILITY_WINDOW_DAYS {
        return Err(RangeError::QueryWindowTooWide);
    }
    Ok(())
}

/// Fill in an omitted query bound: `from` defaults to today, `until` to the
/// booking horizon.
pub fn default_window(
    from: Option<NaiveDate>,
    until: Option<NaiveDate>,
    today: NaiveDate,
) -> (NaiveDate, NaiveDate) {
    (
        from.unwrap_or(today),
        until.unwrap_or_else(|| booking_horizon(today)),
    )
}
