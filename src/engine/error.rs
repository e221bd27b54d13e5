use chrono::NaiveDate;

use crate::model::ReservationId;
use crate::store::StoreError;

/// A date window that is malformed or breaks a booking rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    EndBeforeStart,
    ZeroLength,
    StartInPast,
    SameDayStart,
    BeyondHorizon,
    ExceedsMaxStay,
    QueryWindowTooWide,
}

impl std::fmt::Display for RangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            RangeError::EndBeforeStart => "end before start",
            RangeError::ZeroLength => "zero-length window",
            RangeError::StartInPast => "start in the past",
            RangeError::SameDayStart => "must book at least one day ahead",
            RangeError::BeyondHorizon => "beyond booking horizon",
            RangeError::ExceedsMaxStay => "exceeds maximum stay",
            RangeError::QueryWindowTooWide => "query window too wide",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for RangeError {}

/// Why the requested dates could not be booked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// Dates held by a persisted reservation.
    Reserved(Vec<NaiveDate>),
    /// Dates locked by another in-flight request.
    Contended(Vec<NaiveDate>),
}

impl Conflict {
    pub fn dates(&self) -> &[NaiveDate] {
        match self {
            Conflict::Reserved(dates) | Conflict::Contended(dates) => dates,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Conflict::Reserved(_) => "reserved",
            Conflict::Contended(_) => "contended",
        }
    }
}

/// What the caller should make of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Bad input; retrying unchanged will fail again.
    Rejected,
    /// Dates taken or being taken; retry later or pick other dates.
    Unavailable,
    NotFound,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    Range(RangeError),
    MissingUser,
    NotFound(ReservationId),
    OwnerChange(ReservationId),
    Conflict(Conflict),
    Store(StoreError),
    Aborted(String),
}

impl EngineError {
    pub fn signal(&self) -> Signal {
        match self {
            EngineError::Range(_) | EngineError::MissingUser | EngineError::OwnerChange(_) => {
                Signal::Rejected
            }
            EngineError::Conflict(_) => Signal::Unavailable,
            EngineError::NotFound(_) => Signal::NotFound,
            EngineError::Store(_) | EngineError::Aborted(_) => Signal::Internal,
        }
    }
}

fn join_dates(dates: &[NaiveDate]) -> String {
    dates
        .iter()
        .map(NaiveDate::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Range(e) => write!(f, "{e}"),
            EngineError::MissingUser => write!(f, "reservation must have a user"),
            EngineError::NotFound(id) => write!(f, "no reservation with id={id} was found"),
            EngineError::OwnerChange(id) => write!(
                f,
                "cannot change the owner of reservation {id}, only its dates"
            ),
            EngineError::Conflict(Conflict::Reserved(dates)) => write!(
                f,
                "The campsite is not available for those dates: {}",
                join_dates(dates)
            ),
            EngineError::Conflict(Conflict::Contended(dates)) => write!(
                f,
                "those dates are being booked by another request, retry shortly: {}",
                join_dates(dates)
            ),
            EngineError::Store(e) => write!(f, "{e}"),
            EngineError::Aborted(e) => write!(f, "booking task aborted: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<RangeError> for EngineError {
    fn from(e: RangeError) -> Self {
        EngineError::Range(e)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}

impl From<Conflict> for EngineError {
    fn from(c: Conflict) -> Self {
        EngineError::Conflict(c)
    }
}
