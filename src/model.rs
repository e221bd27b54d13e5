use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Opaque reservation identity, assigned at creation.
pub type ReservationId = String;

/// Every calendar date `d` with `start <= d < end`, ascending.
pub fn dates_between(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d < end)
}

/// Number of nights in `[start, end)`. Negative when `end` precedes `start`.
pub fn days_between(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub email: String,
    pub full_name: String,
}

impl User {
    pub fn new(email: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            full_name: full_name.into(),
        }
    }
}

/// A stay on the campsite over the half-open window `[start_date, end_date)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: ReservationId,
    pub user: User,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Reservation {
    pub fn new(user: User, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        debug_assert!(start_date < end_date, "reservation must end after it starts");
        Self {
            id: Ulid::new().to_string(),
            user,
            start_date,
            end_date,
        }
    }

    /// Every night this reservation holds, ascending.
    pub fn occupied_dates(&self) -> impl Iterator<Item = NaiveDate> {
        dates_between(self.start_date, self.end_date)
    }

    pub fn occupies(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date < self.end_date
    }

    /// Half-open overlap with `[from, until)`.
    pub fn overlaps(&self, from: NaiveDate, until: NaiveDate) -> bool {
        self.start_date < until && from < self.end_date
    }

    /// Same identity and owner, new window.
    pub fn with_dates(&self, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            id: self.id.clone(),
            user: self.user.clone(),
            start_date,
            end_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub available_dates: Vec<NaiveDate>,
    pub from: NaiveDate,
    pub until: NaiveDate,
}

/// Token identifying the in-flight request holding date locks.
/// Distinct from the user who owns a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockOwner(String);

impl LockOwner {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LockOwner {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for LockOwner {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for LockOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live advisory lock on one calendar date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateLock {
    pub date: NaiveDate,
    pub owner: LockOwner,
}

/// The durable record format of the write-ahead log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationSaved(Reservation),
    ReservationDeleted { id: ReservationId },
}
