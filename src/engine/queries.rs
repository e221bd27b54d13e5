use chrono::NaiveDate;

use crate::model::{Availability, Reservation};

use super::availability::{availability, reserved_dates};
use super::validate::{default_window, validate_query};
use super::{Engine, EngineError};

impl Engine {
    /// Free dates in `[from, until)`. Takes no locks; a booking committing
    /// concurrently may or may not be reflected.
    pub async fn get_availability(
        &self,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<Availability, EngineError> {
        validate_query(from, until, self.today())?;
        let existing = self.reservations.find_all().await?;
        let reserved = reserved_dates(&existing, from, until, None);
        Ok(availability(from, until, &reserved))
    }

    /// Like `get_availability`, with omitted bounds defaulting to today and
    /// one month from today.
    pub async fn get_availability_or_default(
        &self,
        from: Option<NaiveDate>,
        until: Option<NaiveDate>,
    ) -> Result<Availability, EngineError> {
        let (from, until) = default_window(from, until, self.today());
        self.get_availability(from, until).await
    }

    /// All reservations ordered by start date.
    pub async fn list_reservations(&self) -> Result<Vec<Reservation>, EngineError> {
        let mut all = self.reservations.find_all().await?;
        all.sort_by(|a, b| a.start_date.cmp(&b.start_date).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    pub async fn get_reservation(&self, id: &str) -> Result<Reservation, EngineError> {
        self.reservations
            .find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }
}
