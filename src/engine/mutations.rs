use chrono::NaiveDate;
use tracing::{debug, info};

use crate::model::{Reservation, ReservationId, User, dates_between};
use crate::observability::*;

use super::conflict::find_conflicts;
use super::validate::{validate_user, validate_window};
use super::{Conflict, Engine, EngineError, detached};

fn record_outcome(result: &Result<Reservation, EngineError>, success_counter: &'static str) {
    match result {
        Ok(_) => metrics::counter!(success_counter).increment(1),
        Err(EngineError::Conflict(c)) => {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL, "reason" => c.reason()).increment(1)
        }
        Err(_) => {}
    }
}

impl Engine {
    pub async fn create_reservation(
        &self,
        user: Option<User>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Reservation, EngineError> {
        validate_window(start, end, self.today())?;
        let user = validate_user(user)?;

        let engine = self.clone();
        let result = detached(async move { engine.commit_create(user, start, end).await }).await;
        record_outcome(&result, RESERVATIONS_CREATED_TOTAL);
        match &result {
            Ok(r) => info!("reservation {} created for [{start}, {end})", r.id),
            Err(e) => debug!("create [{start}, {end}) refused: {e}"),
        }
        result
    }

    async fn commit_create(
        &self,
        user: User,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Reservation, EngineError> {
        let dates = dates_between(start, end).collect();
        self.with_date_locks(dates, move || async move {
            // Re-read under the locks: anything persisted before we locked is visible now.
            let existing = self.reservations.find_all().await?;
            let conflicts = find_conflicts(start, end, &existing, None);
            if !conflicts.is_empty() {
                return Err(Conflict::Reserved(conflicts).into());
            }
            Ok(self
                .reservations
                .save(Reservation::new(user, start, end))
                .await?)
        })
        .await
    }

    /// Move a reservation to `[start, end)`. The owner cannot change.
    ///
    /// The reservation is re-read under the new dates' locks and a delete seen
    /// there yields `NotFound`. Deletion takes no locks, so a delete landing
    /// after that re-read but before the save is overwritten by the move.
    pub async fn update_reservation(
        &self,
        id: &str,
        start: NaiveDate,
        end: NaiveDate,
        user: Option<User>,
    ) -> Result<Reservation, EngineError> {
        let stored = self
            .reservations
            .find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if user.as_ref() != Some(&stored.user) {
            return Err(EngineError::OwnerChange(stored.id));
        }
        validate_window(start, end, self.today())?;

        let engine = self.clone();
        let id = stored.id;
        let result = detached(async move { engine.commit_update(id, start, end).await }).await;
        record_outcome(&result, RESERVATIONS_UPDATED_TOTAL);
        match &result {
            Ok(r) => info!("reservation {} moved to [{start}, {end})", r.id),
            Err(e) => debug!("update to [{start}, {end}) refused: {e}"),
        }
        result
    }

    async fn commit_update(
        &self,
        id: ReservationId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Reservation, EngineError> {
        let dates = dates_between(start, end).collect();
        self.with_date_locks(dates, move || async move {
            let existing = self.reservations.find_all().await?;
            // Deleted while we were locking.
            let Some(current) = existing.iter().find(|r| r.id == id) else {
                return Err(EngineError::NotFound(id));
            };
            let conflicts = find_conflicts(start, end, &existing, Some(id.as_str()));
            if !conflicts.is_empty() {
                return Err(Conflict::Reserved(conflicts).into());
            }
            let moved = current.with_dates(start, end);
            Ok(self.reservations.save(moved).await?)
        })
        .await
    }

    /// Deletion only frees dates, so it takes no locks.
    pub async fn delete_reservation(&self, id: &str) -> Result<(), EngineError> {
        let stored = self
            .reservations
            .find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        self.reservations.delete(&stored).await?;
        metrics::counter!(RESERVATIONS_DELETED_TOTAL).increment(1);
        info!("reservation {} deleted", stored.id);
        Ok(())
    }
}
