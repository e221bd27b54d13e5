mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;
mod validate;

pub use availability::{availability, reserved_dates};
pub use conflict::find_conflicts;
pub use error::{Conflict, EngineError, RangeError, Signal};
pub use validate::{booking_horizon, default_window, validate_query, validate_user, validate_window};

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::lock::DateLockCoordinator;
use crate::model::LockOwner;
use crate::observability::LOCK_ACQUIRE_DURATION_SECONDS;
use crate::store::ReservationStore;

/// Books the campsite. Cheap to clone; every clone shares the same store,
/// lock coordinator and clock.
#[derive(Clone)]
pub struct Engine {
    reservations: Arc<dyn ReservationStore>,
    locks: Arc<dyn DateLockCoordinator>,
    clock: Arc<dyn Clock>,
}

/// Dates locked by one commit. Released explicitly on the normal path; if
/// the commit unwinds instead, `Drop` hands the release to the runtime.
struct HeldDates {
    locks: Arc<dyn DateLockCoordinator>,
    owner: LockOwner,
    dates: Vec<NaiveDate>,
}

impl HeldDates {
    async fn release(mut self) {
        let dates = std::mem::take(&mut self.dates);
        if !dates.is_empty() {
            self.locks.release_all(&dates, &self.owner).await;
        }
    }
}

impl Drop for HeldDates {
    fn drop(&mut self) {
        if self.dates.is_empty() {
            return;
        }
        let dates = std::mem::take(&mut self.dates);
        let owner = self.owner.clone();
        let locks = self.locks.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("commit for {owner} interrupted, releasing {} dates", dates.len());
                handle.spawn(async move {
                    locks.release_all(&dates, &owner).await;
                });
            }
            Err(_) => warn!("commit for {owner} interrupted outside a runtime, {} dates stay locked", dates.len()),
        }
    }
}

/// Run `commit` on its own task. A caller that stops waiting (timeout,
/// disconnect) does not cancel it, so held locks are always released.
async fn detached<T, F>(commit: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(commit)
        .await
        .map_err(|e| EngineError::Aborted(e.to_string()))?
}

impl Engine {
    pub fn new(
        reservations: Arc<dyn ReservationStore>,
        locks: Arc<dyn DateLockCoordinator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reservations,
            locks,
            clock,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Lock every date, run `commit`, then release exactly the dates this
    /// call locked. Contention is reported before `commit` ever runs.
    async fn with_date_locks<T, C, Fut>(
        &self,
        dates: Vec<NaiveDate>,
        commit: C,
    ) -> Result<T, EngineError>
    where
        C: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let owner = LockOwner::new();
        let started = Instant::now();
        let acquisition = self.locks.acquire_all(&dates, &owner).await;
        metrics::histogram!(LOCK_ACQUIRE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let held = HeldDates {
            locks: self.locks.clone(),
            owner,
            dates: acquisition.acquired,
        };

        if !acquisition.contended.is_empty() {
            debug!(
                "{} of {} dates contended for {}",
                acquisition.contended.len(),
                dates.len(),
                held.owner
            );
            held.release().await;
            return Err(Conflict::Contended(acquisition.contended).into());
        }

        let result = commit().await;
        held.release().await;
        result
    }
}
