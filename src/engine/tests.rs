use super::*;
use crate::clock::FixedClock;
use crate::limits::*;
use crate::lock::{
    Acquisition, DateLockCoordinator, DateLockStore, GlobalCoordinator, InMemoryDateLocks,
    PerDateCoordinator,
};
use crate::model::*;
use crate::store::{InMemoryReservationStore, ReservationStore, StoreError, WalReservationStore};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_test::{assert_err, assert_ok};

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn camper() -> User {
    User::new("camper@example.com", "Happy Camper")
}

fn other_camper() -> User {
    User::new("other@example.com", "Other Camper")
}

/// Engine on 2024-01-10 with in-memory store and per-date locks.
fn test_engine() -> (Engine, Arc<InMemoryReservationStore>, Arc<InMemoryDateLocks>) {
    test_engine_at(d("2024-01-10"))
}

fn test_engine_at(today: NaiveDate) -> (Engine, Arc<InMemoryReservationStore>, Arc<InMemoryDateLocks>) {
    let store = Arc::new(InMemoryReservationStore::new());
    let locks = Arc::new(InMemoryDateLocks::new());
    let engine = Engine::new(
        store.clone(),
        Arc::new(PerDateCoordinator::new(locks.clone())),
        Arc::new(FixedClock(today)),
    );
    (engine, store, locks)
}

fn booked(start: &str, end: &str) -> Reservation {
    Reservation::new(camper(), d(start), d(end))
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("campsite_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

// ── Window validation ────────────────────────────────────

#[test]
fn validate_accepts_every_valid_window() {
    let today = d("2024-01-10");
    let horizon = booking_horizon(today);
    let mut start = today.succ_opt().unwrap();
    while start <= horizon {
        for nights in 1..=MAX_STAY_DAYS {
            let end = start + chrono::Duration::days(nights);
            assert_eq!(validate_window(start, end, today), Ok(()), "[{start}, {end})");
        }
        start = start.succ_opt().unwrap();
    }
}

#[test]
fn validate_rules_in_order() {
    let today = d("2024-01-10");
    // end before start wins over start in the past
    assert_eq!(
        validate_window(d("2024-01-05"), d("2024-01-04"), today),
        Err(RangeError::EndBeforeStart)
    );
    // zero length wins over same-day start
    assert_eq!(
        validate_window(d("2024-01-10"), d("2024-01-10"), today),
        Err(RangeError::ZeroLength)
    );
    assert_eq!(
        validate_window(d("2024-01-09"), d("2024-01-11"), today),
        Err(RangeError::StartInPast)
    );
    assert_eq!(
        validate_window(d("2024-01-10"), d("2024-01-11"), today),
        Err(RangeError::SameDayStart)
    );
    // beyond horizon wins over exceeding max stay
    assert_eq!(
        validate_window(d("2024-02-11"), d("2024-02-20"), today),
        Err(RangeError::BeyondHorizon)
    );
    assert_eq!(
        validate_window(d("2024-01-11"), d("2024-01-15"), today),
        Err(RangeError::ExceedsMaxStay)
    );
}

#[test]
fn validate_horizon_is_one_calendar_month() {
    let today = d("2024-01-10");
    assert_eq!(validate_window(d("2024-02-10"), d("2024-02-11"), today), Ok(()));

    // Month-end clamps: Jan 31 + 1 month = Feb 29 in a leap year
    let today = d("2024-01-31");
    assert_eq!(booking_horizon(today), d("2024-02-29"));
    assert_eq!(validate_window(d("2024-02-29"), d("2024-03-01"), today), Ok(()));
    assert_eq!(
        validate_window(d("2024-03-01"), d("2024-03-02"), today),
        Err(RangeError::BeyondHorizon)
    );
}

#[test]
fn validate_user_requires_identity() {
    assert!(matches!(validate_user(None), Err(EngineError::MissingUser)));
    assert_eq!(validate_user(Some(camper())).unwrap(), camper());
}

#[test]
fn validate_query_rules() {
    let today = d("2024-01-10");
    assert_eq!(validate_query(d("2024-01-10"), d("2024-01-11"), today), Ok(()));
    assert_eq!(
        validate_query(d("2024-01-09"), d("2024-01-11"), today),
        Err(RangeError::StartInPast)
    );
    assert_eq!(
        validate_query(d("2024-01-12"), d("2024-01-11"), today),
        Err(RangeError::EndBeforeStart)
    );
    assert_eq!(
        validate_query(d("2024-01-10"), d("2024-01-10"), today),
        Err(RangeError::ZeroLength)
    );
    let too_far = today + chrono::Duration::days(MAX_AVAILABILITY_WINDOW_DAYS + 1);
    assert_eq!(
        validate_query(today, too_far, today),
        Err(RangeError::QueryWindowTooWide)
    );
}

#[test]
fn default_window_is_today_to_horizon() {
    let today = d("2024-01-10");
    assert_eq!(default_window(None, None, today), (today, d("2024-02-10")));
    assert_eq!(
        default_window(Some(d("2024-01-15")), None, today),
        (d("2024-01-15"), d("2024-02-10"))
    );
}

// ── Availability / conflict projection ───────────────────

#[test]
fn reserved_dates_include_stays_starting_before_window() {
    let existing = vec![booked("2024-01-09", "2024-01-12")];
    let reserved = reserved_dates(&existing, d("2024-01-10"), d("2024-01-15"), None);
    assert_eq!(
        reserved.into_iter().collect::<Vec<_>>(),
        vec![d("2024-01-10"), d("2024-01-11")]
    );
}

#[test]
fn availability_excludes_reserved_and_keeps_order() {
    let existing = vec![
        booked("2024-01-14", "2024-01-16"),
        booked("2024-01-11", "2024-01-12"),
        booked("2024-01-20", "2024-01-23"),
    ];
    let (from, until) = (d("2024-01-10"), d("2024-01-18"));
    let reserved = reserved_dates(&existing, from, until, None);
    let result = availability(from, until, &reserved);

    assert_eq!(
        result.available_dates,
        vec![
            d("2024-01-10"),
            d("2024-01-12"),
            d("2024-01-13"),
            d("2024-01-16"),
            d("2024-01-17"),
        ]
    );
    assert_eq!(
        result.available_dates.len() as i64,
        days_between(from, until) - reserved.len() as i64
    );
    assert!(result.available_dates.iter().all(|d| !reserved.contains(d)));
}

#[test]
fn conflicts_list_every_overlapping_date() {
    let existing = vec![booked("2024-01-11", "2024-01-13"), booked("2024-01-14", "2024-01-15")];
    assert_eq!(
        find_conflicts(d("2024-01-12"), d("2024-01-15"), &existing, None),
        vec![d("2024-01-12"), d("2024-01-14")]
    );
    assert!(find_conflicts(d("2024-01-13"), d("2024-01-14"), &existing, None).is_empty());
}

#[test]
fn conflicts_skip_excluded_reservation() {
    let mine = booked("2024-01-11", "2024-01-13");
    let existing = vec![mine.clone(), booked("2024-01-14", "2024-01-15")];
    assert!(find_conflicts(d("2024-01-12"), d("2024-01-14"), &existing, Some(&mine.id)).is_empty());
    assert_eq!(
        find_conflicts(d("2024-01-12"), d("2024-01-15"), &existing, Some(&mine.id)),
        vec![d("2024-01-14")]
    );
}

// ── Engine: create / update / delete / query ─────────────

#[tokio::test]
async fn scenario_a_second_overlapping_create_conflicts() {
    let (engine, store, locks) = test_engine();

    let first = assert_ok!(
        engine
            .create_reservation(Some(camper()), d("2024-01-11"), d("2024-01-13"))
            .await
    );
    assert_eq!(
        first.occupied_dates().collect::<Vec<_>>(),
        vec![d("2024-01-11"), d("2024-01-12")]
    );

    let err = assert_err!(
        engine
            .create_reservation(Some(other_camper()), d("2024-01-11"), d("2024-01-12"))
            .await
    );
    match &err {
        EngineError::Conflict(Conflict::Reserved(dates)) => assert_eq!(dates, &vec![d("2024-01-11")]),
        other => panic!("expected reserved conflict, got {other:?}"),
    }
    assert_eq!(err.signal(), Signal::Unavailable);
    assert_eq!(
        err.to_string(),
        "The campsite is not available for those dates: 2024-01-11"
    );
    assert_eq!(store.len(), 1);
    assert!(locks.is_empty());
}

#[tokio::test]
async fn scenario_b_zero_length_availability_rejected() {
    let (engine, _, _) = test_engine();
    let err = engine
        .get_availability(d("2024-01-10"), d("2024-01-10"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Range(RangeError::ZeroLength)));
    assert_eq!(err.signal(), Signal::Rejected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn scenario_c_one_winner_among_ten_thousand() {
    let (engine, store, locks) = test_engine();

    let mut handles = Vec::with_capacity(10_000);
    for i in 0..10_000 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let user = User::new(format!("camper{i}@example.com"), format!("Camper {i}"));
            engine
                .create_reservation(Some(user), d("2024-01-15"), d("2024-01-16"))
                .await
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => created += 1,
            Err(EngineError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(conflicts, 9_999);
    assert_eq!(store.len(), 1);
    assert!(locks.is_empty());
}

#[tokio::test]
async fn scenario_d_owner_change_rejected_and_dates_unchanged() {
    let (engine, store, _) = test_engine();
    let r = engine
        .create_reservation(Some(camper()), d("2024-01-11"), d("2024-01-13"))
        .await
        .unwrap();

    let err = engine
        .update_reservation(&r.id, d("2024-01-20"), d("2024-01-21"), Some(other_camper()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::OwnerChange(ref id) if id == &r.id));
    assert_eq!(err.signal(), Signal::Rejected);

    let stored = store.find_by_id(&r.id).await.unwrap().unwrap();
    assert_eq!(stored, r);

    // No user at all is also an owner change
    assert!(matches!(
        engine
            .update_reservation(&r.id, d("2024-01-20"), d("2024-01-21"), None)
            .await,
        Err(EngineError::OwnerChange(_))
    ));
}

#[tokio::test]
async fn create_validates_window_before_user() {
    let (engine, store, _) = test_engine();
    assert!(matches!(
        engine.create_reservation(None, d("2024-01-13"), d("2024-01-11")).await,
        Err(EngineError::Range(RangeError::EndBeforeStart))
    ));
    let err = engine
        .create_reservation(None, d("2024-01-11"), d("2024-01-13"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MissingUser));
    assert_eq!(err.signal(), Signal::Rejected);
    assert!(store.is_empty());
}

#[tokio::test]
async fn create_then_delete_restores_availability() {
    let (engine, _, _) = test_engine();
    let (s, e) = (d("2024-01-11"), d("2024-01-14"));

    let r = engine.create_reservation(Some(camper()), s, e).await.unwrap();
    assert!(engine.get_availability(s, e).await.unwrap().available_dates.is_empty());

    engine.delete_reservation(&r.id).await.unwrap();
    let restored = engine.get_availability(s, e).await.unwrap();
    assert_eq!(restored.available_dates, dates_between(s, e).collect::<Vec<_>>());
    assert_eq!((restored.from, restored.until), (s, e));
}

#[tokio::test]
async fn availability_reports_gaps_between_reservations() {
    let (engine, _, _) = test_engine();
    engine
        .create_reservation(Some(camper()), d("2024-01-11"), d("2024-01-13"))
        .await
        .unwrap();
    engine
        .create_reservation(Some(other_camper()), d("2024-01-14"), d("2024-01-15"))
        .await
        .unwrap();

    let result = engine
        .get_availability(d("2024-01-12"), d("2024-01-16"))
        .await
        .unwrap();
    assert_eq!(result.available_dates, vec![d("2024-01-13"), d("2024-01-15")]);
}

#[tokio::test]
async fn availability_default_window() {
    let (engine, _, _) = test_engine();
    let result = engine.get_availability_or_default(None, None).await.unwrap();
    assert_eq!(result.from, d("2024-01-10"));
    assert_eq!(result.until, d("2024-02-10"));
    assert_eq!(result.available_dates.len(), 31);
}

#[tokio::test]
async fn update_may_overlap_own_dates() {
    let (engine, store, locks) = test_engine();
    let r = engine
        .create_reservation(Some(camper()), d("2024-01-11"), d("2024-01-13"))
        .await
        .unwrap();

    let moved = engine
        .update_reservation(&r.id, d("2024-01-12"), d("2024-01-15"), Some(camper()))
        .await
        .unwrap();
    assert_eq!(moved.id, r.id);
    assert_eq!((moved.start_date, moved.end_date), (d("2024-01-12"), d("2024-01-15")));
    assert_eq!(store.find_by_id(&r.id).await.unwrap(), Some(moved));
    assert_eq!(store.len(), 1);
    assert!(locks.is_empty());

    // The freed night is bookable again
    engine
        .create_reservation(Some(other_camper()), d("2024-01-11"), d("2024-01-12"))
        .await
        .unwrap();
}

#[tokio::test]
async fn update_conflicting_with_other_reservation() {
    let (engine, store, _) = test_engine();
    let mine = engine
        .create_reservation(Some(camper()), d("2024-01-11"), d("2024-01-12"))
        .await
        .unwrap();
    engine
        .create_reservation(Some(other_camper()), d("2024-01-13"), d("2024-01-15"))
        .await
        .unwrap();

    let err = engine
        .update_reservation(&mine.id, d("2024-01-12"), d("2024-01-15"), Some(camper()))
        .await
        .unwrap_err();
    match err {
        EngineError::Conflict(Conflict::Reserved(dates)) => {
            assert_eq!(dates, vec![d("2024-01-13"), d("2024-01-14")])
        }
        other => panic!("expected reserved conflict, got {other:?}"),
    }
    assert_eq!(store.find_by_id(&mine.id).await.unwrap(), Some(mine));
}

#[tokio::test]
async fn update_validates_window_after_ownership() {
    let (engine, _, _) = test_engine();
    let r = engine
        .create_reservation(Some(camper()), d("2024-01-11"), d("2024-01-12"))
        .await
        .unwrap();
    assert!(matches!(
        engine
            .update_reservation(&r.id, d("2024-01-11"), d("2024-01-16"), Some(camper()))
            .await,
        Err(EngineError::Range(RangeError::ExceedsMaxStay))
    ));
}

#[tokio::test]
async fn missing_reservation_is_not_found() {
    let (engine, _, _) = test_engine();
    let err = engine
        .update_reservation("nope", d("2024-01-11"), d("2024-01-12"), Some(camper()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(ref id) if id == "nope"));
    assert_eq!(err.signal(), Signal::NotFound);

    assert!(matches!(
        engine.delete_reservation("nope").await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.get_reservation("nope").await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn list_reservations_ordered_by_start() {
    let (engine, _, _) = test_engine();
    for (s, e) in [("2024-01-20", "2024-01-21"), ("2024-01-11", "2024-01-12"), ("2024-01-15", "2024-01-17")] {
        engine.create_reservation(Some(camper()), d(s), d(e)).await.unwrap();
    }
    let starts: Vec<_> = engine
        .list_reservations()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.start_date)
        .collect();
    assert_eq!(starts, vec![d("2024-01-11"), d("2024-01-15"), d("2024-01-20")]);
}

// ── Lock discipline ──────────────────────────────────────

#[tokio::test]
async fn contended_dates_report_conflict_and_keep_foreign_lock() {
    let (engine, store, locks) = test_engine();
    let stranger = LockOwner::new();
    locks.try_acquire(d("2024-01-12"), &stranger).await.unwrap();

    let err = engine
        .create_reservation(Some(camper()), d("2024-01-11"), d("2024-01-14"))
        .await
        .unwrap_err();
    match &err {
        EngineError::Conflict(Conflict::Contended(dates)) => assert_eq!(dates, &vec![d("2024-01-12")]),
        other => panic!("expected contention, got {other:?}"),
    }
    assert_eq!(err.signal(), Signal::Unavailable);
    assert!(store.is_empty());

    // Our two dates were released; the stranger's lock is untouched.
    assert_eq!(locks.len(), 1);
    assert_eq!(locks.holder(d("2024-01-12")).unwrap().owner, stranger);
}

#[tokio::test]
async fn update_onto_contended_date_leaves_reservation_in_place() {
    let (engine, store, locks) = test_engine();
    let r = engine
        .create_reservation(Some(camper()), d("2024-01-11"), d("2024-01-13"))
        .await
        .unwrap();
    let stranger = LockOwner::new();
    locks.try_acquire(d("2024-01-15"), &stranger).await.unwrap();

    let err = engine
        .update_reservation(&r.id, d("2024-01-14"), d("2024-01-17"), Some(camper()))
        .await
        .unwrap_err();
    match &err {
        EngineError::Conflict(Conflict::Contended(dates)) => assert_eq!(dates, &vec![d("2024-01-15")]),
        other => panic!("expected contention, got {other:?}"),
    }

    assert_eq!(store.find_by_id(&r.id).await.unwrap(), Some(r));
    assert_eq!(locks.len(), 1);
    assert_eq!(locks.holder(d("2024-01-15")).unwrap().owner, stranger);
}

/// Records every release request and forwards to a real coordinator.
struct RecordingCoordinator {
    inner: PerDateCoordinator<Arc<InMemoryDateLocks>>,
    acquired: Mutex<HashMap<LockOwner, Vec<NaiveDate>>>,
    released: Mutex<Vec<(LockOwner, Vec<NaiveDate>)>>,
}

#[async_trait]
impl DateLockCoordinator for RecordingCoordinator {
    async fn acquire_all(&self, dates: &[NaiveDate], owner: &LockOwner) -> Acquisition {
        let acquisition = self.inner.acquire_all(dates, owner).await;
        self.acquired
            .lock()
            .unwrap()
            .insert(owner.clone(), acquisition.acquired.clone());
        acquisition
    }

    async fn release_all(&self, dates: &[NaiveDate], owner: &LockOwner) {
        self.released
            .lock()
            .unwrap()
            .push((owner.clone(), dates.to_vec()));
        self.inner.release_all(dates, owner).await;
    }
}

#[tokio::test]
async fn releases_exactly_the_newly_acquired_subset() {
    let locks = Arc::new(InMemoryDateLocks::new());
    let coordinator = Arc::new(RecordingCoordinator {
        inner: PerDateCoordinator::new(locks.clone()),
        acquired: Mutex::new(HashMap::new()),
        released: Mutex::new(Vec::new()),
    });
    let engine = Engine::new(
        Arc::new(InMemoryReservationStore::new()),
        coordinator.clone(),
        Arc::new(FixedClock(d("2024-01-10"))),
    );

    let stranger = LockOwner::new();
    locks.try_acquire(d("2024-01-11"), &stranger).await.unwrap();
    locks.try_acquire(d("2024-01-13"), &stranger).await.unwrap();

    let _ = engine
        .create_reservation(Some(camper()), d("2024-01-11"), d("2024-01-14"))
        .await
        .unwrap_err();

    let released = coordinator.released.lock().unwrap().clone();
    assert_eq!(released.len(), 1);
    let (owner, dates) = &released[0];
    assert_eq!(dates, &vec![d("2024-01-12")]);
    assert_eq!(coordinator.acquired.lock().unwrap()[owner], vec![d("2024-01-12")]);
    assert_eq!(locks.len(), 2);
}

/// Store whose writes fail or stall on demand.
#[derive(Default)]
struct FaultyStore {
    inner: InMemoryReservationStore,
    fail_saves: bool,
    panic_on_save: bool,
    save_delay: Option<Duration>,
    /// Deletes a reservation right after handing it out, as a concurrent
    /// cancel would.
    delete_after_lookup: bool,
}

#[async_trait]
impl ReservationStore for FaultyStore {
    async fn find_all(&self) -> Result<Vec<Reservation>, StoreError> {
        self.inner.find_all().await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Reservation>, StoreError> {
        let found = self.inner.find_by_id(id).await?;
        if let (true, Some(r)) = (self.delete_after_lookup, &found) {
            self.inner.delete(r).await?;
        }
        Ok(found)
    }

    async fn save(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        if let Some(delay) = self.save_delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_on_save {
            panic!("store exploded");
        }
        if self.fail_saves {
            return Err(StoreError::Closed("disk on fire"));
        }
        self.inner.save(reservation).await
    }

    async fn delete(&self, reservation: &Reservation) -> Result<(), StoreError> {
        self.inner.delete(reservation).await
    }
}

fn engine_over(store: Arc<FaultyStore>) -> (Engine, Arc<InMemoryDateLocks>) {
    let locks = Arc::new(InMemoryDateLocks::new());
    let engine = Engine::new(
        store,
        Arc::new(PerDateCoordinator::new(locks.clone())),
        Arc::new(FixedClock(d("2024-01-10"))),
    );
    (engine, locks)
}

#[tokio::test]
async fn store_failure_releases_locks() {
    let store = Arc::new(FaultyStore {
        fail_saves: true,
        ..Default::default()
    });
    let (engine, locks) = engine_over(store);

    let err = engine
        .create_reservation(Some(camper()), d("2024-01-11"), d("2024-01-13"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));
    assert_eq!(err.signal(), Signal::Internal);
    assert!(locks.is_empty());
}

#[tokio::test]
async fn update_after_concurrent_delete_is_not_found() {
    let store = Arc::new(FaultyStore {
        delete_after_lookup: true,
        ..Default::default()
    });
    let r = store.inner.save(booked("2024-01-11", "2024-01-13")).await.unwrap();
    let (engine, locks) = engine_over(store.clone());

    let err = engine
        .update_reservation(&r.id, d("2024-01-14"), d("2024-01-16"), Some(camper()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(ref id) if id == &r.id));
    assert!(store.inner.is_empty());
    assert!(locks.is_empty());
}

#[tokio::test]
async fn panicking_commit_still_releases_locks() {
    let store = Arc::new(FaultyStore {
        panic_on_save: true,
        ..Default::default()
    });
    let (engine, locks) = engine_over(store);

    let err = engine
        .create_reservation(Some(camper()), d("2024-01-11"), d("2024-01-13"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Aborted(_)));

    for _ in 0..50 {
        if locks.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(locks.is_empty());
}

#[tokio::test]
async fn caller_timeout_does_not_abandon_locks() {
    let store = Arc::new(FaultyStore {
        save_delay: Some(Duration::from_millis(100)),
        ..Default::default()
    });
    let (engine, locks) = engine_over(store.clone());

    let attempt = tokio::time::timeout(
        Duration::from_millis(10),
        engine.create_reservation(Some(camper()), d("2024-01-11"), d("2024-01-13")),
    )
    .await;
    assert!(attempt.is_err(), "caller should have timed out");

    // The commit keeps running to completion on its own task.
    for _ in 0..50 {
        if locks.is_empty() && !store.inner.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(locks.is_empty());
    assert_eq!(store.inner.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_date_is_ever_double_booked() {
    let (engine, _, locks) = test_engine();

    let mut handles = Vec::new();
    for round in 0..4 {
        for offset in 1..=28 {
            for nights in 1..=MAX_STAY_DAYS {
                let engine = engine.clone();
                let start = d("2024-01-10") + chrono::Duration::days(offset);
                let end = start + chrono::Duration::days(nights);
                let user = User::new(format!("c{round}-{offset}-{nights}@example.com"), "C");
                handles.push(tokio::spawn(async move {
                    engine.create_reservation(Some(user), start, end).await
                }));
            }
        }
    }
    for h in handles {
        match h.await.unwrap() {
            Ok(_) | Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let all = engine.list_reservations().await.unwrap();
    assert!(!all.is_empty());
    let mut seen = std::collections::HashSet::new();
    for r in &all {
        for day in r.occupied_dates() {
            assert!(seen.insert(day), "{day} booked twice");
        }
    }
    assert!(locks.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn global_coordinator_serializes_creates() {
    let store = Arc::new(InMemoryReservationStore::new());
    let coordinator = Arc::new(GlobalCoordinator::new());
    let engine = Engine::new(
        store.clone(),
        coordinator.clone(),
        Arc::new(FixedClock(d("2024-01-10"))),
    );

    let mut handles = Vec::new();
    for i in 0..500 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let user = User::new(format!("camper{i}@example.com"), "C");
            engine
                .create_reservation(Some(user), d("2024-01-20"), d("2024-01-22"))
                .await
        }));
    }
    let created = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();

    assert_eq!(created, 1);
    assert_eq!(store.len(), 1);
    assert_eq!(coordinator.holder(), None);
}

#[tokio::test]
async fn engine_over_wal_store_survives_restart() {
    let path = test_wal_path("engine_restart.wal");
    let created = {
        let store = Arc::new(WalReservationStore::open(&path).unwrap());
        let engine = Engine::new(
            store,
            Arc::new(PerDateCoordinator::new(InMemoryDateLocks::new())),
            Arc::new(FixedClock(d("2024-01-10"))),
        );
        engine
            .create_reservation(Some(camper()), d("2024-01-11"), d("2024-01-13"))
            .await
            .unwrap()
    };

    let store = Arc::new(WalReservationStore::open(&path).unwrap());
    let engine = Engine::new(
        store,
        Arc::new(PerDateCoordinator::new(InMemoryDateLocks::new())),
        Arc::new(FixedClock(d("2024-01-10"))),
    );
    assert_eq!(engine.get_reservation(&created.id).await.unwrap(), created);
    let err = engine
        .create_reservation(Some(other_camper()), d("2024-01-12"), d("2024-01-14"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(Conflict::Reserved(ref dates)) if dates == &vec![d("2024-01-12")]));
    let _ = std::fs::remove_file(&path);
}
