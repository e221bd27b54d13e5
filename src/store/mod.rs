mod durable;
mod memory;

pub use durable::WalReservationStore;
pub use memory::InMemoryReservationStore;

use std::io;

use async_trait::async_trait;

use crate::model::Reservation;

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Closed(&'static str),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "store I/O error: {e}"),
            StoreError::Closed(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

/// Persistent home of reservation records. Single-key operations only;
/// `find_all` has no ordering guarantee.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn find_all(&self) -> Result<Vec<Reservation>, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Reservation>, StoreError>;

    /// Insert or replace by id.
    async fn save(&self, reservation: Reservation) -> Result<Reservation, StoreError>;

    async fn delete(&self, reservation: &Reservation) -> Result<(), StoreError>;
}
