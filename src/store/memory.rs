use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::{Reservation, ReservationId};

use super::{ReservationStore, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryReservationStore {
    reservations: DashMap<ReservationId, Reservation>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn find_all(&self) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.reservations.iter().map(|e| e.value().clone()).collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Reservation>, StoreError> {
        Ok(self.reservations.get(id).map(|e| e.value().clone()))
    }

    async fn save(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        self.reservations
            .insert(reservation.id.clone(), reservation.clone());
        Ok(reservation)
    }

    async fn delete(&self, reservation: &Reservation) -> Result<(), StoreError> {
        self.reservations.remove(&reservation.id);
        Ok(())
    }
}
