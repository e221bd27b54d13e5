use std::io;
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{info, warn};

use crate::model::{Event, Reservation, ReservationId};
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

use super::{ReservationStore, StoreError};

type AppendResponse = oneshot::Sender<io::Result<()>>;

enum WalCommand {
    Append { event: Event, response: AppendResponse },
    Control(Control),
}

enum Control {
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task owning the log. Appends that queue up while a flush is
/// in progress are committed together with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            WalCommand::Control(control) => {
                handle_control(&mut wal, control);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                WalCommand::Control(control) => {
                    deferred = Some(control);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(control) = deferred {
            handle_control(&mut wal, control);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, AppendResponse)>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    // Every caller in a failed batch is told so; none of its records may
    // survive a restart.
    if let Err(e) = &result {
        warn!("WAL batch of {} events failed: {e}", batch.len());
        if wal.rollback().is_ok() {
            info!("WAL rolled back to the last committed record");
        }
    }
    for (_, response) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = response.send(reply);
    }
}

fn handle_control(wal: &mut Wal, control: Control) {
    match control {
        Control::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        Control::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
    }
}

/// Reservations held in memory and made durable through a write-ahead log.
/// Every save/delete is fsynced before it becomes visible.
pub struct WalReservationStore {
    reservations: DashMap<ReservationId, Reservation>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Shared by writers, exclusive for compaction: a snapshot must not
    /// miss a record that is already in the log but not yet in the map.
    write_gate: RwLock<()>,
}

impl WalReservationStore {
    /// Replay the log at `path` and start its writer task. Must be called
    /// inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let reservations = DashMap::new();
        for event in events {
            match event {
                Event::ReservationSaved(r) => {
                    reservations.insert(r.id.clone(), r);
                }
                Event::ReservationDeleted { id } => {
                    reservations.remove(&id);
                }
            }
        }
        info!(
            "replayed {} reservations from {}",
            reservations.len(),
            path.display()
        );

        Ok(Self {
            reservations,
            wal_tx,
            write_gate: RwLock::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    async fn wal_append(&self, event: Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event, response: tx })
            .await
            .map_err(|_| StoreError::Closed("WAL writer shut down"))?;
        rx.await
            .map_err(|_| StoreError::Closed("WAL writer dropped response"))??;
        Ok(())
    }

    async fn control<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Control,
    ) -> Result<T, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Control(make(tx)))
            .await
            .map_err(|_| StoreError::Closed("WAL writer shut down"))?;
        rx.await
            .map_err(|_| StoreError::Closed("WAL writer dropped response"))
    }

    pub async fn appends_since_compact(&self) -> Result<u64, StoreError> {
        self.control(|response| Control::AppendsSinceCompact { response })
            .await
    }

    /// Rewrite the log as one record per live reservation. Returns the
    /// number of records kept.
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let _exclusive = self.write_gate.write().await;
        let events: Vec<Event> = self
            .reservations
            .iter()
            .map(|e| Event::ReservationSaved(e.value().clone()))
            .collect();
        let kept = events.len();
        self.control(|response| Control::Compact { events, response })
            .await??;
        Ok(kept)
    }
}

#[async_trait]
impl ReservationStore for WalReservationStore {
    async fn find_all(&self) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.reservations.iter().map(|e| e.value().clone()).collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Reservation>, StoreError> {
        Ok(self.reservations.get(id).map(|e| e.value().clone()))
    }

    async fn save(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        let _shared = self.write_gate.read().await;
        self.wal_append(Event::ReservationSaved(reservation.clone()))
            .await?;
        self.reservations
            .insert(reservation.id.clone(), reservation.clone());
        Ok(reservation)
    }

    async fn delete(&self, reservation: &Reservation) -> Result<(), StoreError> {
        let _shared = self.write_gate.read().await;
        self.wal_append(Event::ReservationDeleted {
            id: reservation.id.clone(),
        })
        .await?;
        self.reservations.remove(&reservation.id);
        Ok(())
    }
}
