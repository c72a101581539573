mod conflict;
mod error;
pub mod ledger;
mod mutations;
mod queries;
pub mod transitions;

pub(crate) use conflict::resolve_span;
pub use error::{EngineError, ErrorKind, StoreError};
pub use ledger::{Hold, ProviderLedger};
pub use mutations::{NewBooking, Outcome};
pub use transitions::{next_status, Transition};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, error};

use crate::clock::Clock;
use crate::model::*;
use crate::verification::VerificationGate;
use crate::wal::Wal;

pub type SharedLedger = Arc<RwLock<ProviderLedger>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first Append, drains whatever else is already queued, then
/// does a single flush_sync for the whole batch before answering everyone.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch = match cmd {
            WalCommand::Append { event, response } => vec![(event, response)],
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Flush what we have before compacting or reporting counts.
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    let result = match append_err {
        Some(e) => Err(e),
        None => wal.flush_sync(),
    };
    // Every caller in a failed batch is told it failed, so none of its
    // records may survive to be replayed.
    if let Err(e) = &result {
        error!("WAL batch of {} failed: {e}", batch.len());
        if let Err(rollback) = wal.rollback() {
            error!("WAL rollback failed: {rollback}");
        }
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// Slot ledger and booking state machine.
///
/// State is sharded per provider: one `ProviderLedger` behind one lock holds
/// that provider's bookings and active holds, so reservation and status
/// changes for a provider are serialized while different providers proceed
/// in parallel.
pub struct Engine {
    ledgers: DashMap<UserId, SharedLedger>,
    /// Reverse lookup: booking id → provider.
    booking_to_provider: DashMap<BookingId, UserId>,
    wal_tx: mpsc::Sender<WalCommand>,
    gate: VerificationGate,
    clock: Arc<dyn Clock>,
    /// Mutations take this shared; compaction takes it exclusively.
    commit_gate: RwLock<()>,
}

/// Apply an event directly to a ledger (caller holds the lock).
fn apply_to_ledger(ledger: &mut ProviderLedger, event: &Event, index: &DashMap<BookingId, UserId>) {
    match event {
        Event::BookingCreated {
            id,
            subject,
            tenant,
            provider,
            slot,
            notes,
            at,
            actor,
        } => {
            let booking = Booking {
                id: *id,
                subject: *subject,
                tenant: *tenant,
                provider: *provider,
                slot: *slot,
                status: BookingStatus::Pending,
                notes: notes.clone(),
                payment: None,
                created_at: *at,
                history: vec![HistoryEntry {
                    status: BookingStatus::Pending,
                    at: *at,
                    actor: *actor,
                }],
            };
            insert_booking(ledger, booking, index);
        }
        Event::StatusChanged {
            id,
            status,
            at,
            actor,
            ..
        } => {
            if let Some(booking) = ledger.bookings.get_mut(id) {
                booking.record(*status, *at, *actor);
                if !status.holds_slot() && ledger.release_hold(*id).is_some() {
                    metrics::gauge!(crate::observability::BOOKINGS_ACTIVE).decrement(1.0);
                }
            }
        }
        Event::Rescheduled {
            id, slot, at, actor, ..
        } => {
            if let Some(booking) = ledger.bookings.get_mut(id) {
                booking.slot = *slot;
                booking.record(BookingStatus::Rescheduled, *at, *actor);
                ledger.release_hold(*id);
                ledger.insert_hold(Hold {
                    booking: *id,
                    span: *slot,
                });
            }
        }
        Event::NotesUpdated { id, notes, .. } => {
            if let Some(booking) = ledger.bookings.get_mut(id) {
                booking.notes = notes.clone();
            }
        }
        Event::PaymentAttached { id, payment, .. } => {
            if let Some(booking) = ledger.bookings.get_mut(id) {
                booking.payment = Some(payment.clone());
            }
        }
        Event::Snapshot { booking } => insert_booking(ledger, booking.clone(), index),
    }
}

fn insert_booking(ledger: &mut ProviderLedger, booking: Booking, index: &DashMap<BookingId, UserId>) {
    if booking.status.holds_slot() {
        ledger.insert_hold(Hold {
            booking: booking.id,
            span: booking.slot,
        });
        metrics::gauge!(crate::observability::BOOKINGS_ACTIVE).increment(1.0);
    }
    index.insert(booking.id, booking.provider);
    ledger.bookings.insert(booking.id, booking);
}

impl Engine {
    /// Open the engine, replaying `wal_path` if it exists. Must be called
    /// from within a tokio runtime (spawns the WAL writer).
    pub fn new(wal_path: PathBuf, gate: VerificationGate, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let (events, wal) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let booking_to_provider = DashMap::new();
        let mut replayed: HashMap<UserId, ProviderLedger> = HashMap::new();
        for event in &events {
            let provider = event.provider();
            let ledger = replayed
                .entry(provider)
                .or_insert_with(|| ProviderLedger::new(provider));
            apply_to_ledger(ledger, event, &booking_to_provider);
        }
        debug!(
            "replayed {} events into {} provider ledgers",
            events.len(),
            replayed.len()
        );

        let ledgers = DashMap::new();
        for (provider, ledger) in replayed {
            ledgers.insert(provider, Arc::new(RwLock::new(ledger)));
        }

        Ok(Self {
            ledgers,
            booking_to_provider,
            wal_tx,
            gate,
            clock,
            commit_gate: RwLock::new(()),
        })
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Unavailable(format!("WAL error: {e}")))
    }

    pub fn get_ledger(&self, provider: &UserId) -> Option<SharedLedger> {
        self.ledgers.get(provider).map(|e| e.value().clone())
    }

    pub(super) fn ledger_for(&self, provider: UserId) -> SharedLedger {
        self.ledgers
            .entry(provider)
            .or_insert_with(|| Arc::new(RwLock::new(ProviderLedger::new(provider))))
            .value()
            .clone()
    }

    pub fn provider_of(&self, booking: &BookingId) -> Option<UserId> {
        self.booking_to_provider.get(booking).map(|e| *e.value())
    }

    /// WAL-append then apply. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        ledger: &mut ProviderLedger,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_ledger(ledger, event, &self.booking_to_provider);
        Ok(())
    }

    /// Lookup booking → provider, acquire that provider's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        id: &BookingId,
    ) -> Result<OwnedRwLockWriteGuard<ProviderLedger>, EngineError> {
        let provider = self
            .provider_of(id)
            .ok_or_else(|| EngineError::booking_not_found(*id))?;
        let ledger = self
            .get_ledger(&provider)
            .ok_or_else(|| EngineError::booking_not_found(*id))?;
        Ok(ledger.write_owned().await)
    }

    /// Rewrite the WAL as one snapshot event per booking.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;

        let ledgers: Vec<SharedLedger> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for ledger in ledgers {
            let guard = ledger.read().await;
            let mut bookings: Vec<&Booking> = guard.bookings.values().collect();
            bookings.sort_by_key(|b| b.id);
            events.extend(bookings.into_iter().map(|b| Event::Snapshot { booking: b.clone() }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Unavailable(format!("WAL error: {e}")))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
