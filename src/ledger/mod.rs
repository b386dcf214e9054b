mod availability;
mod error;
mod mutations;
mod queries;
mod rounding;
mod search;

pub use availability::conflicting_appointment;
pub use error::LedgerError;
pub use rounding::round_to_next_quarter_hour;
pub use search::next_available;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono_tz::Tz;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedSlotState = Arc<RwLock<SlotState>>;

/// Runtime knobs for rounding and the next-available search.
#[derive(Debug, Clone)]
pub struct BookingConfig {
    /// Reference calendar for the quarter-hour grid.
    pub timezone: Tz,
    /// How many grid steps the finder walks before giving up.
    pub horizon_steps: u32,
    pub step_minutes: u32,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Europe::Helsinki,
            horizon_steps: 96,
            step_minutes: 15,
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
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
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };

        let mut batch = vec![(event, response)];
        let mut deferred_control = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Control commands see a fully flushed WAL; close the batch first.
                    deferred_control = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());

        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred_control {
            handle_control(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The appointment ledger: per-slot state behind individual RwLocks, with
/// every mutation persisted to the WAL before it is applied in memory.
pub struct Ledger {
    pub state: DashMap<Ulid, SharedSlotState>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: appointment id → slot id.
    appointment_index: DashMap<Ulid, Ulid>,
    config: BookingConfig,
}

/// Apply an event directly to a SlotState (no locking — caller holds the lock).
fn apply_to_slot(state: &mut SlotState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::SlotUpdated { name, description, duration_min, .. } => {
            state.slot.name = name.clone();
            state.slot.description = description.clone();
            state.slot.duration_min = *duration_min;
        }
        Event::SlotActiveSet { active, .. } => {
            state.slot.is_active = *active;
        }
        Event::AppointmentBooked { id, slot_id, business_id, user_id, start, end, note } => {
            // Records from before the end column carry no end; derive it
            // from the slot duration once, here, so in-memory appointments
            // always have a concrete span.
            let end = end.unwrap_or(*start + state.slot.duration_ms());
            state.insert_appointment(Appointment {
                id: *id,
                slot_id: *slot_id,
                business_id: *business_id,
                user_id: *user_id,
                span: Span::new(*start, end),
                status: AppointmentStatus::Pending,
                note: note.clone(),
            });
            index.insert(*id, *slot_id);
        }
        Event::StatusChanged { id, status, .. } => {
            state.set_status(*id, *status);
        }
        Event::AppointmentDeleted { id, .. } => {
            state.remove_appointment(*id);
            index.remove(id);
        }
        // SlotCreated is handled at the DashMap level, not here
        Event::SlotCreated { .. } => {}
    }
}

impl Ledger {
    /// Replay the WAL at `wal_path` and start the group-commit writer task.
    /// Must be called from within a tokio runtime.
    pub fn open(wal_path: PathBuf, config: BookingConfig) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let ledger = Self {
            state: DashMap::new(),
            wal_tx,
            appointment_index: DashMap::new(),
            config,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here because this may
        // run inside an async context.
        for event in &events {
            match event {
                Event::SlotCreated { id, business_id, owner_id, name, description, duration_min } => {
                    let slot = Slot {
                        id: *id,
                        business_id: *business_id,
                        owner_id: *owner_id,
                        name: name.clone(),
                        description: description.clone(),
                        duration_min: *duration_min,
                        is_active: true,
                    };
                    ledger.state.insert(*id, Arc::new(RwLock::new(SlotState::new(slot))));
                }
                other => {
                    if let Some(slot_id) = event_slot_id(other)
                        && let Some(entry) = ledger.state.get(&slot_id)
                    {
                        let arc = entry.value().clone();
                        let mut guard = arc.try_write().expect("replay: uncontended write");
                        apply_to_slot(&mut guard, other, &ledger.appointment_index);
                    }
                }
            }
        }

        Ok(ledger)
    }

    pub fn config(&self) -> &BookingConfig {
        &self.config
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), LedgerError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| LedgerError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| LedgerError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| LedgerError::WalError(e.to_string()))
    }

    pub fn get_slot(&self, id: &Ulid) -> Option<SharedSlotState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn slot_for_appointment(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.appointment_index.get(appointment_id).map(|e| *e.value())
    }

    /// WAL-append + in-memory apply in one call, under the caller's lock.
    pub(super) async fn persist_and_apply(
        &self,
        state: &mut SlotState,
        event: &Event,
    ) -> Result<(), LedgerError> {
        self.wal_append(event).await?;
        apply_to_slot(state, event, &self.appointment_index);
        Ok(())
    }

    /// Lookup appointment → slot, get slot, acquire write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<SlotState>), LedgerError> {
        let slot_id = self
            .slot_for_appointment(appointment_id)
            .ok_or(LedgerError::NotFound(*appointment_id))?;
        let state = self
            .get_slot(&slot_id)
            .ok_or(LedgerError::NotFound(slot_id))?;
        let guard = state.write_owned().await;
        Ok((slot_id, guard))
    }
}

/// Extract the slot id from an event (for non-SlotCreated events).
fn event_slot_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::SlotUpdated { id, .. } | Event::SlotActiveSet { id, .. } => Some(*id),
        Event::AppointmentBooked { slot_id, .. }
        | Event::StatusChanged { slot_id, .. }
        | Event::AppointmentDeleted { slot_id, .. } => Some(*slot_id),
        Event::SlotCreated { .. } => None,
    }
}
