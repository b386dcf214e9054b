use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{conflicting_appointment, now_ms, validate_span};
use super::rounding::round_to_next_quarter_hour;
use super::{Ledger, LedgerError, WalCommand, search};

fn validate_slot_fields(name: &str, description: &str, duration_min: u32) -> Result<(), LedgerError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(LedgerError::LimitExceeded("slot name empty or too long"));
    }
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(LedgerError::LimitExceeded("slot description too long"));
    }
    if duration_min == 0 || duration_min > MAX_DURATION_MIN {
        return Err(LedgerError::LimitExceeded("slot duration out of range"));
    }
    Ok(())
}

impl Ledger {
    pub async fn create_slot(
        &self,
        id: Ulid,
        business_id: Ulid,
        owner_id: Ulid,
        name: String,
        description: String,
        duration_min: u32,
    ) -> Result<(), LedgerError> {
        if self.state.len() >= MAX_SLOTS {
            return Err(LedgerError::LimitExceeded("too many slots"));
        }
        validate_slot_fields(&name, &description, duration_min)?;
        if self.state.contains_key(&id) {
            return Err(LedgerError::AlreadyExists(id));
        }

        let event = Event::SlotCreated {
            id,
            business_id,
            owner_id,
            name: name.clone(),
            description: description.clone(),
            duration_min,
        };
        self.wal_append(&event).await?;
        let slot = Slot {
            id,
            business_id,
            owner_id,
            name,
            description,
            duration_min,
            is_active: true,
        };
        self.state.insert(id, Arc::new(RwLock::new(SlotState::new(slot))));
        Ok(())
    }

    /// Owner-only. Duration changes affect future bookings only; existing
    /// appointment spans are fixed at creation.
    pub async fn update_slot(
        &self,
        id: Ulid,
        actor: Ulid,
        name: String,
        description: String,
        duration_min: u32,
    ) -> Result<(), LedgerError> {
        validate_slot_fields(&name, &description, duration_min)?;
        let state = self.get_slot(&id).ok_or(LedgerError::NotFound(id))?;
        let mut guard = state.write().await;
        if guard.slot.owner_id != actor {
            return Err(LedgerError::Forbidden(actor));
        }

        let event = Event::SlotUpdated { id, name, description, duration_min };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Owner-only. Slots are never deleted; deactivation takes them off the
    /// booking surface while keeping their appointment history.
    pub async fn set_slot_active(&self, id: Ulid, actor: Ulid, active: bool) -> Result<(), LedgerError> {
        let state = self.get_slot(&id).ok_or(LedgerError::NotFound(id))?;
        let mut guard = state.write().await;
        if guard.slot.owner_id != actor {
            return Err(LedgerError::Forbidden(actor));
        }

        let event = Event::SlotActiveSet { id, active };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Book `slot_id` at `start` for `user_id`. The start is snapped onto
    /// the quarter-hour grid first; the span is `[start, start + duration)`.
    ///
    /// Conflict check and insert happen under the slot's write lock, so two
    /// racing requests for the same opening serialize and the loser gets
    /// `Conflict` with the finder's suggestion.
    pub async fn book_appointment(
        &self,
        id: Ulid,
        slot_id: Ulid,
        user_id: Ulid,
        start: Ms,
        note: String,
    ) -> Result<Span, LedgerError> {
        if note.len() > MAX_NOTE_LEN {
            return Err(LedgerError::LimitExceeded("note too long"));
        }
        if self.appointment_index.contains_key(&id) {
            return Err(LedgerError::AlreadyExists(id));
        }
        let state = self.get_slot(&slot_id).ok_or(LedgerError::NotFound(slot_id))?;
        let mut guard = state.write().await;
        if !guard.slot.is_active {
            return Err(LedgerError::SlotInactive(slot_id));
        }
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_SLOT {
            return Err(LedgerError::LimitExceeded("too many appointments on slot"));
        }

        let now = now_ms();
        let start = round_to_next_quarter_hour(start, &self.config.timezone);
        if start < now {
            return Err(LedgerError::StartInPast { start, now });
        }
        let span = Span::new(start, start + guard.slot.duration_ms());
        validate_span(&span)?;

        if let Some(with) = conflicting_appointment(&guard, &span) {
            let next_available = search::next_available(&guard, &self.config, now);
            return Err(LedgerError::Conflict { with, next_available });
        }

        let event = Event::AppointmentBooked {
            id,
            slot_id,
            business_id: guard.slot.business_id,
            user_id,
            start: span.start,
            end: Some(span.end),
            note,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(span)
    }

    /// Slot-owner only; the move must be legal in the status FSM.
    pub async fn update_status(
        &self,
        id: Ulid,
        actor: Ulid,
        status: AppointmentStatus,
    ) -> Result<(), LedgerError> {
        let (slot_id, mut guard) = self.resolve_appointment_write(&id).await?;
        let appointment = guard.appointment(&id).ok_or(LedgerError::NotFound(id))?;
        if guard.slot.owner_id != actor {
            return Err(LedgerError::Forbidden(actor));
        }
        let from = appointment.status;
        if !from.can_transition(status) {
            return Err(LedgerError::InvalidTransition { from, to: status });
        }

        let event = Event::StatusChanged { id, slot_id, status };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Customer-side cancellation: deletes the record. Pending appointments
    /// cancel any time; confirmed ones need the minimum notice.
    pub async fn cancel_appointment(&self, id: Ulid, actor: Ulid) -> Result<(), LedgerError> {
        let (slot_id, mut guard) = self.resolve_appointment_write(&id).await?;
        let appointment = guard.appointment(&id).ok_or(LedgerError::NotFound(id))?;
        if appointment.user_id != actor {
            return Err(LedgerError::Forbidden(actor));
        }
        match appointment.status {
            AppointmentStatus::Pending => {}
            AppointmentStatus::Confirmed => {
                let start = appointment.span.start;
                if now_ms() + MIN_CANCEL_NOTICE_MS > start {
                    return Err(LedgerError::CancelNotice {
                        start,
                        required_ms: MIN_CANCEL_NOTICE_MS,
                    });
                }
            }
            from @ (AppointmentStatus::Cancelled | AppointmentStatus::Completed) => {
                return Err(LedgerError::InvalidTransition {
                    from,
                    to: AppointmentStatus::Cancelled,
                });
            }
        }

        let event = Event::AppointmentDeleted { id, slot_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Compact the WAL down to the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), LedgerError> {
        let mut events = Vec::new();

        let slot_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in slot_ids {
            let Some(entry) = self.state.get(&id) else { continue };
            let state = entry.value().clone();
            drop(entry);
            let guard = state.read().await;

            events.push(Event::SlotCreated {
                id: guard.slot.id,
                business_id: guard.slot.business_id,
                owner_id: guard.slot.owner_id,
                name: guard.slot.name.clone(),
                description: guard.slot.description.clone(),
                duration_min: guard.slot.duration_min,
            });
            if !guard.slot.is_active {
                events.push(Event::SlotActiveSet { id: guard.slot.id, active: false });
            }
            for a in &guard.appointments {
                events.push(Event::AppointmentBooked {
                    id: a.id,
                    slot_id: a.slot_id,
                    business_id: a.business_id,
                    user_id: a.user_id,
                    start: a.span.start,
                    end: Some(a.span.end),
                    note: a.note.clone(),
                });
                if a.status != AppointmentStatus::Pending {
                    events.push(Event::StatusChanged {
                        id: a.id,
                        slot_id: a.slot_id,
                        status: a.status,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| LedgerError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| LedgerError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| LedgerError::WalError(e.to_string()))
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
