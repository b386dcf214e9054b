use ulid::Ulid;

use crate::model::*;

use super::availability::{conflicting_appointment, now_ms};
use super::rounding::round_to_next_quarter_hour;
use super::{Ledger, LedgerError, search};

impl Ledger {
    /// Slots, optionally filtered by business. Unknown business ids just
    /// yield an empty list.
    pub async fn list_slots(&self, business_id: Option<Ulid>) -> Vec<Slot> {
        // Snapshot the Arcs first — awaiting with a DashMap iterator alive
        // would hold its shard lock.
        let states: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut slots = Vec::new();
        for state in states {
            let guard = state.read().await;
            if business_id.is_none_or(|b| guard.slot.business_id == b) {
                slots.push(guard.slot.clone());
            }
        }
        slots.sort_by_key(|s| s.id);
        slots
    }

    /// Can `slot_id` be booked at `start`? The start is snapped onto the
    /// grid exactly as booking would snap it. Inactive slots report false.
    pub async fn check_availability(&self, slot_id: Ulid, start: Ms) -> Result<bool, LedgerError> {
        let state = self.get_slot(&slot_id).ok_or(LedgerError::NotFound(slot_id))?;
        let guard = state.read().await;
        if !guard.slot.is_active {
            return Ok(false);
        }
        let start = round_to_next_quarter_hour(start, &self.config.timezone);
        let span = Span::new(start, start + guard.slot.duration_ms());
        Ok(conflicting_appointment(&guard, &span).is_none())
    }

    /// Next free grid start from now. `Ok(None)` means the search horizon is
    /// fully booked (or the slot is inactive) — not an error.
    pub async fn next_available(&self, slot_id: Ulid) -> Result<Option<Ms>, LedgerError> {
        self.next_available_from(slot_id, now_ms()).await
    }

    pub async fn next_available_from(
        &self,
        slot_id: Ulid,
        from: Ms,
    ) -> Result<Option<Ms>, LedgerError> {
        let state = self.get_slot(&slot_id).ok_or(LedgerError::NotFound(slot_id))?;
        let guard = state.read().await;
        Ok(search::next_available(&guard, &self.config, from))
    }

    /// Appointments that currently block the slot's calendar.
    pub async fn live_appointments(&self, slot_id: Ulid) -> Result<Vec<Appointment>, LedgerError> {
        let state = self.get_slot(&slot_id).ok_or(LedgerError::NotFound(slot_id))?;
        let guard = state.read().await;
        Ok(guard.live().cloned().collect())
    }

    /// All of one customer's appointments across every slot, any status,
    /// soonest first.
    pub async fn user_appointments(&self, user_id: Ulid) -> Vec<Appointment> {
        let states: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut result = Vec::new();
        for state in states {
            let guard = state.read().await;
            result.extend(guard.appointments.iter().filter(|a| a.user_id == user_id).cloned());
        }
        result.sort_by_key(|a| a.span.start);
        result
    }
}
