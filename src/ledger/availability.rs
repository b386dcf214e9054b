use ulid::Ulid;

use crate::model::{Ms, SlotState, Span};

use super::LedgerError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as Ms
}

pub(crate) fn validate_span(span: &Span) -> Result<(), LedgerError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(LedgerError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// First live appointment overlapping the candidate span, if any.
/// Pure scan over the slot snapshot — the caller decides whether this is a
/// hard conflict (booking) or just an unavailable answer (query).
pub fn conflicting_appointment(state: &SlotState, candidate: &Span) -> Option<Ulid> {
    state.live_overlapping(candidate).next().map(|a| a.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Appointment, AppointmentStatus, Slot};

    const H: Ms = 3_600_000;

    fn state_with(appointments: Vec<(Ms, Ms, AppointmentStatus)>) -> SlotState {
        let slot = Slot {
            id: Ulid::new(),
            business_id: Ulid::new(),
            owner_id: Ulid::new(),
            name: "Consult".into(),
            description: String::new(),
            duration_min: 60,
            is_active: true,
        };
        let mut ss = SlotState::new(slot);
        for (start, end, status) in appointments {
            ss.insert_appointment(Appointment {
                id: Ulid::new(),
                slot_id: ss.slot.id,
                business_id: ss.slot.business_id,
                user_id: Ulid::new(),
                span: Span::new(start, end),
                status,
                note: String::new(),
            });
        }
        ss
    }

    #[test]
    fn overlap_is_a_conflict() {
        let ss = state_with(vec![(10 * H, 11 * H, AppointmentStatus::Pending)]);
        let hit = conflicting_appointment(&ss, &Span::new(10 * H + 30 * 60_000, 11 * H + 30 * 60_000));
        assert_eq!(hit, Some(ss.appointments[0].id));
    }

    #[test]
    fn touching_end_is_not_a_conflict() {
        let ss = state_with(vec![(10 * H, 11 * H, AppointmentStatus::Confirmed)]);
        assert!(conflicting_appointment(&ss, &Span::new(11 * H, 12 * H)).is_none());
        assert!(conflicting_appointment(&ss, &Span::new(9 * H, 10 * H)).is_none());
    }

    #[test]
    fn dead_statuses_do_not_block() {
        let ss = state_with(vec![
            (10 * H, 11 * H, AppointmentStatus::Cancelled),
            (10 * H, 11 * H, AppointmentStatus::Completed),
        ]);
        assert!(conflicting_appointment(&ss, &Span::new(10 * H, 11 * H)).is_none());
    }

    #[test]
    fn empty_slot_never_conflicts() {
        let ss = state_with(vec![]);
        assert!(conflicting_appointment(&ss, &Span::new(0, H)).is_none());
    }

    #[test]
    fn validate_span_bounds() {
        assert!(validate_span(&Span::new(0, H)).is_ok());
        assert!(validate_span(&Span::new(-5, H)).is_err());
        assert!(validate_span(&Span::new(0, crate::limits::MAX_VALID_TIMESTAMP_MS + 1)).is_err());
    }
}
