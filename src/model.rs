use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    #[allow(dead_code)]
    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Appointment lifecycle. Only Pending and Confirmed block the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn is_live(self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    /// Legal lifecycle moves: pending → confirmed|cancelled,
    /// confirmed → cancelled|completed. Everything else is rejected.
    pub fn can_transition(self, to: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, to),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) | (Confirmed, Completed)
        )
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// A bookable service offering with a fixed duration. Never physically
/// deleted — businesses toggle `is_active` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Ulid,
    pub business_id: Ulid,
    /// User id of the business owner; authorizes slot mutations.
    pub owner_id: Ulid,
    pub name: String,
    pub description: String,
    pub duration_min: u32,
    pub is_active: bool,
}

impl Slot {
    pub fn duration_ms(&self) -> Ms {
        self.duration_min as Ms * 60_000
    }
}

/// A reservation of one slot for one span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub business_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub status: AppointmentStatus,
    pub note: String,
}

/// In-memory state of one slot: the slot row plus its appointments,
/// sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub slot: Slot,
    pub appointments: Vec<Appointment>,
}

impl SlotState {
    pub fn new(slot: Slot) -> Self {
        Self {
            slot,
            appointments: Vec::new(),
        }
    }

    /// Insert keeping sort order by span.start.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appointment.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove_appointment(&mut self, id: Ulid) -> Option<Appointment> {
        if let Some(pos) = self.appointments.iter().position(|a| a.id == id) {
            Some(self.appointments.remove(pos))
        } else {
            None
        }
    }

    pub fn appointment(&self, id: &Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == *id)
    }

    pub fn set_status(&mut self, id: Ulid, status: AppointmentStatus) -> bool {
        if let Some(a) = self.appointments.iter_mut().find(|a| a.id == id) {
            a.status = status;
            true
        } else {
            false
        }
    }

    pub fn live(&self) -> impl Iterator<Item = &Appointment> {
        self.appointments.iter().filter(|a| a.status.is_live())
    }

    /// Live appointments whose span overlaps the query window.
    /// Uses binary search to skip everything starting at or after `query.end`.
    pub fn live_overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.status.is_live() && a.span.end > query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotCreated {
        id: Ulid,
        business_id: Ulid,
        owner_id: Ulid,
        name: String,
        description: String,
        duration_min: u32,
    },
    SlotUpdated {
        id: Ulid,
        name: String,
        description: String,
        duration_min: u32,
    },
    SlotActiveSet {
        id: Ulid,
        active: bool,
    },
    AppointmentBooked {
        id: Ulid,
        slot_id: Ulid,
        business_id: Ulid,
        user_id: Ulid,
        start: Ms,
        /// Older logs carry no end; it is backfilled from the slot
        /// duration when the event is applied.
        end: Option<Ms>,
        note: String,
    },
    StatusChanged {
        id: Ulid,
        slot_id: Ulid,
        status: AppointmentStatus,
    },
    AppointmentDeleted {
        id: Ulid,
        slot_id: Ulid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> Slot {
        Slot {
            id: Ulid::new(),
            business_id: Ulid::new(),
            owner_id: Ulid::new(),
            name: "Haircut".into(),
            description: String::new(),
            duration_min: 60,
            is_active: true,
        }
    }

    fn appt(start: Ms, end: Ms, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Ulid::new(),
            slot_id: Ulid::new(),
            business_id: Ulid::new(),
            user_id: Ulid::new(),
            span: Span::new(start, end),
            status,
            note: String::new(),
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap_symmetric() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn status_liveness() {
        assert!(AppointmentStatus::Pending.is_live());
        assert!(AppointmentStatus::Confirmed.is_live());
        assert!(!AppointmentStatus::Cancelled.is_live());
        assert!(!AppointmentStatus::Completed.is_live());
    }

    #[test]
    fn status_transition_table() {
        use AppointmentStatus::*;
        let all = [Pending, Confirmed, Cancelled, Completed];
        let legal = [
            (Pending, Confirmed),
            (Pending, Cancelled),
            (Confirmed, Cancelled),
            (Confirmed, Completed),
        ];
        for from in all {
            for to in all {
                assert_eq!(from.can_transition(to), legal.contains(&(from, to)), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn appointment_ordering() {
        let mut ss = SlotState::new(slot());
        ss.insert_appointment(appt(300, 400, AppointmentStatus::Pending));
        ss.insert_appointment(appt(100, 200, AppointmentStatus::Pending));
        ss.insert_appointment(appt(200, 300, AppointmentStatus::Confirmed));
        assert_eq!(ss.appointments[0].span.start, 100);
        assert_eq!(ss.appointments[1].span.start, 200);
        assert_eq!(ss.appointments[2].span.start, 300);
    }

    #[test]
    fn appointment_remove() {
        let mut ss = SlotState::new(slot());
        let a = appt(100, 200, AppointmentStatus::Pending);
        let id = a.id;
        ss.insert_appointment(a);
        assert!(ss.remove_appointment(id).is_some());
        assert!(ss.appointments.is_empty());
        assert!(ss.remove_appointment(id).is_none());
    }

    #[test]
    fn live_overlapping_filters_status() {
        let mut ss = SlotState::new(slot());
        ss.insert_appointment(appt(100, 200, AppointmentStatus::Cancelled));
        ss.insert_appointment(appt(100, 200, AppointmentStatus::Completed));
        ss.insert_appointment(appt(150, 250, AppointmentStatus::Confirmed));
        let hits: Vec<_> = ss.live_overlapping(&Span::new(120, 180)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].status, AppointmentStatus::Confirmed);
    }

    #[test]
    fn live_overlapping_adjacent_not_included() {
        // Appointment ending exactly at query.start is NOT overlapping (half-open)
        let mut ss = SlotState::new(slot());
        ss.insert_appointment(appt(100, 200, AppointmentStatus::Pending));
        let hits: Vec<_> = ss.live_overlapping(&Span::new(200, 300)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn live_overlapping_skips_future_starts() {
        let mut ss = SlotState::new(slot());
        ss.insert_appointment(appt(100, 200, AppointmentStatus::Pending));
        ss.insert_appointment(appt(450, 600, AppointmentStatus::Pending));
        ss.insert_appointment(appt(1000, 1100, AppointmentStatus::Pending));
        let hits: Vec<_> = ss.live_overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn live_overlapping_spanning_appointment() {
        let mut ss = SlotState::new(slot());
        ss.insert_appointment(appt(0, 10_000, AppointmentStatus::Confirmed));
        let hits: Vec<_> = ss.live_overlapping(&Span::new(500, 600)).collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn live_overlapping_empty_slot() {
        let ss = SlotState::new(slot());
        assert!(ss.live_overlapping(&Span::new(0, 1000)).next().is_none());
    }

    #[test]
    fn slot_duration_ms() {
        let mut s = slot();
        s.duration_min = 45;
        assert_eq!(s.duration_ms(), 45 * 60_000);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::AppointmentBooked {
            id: Ulid::new(),
            slot_id: Ulid::new(),
            business_id: Ulid::new(),
            user_id: Ulid::new(),
            start: 1_000_000,
            end: None,
            note: "window seat".into(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
