use crate::model::{Ms, SlotState, Span};

use super::availability::conflicting_appointment;
use super::rounding::round_to_next_quarter_hour;
use super::BookingConfig;

/// Walk the quarter-hour grid forward from `from` and return the first
/// start whose full-duration span is free of live appointments.
///
/// The walk is bounded by `config.horizon_steps` (default 96 × 15 min =
/// 24 h). `None` means the horizon is fully booked — a legitimate answer,
/// not an error. Each candidate re-reads the snapshot; nothing is cached
/// across instants.
pub fn next_available(state: &SlotState, config: &BookingConfig, from: Ms) -> Option<Ms> {
    if !state.slot.is_active {
        return None;
    }
    let step = config.step_minutes as Ms * 60_000;
    let duration = state.slot.duration_ms();
    for i in 0..config.horizon_steps {
        let candidate = round_to_next_quarter_hour(from + i as Ms * step, &config.timezone);
        let span = Span::new(candidate, candidate + duration);
        if conflicting_appointment(state, &span).is_none() {
            return Some(candidate);
        }
    }
    None
}
