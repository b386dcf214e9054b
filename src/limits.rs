use crate::model::Ms;

pub const MAX_SLOTS: usize = 10_000;
pub const MAX_APPOINTMENTS_PER_SLOT: usize = 100_000;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 2_000;
pub const MAX_NOTE_LEN: usize = 2_000;

/// Slot durations are minutes in (0, 24h].
pub const MAX_DURATION_MIN: u32 = 24 * 60;

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z — anything past this is a client bug.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Minimum notice a customer must give to cancel a confirmed appointment.
pub const MIN_CANCEL_NOTICE_MS: Ms = 24 * 3_600_000;

/// Upper bound on the configurable next-available search horizon.
pub const MAX_HORIZON_STEPS: u32 = 10_000;

/// One JSON request line on the wire.
pub const MAX_FRAME_LEN: usize = 64 * 1024;
