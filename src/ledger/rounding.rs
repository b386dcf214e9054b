use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;

use crate::model::Ms;

/// Snap a raw timestamp onto the quarter-hour grid of the reference
/// calendar: the minute-of-hour is ceiled to the next multiple of 15 and
/// sub-minute precision is dropped. An instant whose minute already sits
/// on the grid keeps its minute (its seconds are zeroed, so it may move
/// backwards by under a minute). Idempotent and monotone.
///
/// The grid is civil, so a DST transition in `tz` shifts the grid with
/// the local clock rather than leaving it anchored to UTC.
pub fn round_to_next_quarter_hour(t: Ms, tz: &Tz) -> Ms {
    let Some(utc) = DateTime::<Utc>::from_timestamp_millis(t) else {
        return t;
    };
    let local = utc.with_timezone(tz);
    let minute = local.minute();
    let carry_min = (minute.div_ceil(15) * 15 - minute) as i64;
    let truncated = local
        - Duration::seconds(local.second() as i64)
        - Duration::milliseconds(local.timestamp_subsec_millis() as i64);
    (truncated + Duration::minutes(carry_min)).timestamp_millis()
}
