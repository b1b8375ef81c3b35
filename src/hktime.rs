// =============================================================================
// Hong Kong Time Helpers — date keys, sessions, close windows
// =============================================================================
//
// Every day boundary in the engine (midnight clearing, cooldowns, seat
// freezing, trade-log rollover) is keyed on the HK calendar date, a fixed
// UTC+8 offset. HK has no daylight saving, so a FixedOffset is exact.
//
// Continuous trading sessions:
//   Morning:   09:30 – 12:00
//   Afternoon: 13:00 – 16:00   (absent on half-days)
// =============================================================================

use chrono::{DateTime, FixedOffset, TimeZone, Timelike, Utc};

/// UTC+8 in seconds.
const HK_OFFSET_SECS: i32 = 8 * 3600;

/// Morning session open, minutes from midnight (09:30).
pub const MORNING_OPEN_MIN: u32 = 9 * 60 + 30;
/// Morning session close, minutes from midnight (12:00).
pub const MORNING_CLOSE_MIN: u32 = 12 * 60;
/// Afternoon session open, minutes from midnight (13:00).
pub const AFTERNOON_OPEN_MIN: u32 = 13 * 60;
/// Afternoon session close, minutes from midnight (16:00).
pub const AFTERNOON_CLOSE_MIN: u32 = 16 * 60;

/// The fixed HK offset.
pub fn hk_offset() -> FixedOffset {
    FixedOffset::east_opt(HK_OFFSET_SECS).expect("UTC+8 is a valid offset")
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert epoch milliseconds into an HK-local `DateTime`.
pub fn hk_datetime(ms: i64) -> DateTime<FixedOffset> {
    hk_offset()
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(|| hk_offset().timestamp_millis_opt(0).unwrap())
}

/// The HK date key (`YYYY-MM-DD`) for the given epoch milliseconds.
///
/// This is the unit of day boundaries for the lifecycle manager, cooldown
/// tracker, seat freezing, and the trade log.
pub fn hk_date_key(ms: i64) -> String {
    hk_datetime(ms).format("%Y-%m-%d").to_string()
}

/// Minutes since HK midnight for the given epoch milliseconds.
pub fn hk_minutes_of_day(ms: i64) -> u32 {
    let dt = hk_datetime(ms);
    dt.hour() * 60 + dt.minute()
}

/// The close time in minutes-from-midnight for a full or half trading day.
pub fn close_minutes(is_half_day: bool) -> u32 {
    if is_half_day {
        MORNING_CLOSE_MIN
    } else {
        AFTERNOON_CLOSE_MIN
    }
}

/// Whether `ms` falls inside a continuous trading session.
///
/// On half-days only the morning session counts.
pub fn in_continuous_session(ms: i64, is_half_day: bool) -> bool {
    let min = hk_minutes_of_day(ms);
    let morning = (MORNING_OPEN_MIN..MORNING_CLOSE_MIN).contains(&min);
    if is_half_day {
        return morning;
    }
    morning || (AFTERNOON_OPEN_MIN..AFTERNOON_CLOSE_MIN).contains(&min)
}

/// Minutes of continuous trading elapsed since the 09:30 open, excluding the
/// lunch break. Returns 0 before the open.
///
/// Used by the warrant finder to scale the minimum-turnover requirement
/// (`min_turnover_per_minute × trading_minutes_since_open`).
pub fn trading_minutes_since_open(ms: i64, is_half_day: bool) -> u32 {
    let min = hk_minutes_of_day(ms);

    if min < MORNING_OPEN_MIN {
        return 0;
    }
    if min < MORNING_CLOSE_MIN {
        return min - MORNING_OPEN_MIN;
    }

    let morning_total = MORNING_CLOSE_MIN - MORNING_OPEN_MIN;
    if is_half_day || min < AFTERNOON_OPEN_MIN {
        return morning_total;
    }
    if min < AFTERNOON_CLOSE_MIN {
        return morning_total + (min - AFTERNOON_OPEN_MIN);
    }
    morning_total + (AFTERNOON_CLOSE_MIN - AFTERNOON_OPEN_MIN)
}

/// Minutes remaining until the session close; `None` when already past it.
pub fn minutes_until_close(ms: i64, is_half_day: bool) -> Option<u32> {
    let min = hk_minutes_of_day(ms);
    let close = close_minutes(is_half_day);
    if min >= close {
        None
    } else {
        Some(close - min)
    }
}

/// Epoch milliseconds of the next HK midnight strictly after `ms`.
pub fn next_hk_midnight_ms(ms: i64) -> i64 {
    let dt = hk_datetime(ms);
    let start_of_day = dt
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid");
    let start_ms = hk_offset()
        .from_local_datetime(&start_of_day)
        .single()
        .map(|d| d.timestamp_millis())
        .unwrap_or(ms);
    start_ms + 24 * 3600 * 1000
}
