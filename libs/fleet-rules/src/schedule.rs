//! Schedule engine
//!
//! Pure decision: wall time + schedule -> should the relay be on.

use chrono::{Datelike, NaiveDateTime};
use fleet_model::Schedule;

/// Desired relay state for `schedule` at local time `now`
///
/// Absent or disabled schedules are always off. The window is
/// `on_time <= HH:MM < off_time` on a matching day, so `on_time == off_time`
/// never switches on and windows do not wrap past midnight.
pub fn desired_state(schedule: Option<&Schedule>, now: NaiveDateTime) -> bool {
    let Some(schedule) = schedule else {
        return false;
    };
    if !schedule.enabled {
        return false;
    }
    if !schedule.every_day && !schedule.days.contains(&now.weekday()) {
        return false;
    }

    let current = now.format("%H:%M").to_string();
    schedule.on_time.as_str() <= current.as_str() && current.as_str() < schedule.off_time.as_str()
}
