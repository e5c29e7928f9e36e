//! Daily flush instant arithmetic.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone};

/// First `hour:minute` wall-clock instant strictly after `now`.
///
/// When today's instant has already passed (or is exactly now) the target
/// rolls to the following day. A local time that falls in a DST gap moves
/// forward to the first valid minute after it.
pub fn next_flush_after<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32, minute: u32) -> DateTime<Tz> {
    let tz = now.timezone();
    let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) else {
        return now.clone() + Duration::days(1);
    };

    let mut date = now.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = resolve_local(&tz, date, time) {
            if candidate > *now {
                return candidate;
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    now.clone() + Duration::days(1)
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Tz>> {
    let naive = date.and_time(time);
    if let Some(resolved) = tz.from_local_datetime(&naive).earliest() {
        return Some(resolved);
    }
    // DST gap: step forward a minute at a time until the clock exists again.
    (1..=180).find_map(|minutes| {
        tz.from_local_datetime(&(naive + Duration::minutes(minutes)))
            .earliest()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Timelike, Utc};

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap()
    }

    #[test]
    fn later_today_fires_same_day() {
        let now = ist().with_ymd_and_hms(2026, 10, 18, 18, 50, 0).unwrap();
        let next = next_flush_after(&now, 18, 56);
        assert_eq!(next, ist().with_ymd_and_hms(2026, 10, 18, 18, 56, 0).unwrap());
    }

    #[test]
    fn passed_target_rolls_to_tomorrow() {
        let now = ist().with_ymd_and_hms(2026, 10, 18, 19, 0, 0).unwrap();
        let next = next_flush_after(&now, 18, 56);
        assert_eq!(next, ist().with_ymd_and_hms(2026, 10, 19, 18, 56, 0).unwrap());
    }

    #[test]
    fn rearming_at_the_fire_instant_targets_next_day() {
        let fired = ist().with_ymd_and_hms(2026, 10, 18, 18, 56, 0).unwrap();
        let next = next_flush_after(&fired, 18, 56);
        assert_eq!(next - fired, Duration::days(1));
    }

    #[test]
    fn month_and_year_boundaries_roll_over() {
        let now = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 30).unwrap();
        let next = next_flush_after(&now, 0, 0);
        assert_eq!(next, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn scenario_start_at_1850_flush_1856_then_rearm() {
        let start = ist().with_ymd_and_hms(2026, 10, 18, 18, 50, 0).unwrap();
        let first = next_flush_after(&start, 18, 56);
        assert_eq!((first.hour(), first.minute()), (18, 56));
        assert_eq!(first.date_naive(), start.date_naive());

        let second = next_flush_after(&first, 18, 56);
        assert_eq!(second.date_naive(), start.date_naive().succ_opt().unwrap());
        assert_eq!((second.hour(), second.minute()), (18, 56));
    }
}
