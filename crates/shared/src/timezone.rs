use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// All user-facing dates, trigger offsets and digest windows are evaluated in
/// this single zone.
pub const CANONICAL_TZ: Tz = chrono_tz::Asia::Tokyo;

pub fn local_now(now_utc: DateTime<Utc>) -> DateTime<Tz> {
    now_utc.with_timezone(&CANONICAL_TZ)
}

pub fn local_date(now_utc: DateTime<Utc>) -> NaiveDate {
    local_now(now_utc).date_naive()
}

/// Resolves a local wall-clock instant to UTC. `None` only for instants that
/// do not exist in the zone (JST has no DST, so in practice always `Some`).
pub fn local_instant_utc(date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    resolve_local_datetime(&CANONICAL_TZ, date.and_time(time)).map(|dt| dt.with_timezone(&Utc))
}

/// The item's anchor instant for reminder lead-time math: the explicit start
/// time when there is one, local midnight otherwise.
pub fn item_start_utc(date: NaiveDate, start_time: Option<NaiveTime>) -> Option<DateTime<Utc>> {
    let time = start_time.unwrap_or(NaiveTime::MIN);
    local_instant_utc(date, time)
}

/// Whole local days between `now` and `date` (negative when past).
pub fn days_until(now_utc: DateTime<Utc>, date: NaiveDate) -> i64 {
    (date - local_date(now_utc)).num_days()
}

pub fn format_local_date(date: NaiveDate) -> String {
    format!("{}/{}", date.format("%-m"), date.format("%-d"))
}

pub fn format_local_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

pub fn add_hours(instant: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    instant + Duration::hours(hours)
}

fn resolve_local_datetime(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(value) => Some(value),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

    use super::{days_until, item_start_utc, local_date, local_instant_utc};

    #[test]
    fn local_date_crosses_midnight_ahead_of_utc() {
        // 16:30 UTC is 01:30 JST on the next day.
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 16, 30, 0).unwrap();
        assert_eq!(local_date(now), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
    }

    #[test]
    fn local_instant_converts_jst_to_utc() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let instant = local_instant_utc(date, time).unwrap();
        assert_eq!(instant, Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn item_start_defaults_to_local_midnight() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let instant = item_start_utc(date, None).unwrap();
        assert_eq!(instant, Utc.with_ymd_and_hms(2026, 3, 1, 15, 0, 0).unwrap());
    }

    #[test]
    fn days_until_counts_local_calendar_days() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 16, 30, 0).unwrap(); // 3/2 JST
        let due = NaiveDate::from_ymd_opt(2026, 3, 4).unwrap();
        assert_eq!(days_until(now, due), 2);
    }
}
