use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};

/// Convert a naive Berlin-local timestamp (as printed on the watched sites)
/// to UTC, applying the EU daylight-saving rule.
pub fn berlin_to_utc(local: NaiveDateTime) -> DateTime<Utc> {
    let offset_hours = if in_berlin_dst(local) { 2 } else { 1 };
    Utc.from_utc_datetime(&(local - Duration::hours(offset_hours)))
}

/// CEST runs from the last Sunday of March 02:00 local to the last Sunday
/// of October 03:00 local.
fn in_berlin_dst(local: NaiveDateTime) -> bool {
    let year = local.year();
    let (Some(start), Some(end)) = (dst_boundary(year, 3, 2), dst_boundary(year, 10, 3)) else {
        return false;
    };
    local >= start && local < end
}

fn dst_boundary(year: i32, month: u32, hour: u32) -> Option<NaiveDateTime> {
    let sunday = last_sunday(year, month)?;
    sunday.and_hms_opt(hour, 0, 0)
}

fn last_sunday(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, Weekday::Sun, 5)
        .or_else(|| NaiveDate::from_weekday_of_month_opt(year, month, Weekday::Sun, 4))
}
