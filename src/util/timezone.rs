use chrono::{DateTime, Datelike, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use time::{Date, Month, OffsetDateTime, UtcOffset};

/// Calendar used for month buckets and default filters.
pub const DASHBOARD_TIMEZONE: Tz = chrono_tz::America::Argentina::Buenos_Aires;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("timestamp {0} cannot be represented in the dashboard calendar")]
pub struct TimezoneError(i64);

pub fn localized_datetime(time: OffsetDateTime, tz: Tz) -> Result<DateTime<Tz>, TimezoneError> {
    let utc = time.to_offset(UtcOffset::UTC);
    let seconds = utc.unix_timestamp();
    let datetime_utc = DateTime::<Utc>::from_timestamp(seconds, utc.nanosecond())
        .ok_or(TimezoneError(seconds))?;
    Ok(tz.from_utc_datetime(&datetime_utc.naive_utc()))
}

pub fn localized_date(time: OffsetDateTime, tz: Tz) -> Result<Date, TimezoneError> {
    let localized = localized_datetime(time, tz)?;
    let invalid = || TimezoneError(time.unix_timestamp());
    let month = u8::try_from(localized.month())
        .ok()
        .and_then(|month| Month::try_from(month).ok())
        .ok_or_else(invalid)?;
    let day = u8::try_from(localized.day()).map_err(|_| invalid())?;
    Date::from_calendar_date(localized.year(), month, day).map_err(|_| invalid())
}

/// Today's date in `tz`, falling back to the UTC date if conversion fails.
pub fn today_in(tz: Tz) -> Date {
    let now = OffsetDateTime::now_utc();
    localized_date(now, tz).unwrap_or_else(|_| now.date())
}

#[cfg(test)]
mod tests {
    use time::macros::{date, datetime};

    use super::*;

    #[test]
    fn buenos_aires_date_lags_utc_after_midnight() {
        let instant = datetime!(2025-08-01 02:30 UTC);
        assert_eq!(
            localized_date(instant, DASHBOARD_TIMEZONE).expect("valid"),
            date!(2025 - 07 - 31)
        );
    }

    #[test]
    fn afternoon_keeps_the_same_day() {
        let instant = datetime!(2025-08-01 15:00 UTC);
        assert_eq!(
            localized_date(instant, DASHBOARD_TIMEZONE).expect("valid"),
            date!(2025 - 08 - 01)
        );
    }
}
