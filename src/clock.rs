//! Canonical time handling for the booking service.
//!
//! Appointment instants are stored as wall-clock values in one fixed
//! timezone (the canonical offset from configuration). Every comparison the
//! scheduler makes, from slot generation to the "must be in the future"
//! check, goes through [`ServiceTime`] so they all agree on that offset.

use std::sync::Arc;

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc,
};

use crate::error::BookingError;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a given instant.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl FixedClock {
    pub fn from_rfc3339(s: &str) -> Self {
        Self(
            DateTime::parse_from_rfc3339(s)
                .expect("valid RFC 3339")
                .with_timezone(&Utc),
        )
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const TIME_FORMATS: &[&str] = &["%H:%M", "%H:%M:%S"];

#[derive(Clone)]
pub struct ServiceTime {
    offset: FixedOffset,
    clock: Arc<dyn Clock>,
}

impl ServiceTime {
    pub fn new(offset: FixedOffset, clock: Arc<dyn Clock>) -> Self {
        Self { offset, clock }
    }

    /// Current wall-clock time in the canonical timezone.
    pub fn now_local(&self) -> NaiveDateTime {
        truncate_subsec(
            self.clock
                .now_utc()
                .with_timezone(&self.offset)
                .naive_local(),
        )
    }

    pub fn today(&self) -> NaiveDate {
        self.now_local().date()
    }

    pub fn is_future(&self, instant: NaiveDateTime) -> bool {
        instant > self.now_local()
    }

    /// Resolves a booking's date (and optional separate time) into a
    /// canonical instant.
    ///
    /// `date` may be a bare date, a local date+time, or an RFC 3339 value
    /// with an explicit offset (converted into the canonical offset). When
    /// `time` is given it overrides any time-of-day carried by `date`; an
    /// offset-bearing `date` is rejected in that case since the separate
    /// time has no offset to go with it.
    pub fn resolve_instant(
        &self,
        date: &str,
        time: Option<&str>,
    ) -> Result<NaiveDateTime, BookingError> {
        let date = date.trim();
        let time = time.map(str::trim).filter(|t| !t.is_empty());

        let instant = match time {
            Some(_) if DateTime::parse_from_rfc3339(date).is_ok() => {
                return Err(BookingError::validation(
                    "appointmentDate",
                    "a date with a UTC offset cannot be combined with appointmentTime",
                ));
            }
            Some(time) => {
                let day = parse_date(date.split(['T', ' ']).next().unwrap_or(date))?;
                day.and_time(parse_time(time)?)
            }
            None => self.parse_date_time(date)?,
        };

        Ok(truncate_subsec(instant))
    }

    fn parse_date_time(&self, raw: &str) -> Result<NaiveDateTime, BookingError> {
        if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
            return Ok(with_offset.with_timezone(&self.offset).naive_local());
        }

        DATE_TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .ok()
                    .and_then(|day| day.and_hms_opt(0, 0, 0))
            })
            .ok_or_else(|| {
                BookingError::validation(
                    "appointmentDate",
                    format!("'{raw}' is not a valid date or date-time"),
                )
            })
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, BookingError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        BookingError::validation("date", format!("'{raw}' is not a valid YYYY-MM-DD date"))
    })
}

pub fn parse_time(raw: &str) -> Result<NaiveTime, BookingError> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw.trim(), fmt).ok())
        .ok_or_else(|| {
            BookingError::validation(
                "appointmentTime",
                format!("'{raw}' is not a valid HH:MM time"),
            )
        })
}

/// Parses a fixed UTC offset written as `+HH:MM`, `-HH:MM` or `Z`.
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn truncate_subsec(instant: NaiveDateTime) -> NaiveDateTime {
    instant.with_nanosecond(0).unwrap_or(instant)
}
