//! Conversion between stored wall-clock values and absolute instants.
//!
//! Appointments and availability blocks are persisted as a local date and
//! time-of-day without an offset. They only become comparable with "now"
//! after being interpreted in the single zone the deployment operates in.
//! That zone is configuration (`APP_TIMEZONE`); the host zone is never used.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use shared_config::AppConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WallClockError {
    #[error("Timezone is not configured")]
    MissingZone,

    #[error("Unknown timezone: {0}")]
    UnknownZone(String),

    #[error("{date} {time} does not exist in {zone} (daylight-saving gap)")]
    NonexistentLocalTime {
        date: NaiveDate,
        time: NaiveTime,
        zone: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClock {
    zone: Tz,
}

impl WallClock {
    pub fn new(zone: Tz) -> Self {
        Self { zone }
    }

    pub fn from_zone_name(name: &str) -> Result<Self, WallClockError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WallClockError::MissingZone);
        }

        name.parse::<Tz>()
            .map(Self::new)
            .map_err(|_| WallClockError::UnknownZone(name.to_string()))
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, WallClockError> {
        Self::from_zone_name(&config.app_timezone)
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn zone_name(&self) -> &'static str {
        self.zone.name()
    }

    /// Interprets a wall-clock value in the deployment zone.
    ///
    /// A value repeated by a fall-back transition resolves to its earlier
    /// occurrence. A value skipped by a spring-forward transition is an error.
    pub fn to_instant(&self, date: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>, WallClockError> {
        match self.zone.from_local_datetime(&date.and_time(time)) {
            LocalResult::Single(local) => Ok(local.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
            LocalResult::None => Err(WallClockError::NonexistentLocalTime {
                date,
                time,
                zone: self.zone_name().to_string(),
            }),
        }
    }

    pub fn from_instant(&self, instant: DateTime<Utc>) -> (NaiveDate, NaiveTime) {
        let local = self.local_datetime(instant);
        (local.date(), local.time())
    }

    pub fn local_datetime(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.zone).naive_local()
    }

    /// Offset-carrying representation, as sent to calendar providers.
    pub fn to_rfc3339(&self, instant: DateTime<Utc>) -> String {
        instant.with_timezone(&self.zone).to_rfc3339()
    }

    pub fn now_local(&self) -> NaiveDateTime {
        self.local_datetime(Utc::now())
    }

    pub fn today(&self) -> NaiveDate {
        self.now_local().date()
    }

    /// Instant at which `date` begins locally. Zones that skip midnight start the day at the end of the gap.
    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let mut candidate = NaiveTime::MIN;
        for _ in 0..(24 * 4) {
            if let Ok(instant) = self.to_instant(date, candidate) {
                return instant;
            }
            candidate += Duration::minutes(15);
        }
        date.and_time(NaiveTime::MIN).and_utc()
    }

    /// Every local date from `from` to `to`, both inclusive.
    pub fn local_date_range(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        from.iter_days().take_while(|day| *day <= to).collect()
    }
}
