//! Bookability of a single slot.
//!
//! The resolver is a pure function over rows the caller already fetched: the
//! professional's working profile, the live blocks relevant to the date and
//! the non-cancelled appointments on that date. Checks run in a fixed order
//! so the first failing rule is the one reported.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use shared_utils::WallClock;

use crate::models::{minute_of_day, AvailabilityBlock, WorkingProfile, MINUTES_PER_DAY};

/// A non-cancelled appointment as seen by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BookedInterval {
    pub appointment_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: i32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SlotRejection {
    #[error("Invalid duration: {duration_minutes} minutes")]
    InvalidDuration { duration_minutes: i32 },

    #[error("{date} is not a working day")]
    NonWorkingDay { date: NaiveDate },

    #[error("Slot falls outside working hours {working_start}-{working_end}")]
    OutsideWorkingHours {
        working_start: NaiveTime,
        working_end: NaiveTime,
    },

    #[error("Slot overlaps availability block {block_id}")]
    Blocked { block_id: Uuid, title: Option<String> },

    #[error("Slot overlaps appointment {appointment_id}")]
    Occupied { appointment_id: Uuid },

    #[error("{date} {time} does not exist in the operating timezone")]
    NonexistentLocalTime { date: NaiveDate, time: NaiveTime },

    #[error("Slot is in the past")]
    InPast,
}

pub fn time_of_minute(minute: i64) -> Option<NaiveTime> {
    if !(0..MINUTES_PER_DAY).contains(&minute) {
        return None;
    }
    NaiveTime::from_hms_opt((minute / 60) as u32, (minute % 60) as u32, 0)
}

pub struct SlotResolver<'a> {
    profile: &'a WorkingProfile,
    blocks: &'a [AvailabilityBlock],
    booked: &'a [BookedInterval],
    clock: Option<WallClock>,
    not_before: Option<DateTime<Utc>>,
}

impl<'a> SlotResolver<'a> {
    pub fn new(
        profile: &'a WorkingProfile,
        blocks: &'a [AvailabilityBlock],
        booked: &'a [BookedInterval],
    ) -> Self {
        Self {
            profile,
            blocks,
            booked,
            clock: None,
            not_before: None,
        }
    }

    /// Enables the daylight-saving check on slot boundaries.
    pub fn with_clock(mut self, clock: WallClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Rejects slots starting before `instant`. Needs a clock to take effect.
    pub fn not_before(mut self, instant: DateTime<Utc>) -> Self {
        self.not_before = Some(instant);
        self
    }

    pub fn check(&self, date: NaiveDate, time: NaiveTime, duration_minutes: i32) -> Result<(), SlotRejection> {
        if duration_minutes <= 0 || duration_minutes as i64 > MINUTES_PER_DAY {
            return Err(SlotRejection::InvalidDuration { duration_minutes });
        }

        if !self.profile.works_on(date) {
            return Err(SlotRejection::NonWorkingDay { date });
        }

        let start = minute_of_day(time);
        let end = start + duration_minutes as i64;

        let (working_start, working_end) = self.profile.working_minutes();
        if start < working_start || end > working_end {
            return Err(SlotRejection::OutsideWorkingHours {
                working_start: self.profile.working_start,
                working_end: self.profile.working_end,
            });
        }

        if let Some(block) = self.blocks.iter().find(|block| block.overlaps(date, start, end)) {
            return Err(SlotRejection::Blocked {
                block_id: block.id,
                title: block.title.clone(),
            });
        }

        let gap = self.profile.required_gap_minutes();
        let occupied = self.booked.iter().find(|booked| {
            if booked.date != date {
                return false;
            }
            let booked_start = minute_of_day(booked.start_time);
            let booked_end = booked_start + booked.duration_minutes as i64;
            start < booked_end + gap && booked_start < end + gap
        });
        if let Some(booked) = occupied {
            return Err(SlotRejection::Occupied {
                appointment_id: booked.appointment_id,
            });
        }

        if let Some(clock) = self.clock {
            let instant = clock
                .to_instant(date, time)
                .map_err(|_| SlotRejection::NonexistentLocalTime { date, time })?;

            if let Some(end_time) = time_of_minute(end) {
                clock
                    .to_instant(date, end_time)
                    .map_err(|_| SlotRejection::NonexistentLocalTime { date, time: end_time })?;
            }

            if let Some(not_before) = self.not_before {
                if instant < not_before {
                    return Err(SlotRejection::InPast);
                }
            }
        }

        Ok(())
    }

    pub fn is_bookable(&self, date: NaiveDate, time: NaiveTime, duration_minutes: i32) -> bool {
        self.check(date, time, duration_minutes).is_ok()
    }

    /// Start times on a session-length grid anchored at working start.
    pub fn free_slots(&self, date: NaiveDate) -> Vec<NaiveTime> {
        if !self.profile.works_on(date) {
            return Vec::new();
        }

        let session = self.profile.session_duration_minutes as i64;
        if session <= 0 {
            return Vec::new();
        }

        let (working_start, working_end) = self.profile.working_minutes();
        let mut slots = Vec::new();
        let mut start = working_start;

        while start + session <= working_end {
            if let Some(time) = time_of_minute(start) {
                if self.is_bookable(date, time, session as i32) {
                    slots.push(time);
                }
            }
            start += session;
        }

        slots
    }
}
