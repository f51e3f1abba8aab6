use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::SupabaseError;
use shared_models::error::AppError;

pub const MINUTES_PER_DAY: i64 = 24 * 60;

/// 0 = Sunday ... 6 = Saturday.
pub fn weekday_number(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

pub fn minute_of_day(time: NaiveTime) -> i64 {
    (time.hour() * 60 + time.minute()) as i64
}

// ==============================================================================
// WORKING PROFILE
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingProfile {
    pub professional_id: Uuid,
    pub working_days: Vec<u8>,
    pub working_start: NaiveTime,
    pub working_end: NaiveTime,
    pub session_duration_minutes: i32,
    pub break_duration_minutes: i32,
    #[serde(default)]
    pub tolerance_minutes: i32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkingProfile {
    pub fn works_on(&self, date: NaiveDate) -> bool {
        self.working_days.contains(&weekday_number(date))
    }

    /// Working hours as `[start, end)` minutes of the day.
    pub fn working_minutes(&self) -> (i64, i64) {
        (minute_of_day(self.working_start), minute_of_day(self.working_end))
    }

    /// Gap that must separate the end of one appointment from the start of the next.
    /// Tolerance shortens the break but never lets sessions overlap.
    pub fn required_gap_minutes(&self) -> i64 {
        (self.break_duration_minutes as i64 - self.tolerance_minutes as i64).max(0)
    }

    pub fn validate(&self) -> Result<(), AvailabilityError> {
        if self.working_days.is_empty() {
            return Err(AvailabilityError::Validation("At least one working day is required".to_string()));
        }
        if let Some(day) = self.working_days.iter().find(|day| **day > 6) {
            return Err(AvailabilityError::Validation(format!(
                "Working day {} is out of range, expected 0 (Sunday) to 6 (Saturday)",
                day
            )));
        }
        if self.working_start >= self.working_end {
            return Err(AvailabilityError::Validation("Working start must be before working end".to_string()));
        }
        if self.session_duration_minutes <= 0 {
            return Err(AvailabilityError::Validation("Session duration must be positive".to_string()));
        }
        if self.break_duration_minutes < 0 || self.tolerance_minutes < 0 {
            return Err(AvailabilityError::Validation("Break and tolerance cannot be negative".to_string()));
        }
        let (start, end) = self.working_minutes();
        if self.session_duration_minutes as i64 > end - start {
            return Err(AvailabilityError::Validation("Session duration exceeds working hours".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveWorkingProfileRequest {
    pub working_days: Vec<u8>,
    pub working_start: NaiveTime,
    pub working_end: NaiveTime,
    pub session_duration_minutes: i32,
    pub break_duration_minutes: i32,
    #[serde(default)]
    pub tolerance_minutes: i32,
}

impl SaveWorkingProfileRequest {
    pub fn into_profile(self, professional_id: Uuid) -> WorkingProfile {
        let mut working_days = self.working_days;
        working_days.sort_unstable();
        working_days.dedup();

        WorkingProfile {
            professional_id,
            working_days,
            working_start: self.working_start,
            working_end: self.working_end,
            session_duration_minutes: self.session_duration_minutes,
            break_duration_minutes: self.break_duration_minutes,
            tolerance_minutes: self.tolerance_minutes,
            updated_at: Some(Utc::now()),
        }
    }
}

// ==============================================================================
// AVAILABILITY BLOCKS
// ==============================================================================

/// The part of one calendar date a block covers, as `[start, end)` minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaySpan {
    pub start: i64,
    pub end: i64,
}

impl DaySpan {
    pub const WHOLE_DAY: DaySpan = DaySpan { start: 0, end: MINUTES_PER_DAY };

    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.start < end && start < self.end
    }

    pub fn contains(&self, minute: i64) -> bool {
        self.start <= minute && minute < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "block_type", rename_all = "snake_case")]
pub enum BlockKind {
    FullDay {
        start_date: NaiveDate,
        #[serde(default)]
        end_date: Option<NaiveDate>,
    },
    WeeklyDay {
        day_of_week: u8,
        #[serde(default)]
        until: Option<NaiveDate>,
    },
    /// A multi-date range is one continuous span from (start_date, start_time)
    /// to (end_date, end_time).
    TimeRange {
        start_date: NaiveDate,
        #[serde(default)]
        end_date: Option<NaiveDate>,
        start_time: NaiveTime,
        end_time: NaiveTime,
    },
    WeeklyRange {
        day_of_week: u8,
        start_time: NaiveTime,
        end_time: NaiveTime,
        #[serde(default)]
        until: Option<NaiveDate>,
    },
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::FullDay { .. } => "full_day",
            BlockKind::WeeklyDay { .. } => "weekly_day",
            BlockKind::TimeRange { .. } => "time_range",
            BlockKind::WeeklyRange { .. } => "weekly_range",
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, BlockKind::WeeklyDay { .. } | BlockKind::WeeklyRange { .. })
    }

    /// First and last covered date of a date-bound block. Weekly blocks have none.
    pub fn date_bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        match self {
            BlockKind::FullDay { start_date, end_date }
            | BlockKind::TimeRange { start_date, end_date, .. } => {
                Some((*start_date, end_date.unwrap_or(*start_date)))
            }
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), AvailabilityError> {
        match self {
            BlockKind::FullDay { start_date, end_date } => {
                check_date_order(*start_date, *end_date)
            }
            BlockKind::WeeklyDay { day_of_week, .. } => check_day_of_week(*day_of_week),
            BlockKind::TimeRange { start_date, end_date, start_time, end_time } => {
                check_date_order(*start_date, *end_date)?;
                let single_day = end_date.map_or(true, |end| end == *start_date);
                if single_day && start_time >= end_time {
                    return Err(AvailabilityError::Validation("Start time must be before end time".to_string()));
                }
                Ok(())
            }
            BlockKind::WeeklyRange { day_of_week, start_time, end_time, .. } => {
                check_day_of_week(*day_of_week)?;
                if start_time >= end_time {
                    return Err(AvailabilityError::Validation("Start time must be before end time".to_string()));
                }
                Ok(())
            }
        }
    }

    pub fn coverage_on(&self, date: NaiveDate) -> Option<DaySpan> {
        match self {
            BlockKind::FullDay { .. } => {
                let (first, last) = self.date_bounds()?;
                (first <= date && date <= last).then_some(DaySpan::WHOLE_DAY)
            }
            BlockKind::WeeklyDay { day_of_week, until } => {
                weekly_match(*day_of_week, *until, date).then_some(DaySpan::WHOLE_DAY)
            }
            BlockKind::TimeRange { start_time, end_time, .. } => {
                let (first, last) = self.date_bounds()?;
                if date < first || date > last {
                    return None;
                }

                let start = if date == first { minute_of_day(*start_time) } else { 0 };
                let end = if date == last { minute_of_day(*end_time) } else { MINUTES_PER_DAY };
                (start < end).then_some(DaySpan { start, end })
            }
            BlockKind::WeeklyRange { day_of_week, start_time, end_time, until } => {
                weekly_match(*day_of_week, *until, date).then_some(DaySpan {
                    start: minute_of_day(*start_time),
                    end: minute_of_day(*end_time),
                })
            }
        }
    }
}

fn weekly_match(day_of_week: u8, until: Option<NaiveDate>, date: NaiveDate) -> bool {
    weekday_number(date) == day_of_week && until.map_or(true, |until| date <= until)
}

fn check_date_order(start: NaiveDate, end: Option<NaiveDate>) -> Result<(), AvailabilityError> {
    match end {
        Some(end) if end < start => Err(AvailabilityError::Validation(
            "End date cannot be before start date".to_string(),
        )),
        _ => Ok(()),
    }
}

fn check_day_of_week(day_of_week: u8) -> Result<(), AvailabilityError> {
    if day_of_week > 6 {
        return Err(AvailabilityError::Validation(
            "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum BlockSource {
    /// Declared locally; carries the upstream event id once exported.
    Manual { exported_event_id: Option<String> },
    /// Mirrored from the connected calendar.
    External { external_event_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityBlock {
    pub id: Uuid,
    pub professional_id: Uuid,
    #[serde(flatten)]
    pub kind: BlockKind,
    pub title: Option<String>,
    pub source: BlockSource,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AvailabilityBlock {
    pub fn manual(professional_id: Uuid, kind: BlockKind, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            professional_id,
            kind,
            title,
            source: BlockSource::Manual { exported_event_id: None },
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn external(professional_id: Uuid, external_event_id: String, kind: BlockKind, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            professional_id,
            kind,
            title,
            source: BlockSource::External { external_event_id },
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_external_event(&self) -> bool {
        matches!(self.source, BlockSource::External { .. })
    }

    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Upstream event id, whichever direction the block was synced in.
    pub fn upstream_reference(&self) -> Option<&str> {
        match &self.source {
            BlockSource::Manual { exported_event_id } => exported_event_id.as_deref(),
            BlockSource::External { external_event_id } => Some(external_event_id.as_str()),
        }
    }

    pub fn coverage_on(&self, date: NaiveDate) -> Option<DaySpan> {
        self.kind.coverage_on(date)
    }

    pub fn covers_date(&self, date: NaiveDate) -> bool {
        self.coverage_on(date).is_some()
    }

    pub fn covers(&self, date: NaiveDate, time: NaiveTime) -> bool {
        self.coverage_on(date)
            .map_or(false, |span| span.contains(minute_of_day(time)))
    }

    /// Whether any minute of `[start, end)` on `date` is covered.
    pub fn overlaps(&self, date: NaiveDate, start: i64, end: i64) -> bool {
        self.coverage_on(date)
            .map_or(false, |span| span.overlaps(start, end))
    }
}

/// Flat `availability_blocks` row as stored in PostgREST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRow {
    pub id: Uuid,
    pub professional_id: Uuid,
    pub block_type: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub day_of_week: Option<i16>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub recurrence_until: Option<NaiveDate>,
    pub is_recurring: bool,
    pub is_external_event: bool,
    pub external_event_id: Option<String>,
    pub title: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<BlockRow> for AvailabilityBlock {
    type Error = AvailabilityError;

    fn try_from(row: BlockRow) -> Result<Self, Self::Error> {
        let malformed = |reason: &str| AvailabilityError::MalformedBlock {
            id: row.id,
            reason: reason.to_string(),
        };

        let day_of_week = || -> Result<u8, AvailabilityError> {
            let day = row.day_of_week.ok_or_else(|| malformed("missing day_of_week"))?;
            u8::try_from(day).map_err(|_| malformed("day_of_week out of range"))
        };
        let start_date = || row.start_date.ok_or_else(|| malformed("missing start_date"));
        let start_time = || row.start_time.ok_or_else(|| malformed("missing start_time"));
        let end_time = || row.end_time.ok_or_else(|| malformed("missing end_time"));

        let kind = match row.block_type.as_str() {
            "full_day" => BlockKind::FullDay {
                start_date: start_date()?,
                end_date: row.end_date,
            },
            "weekly_day" => BlockKind::WeeklyDay {
                day_of_week: day_of_week()?,
                until: row.recurrence_until,
            },
            "time_range" => BlockKind::TimeRange {
                start_date: start_date()?,
                end_date: row.end_date,
                start_time: start_time()?,
                end_time: end_time()?,
            },
            "weekly_range" => BlockKind::WeeklyRange {
                day_of_week: day_of_week()?,
                start_time: start_time()?,
                end_time: end_time()?,
                until: row.recurrence_until,
            },
            other => return Err(malformed(&format!("unknown block_type '{}'", other))),
        };

        kind.validate().map_err(|e| malformed(&e.to_string()))?;

        let source = if row.is_external_event {
            BlockSource::External {
                external_event_id: row
                    .external_event_id
                    .clone()
                    .ok_or_else(|| malformed("external block without external_event_id"))?,
            }
        } else {
            BlockSource::Manual { exported_event_id: row.external_event_id.clone() }
        };

        Ok(AvailabilityBlock {
            id: row.id,
            professional_id: row.professional_id,
            kind,
            title: row.title,
            source,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&AvailabilityBlock> for BlockRow {
    fn from(block: &AvailabilityBlock) -> Self {
        let mut row = BlockRow {
            id: block.id,
            professional_id: block.professional_id,
            block_type: block.kind.as_str().to_string(),
            start_date: None,
            end_date: None,
            day_of_week: None,
            start_time: None,
            end_time: None,
            recurrence_until: None,
            is_recurring: block.kind.is_recurring(),
            is_external_event: block.is_external_event(),
            external_event_id: block.upstream_reference().map(str::to_string),
            title: block.title.clone(),
            deleted_at: block.deleted_at,
            created_at: block.created_at,
            updated_at: block.updated_at,
        };

        match &block.kind {
            BlockKind::FullDay { start_date, end_date } => {
                row.start_date = Some(*start_date);
                row.end_date = *end_date;
            }
            BlockKind::WeeklyDay { day_of_week, until } => {
                row.day_of_week = Some(*day_of_week as i16);
                row.recurrence_until = *until;
            }
            BlockKind::TimeRange { start_date, end_date, start_time, end_time } => {
                row.start_date = Some(*start_date);
                row.end_date = *end_date;
                row.start_time = Some(*start_time);
                row.end_time = Some(*end_time);
            }
            BlockKind::WeeklyRange { day_of_week, start_time, end_time, until } => {
                row.day_of_week = Some(*day_of_week as i16);
                row.start_time = Some(*start_time);
                row.end_time = Some(*end_time);
                row.recurrence_until = *until;
            }
        }

        row
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBlockRequest {
    #[serde(flatten)]
    pub kind: BlockKind,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateBlockRequest {
    pub kind: Option<BlockKind>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockDeletion {
    /// Gone locally and upstream (or never had an upstream event).
    Deleted,
    /// Upstream delete failed; the reconciler retries it.
    Tombstoned,
}

// ==============================================================================
// WEEK PROJECTION
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CellState {
    NonWorking,
    Free,
    Blocked { block_id: Uuid, title: Option<String> },
    ExternalBlocked { block_id: Uuid, title: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourCell {
    pub hour: u8,
    #[serde(flatten)]
    pub state: CellState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayColumn {
    pub date: NaiveDate,
    pub day_of_week: u8,
    pub is_working_day: bool,
    pub cells: Vec<HourCell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeekGrid {
    pub week_start: NaiveDate,
    pub days: Vec<DayColumn>,
}

impl WeekGrid {
    pub fn cell(&self, day_index: usize, hour: u8) -> Option<&CellState> {
        self.days
            .get(day_index)
            .and_then(|day| day.cells.get(hour as usize))
            .map(|cell| &cell.state)
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum AvailabilityError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Working profile not found for professional {0}")]
    ProfileNotFound(Uuid),

    #[error("Availability block not found: {0}")]
    BlockNotFound(Uuid),

    #[error("Malformed availability block {id}: {reason}")]
    MalformedBlock { id: Uuid, reason: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(#[from] SupabaseError),
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::Validation(msg) => AppError::ValidationError(msg),
            AvailabilityError::ProfileNotFound(_) | AvailabilityError::BlockNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            AvailabilityError::Conflict(msg) => AppError::Conflict(msg),
            AvailabilityError::Storage(SupabaseError::Conflict(msg)) => AppError::Conflict(msg),
            AvailabilityError::MalformedBlock { .. } | AvailabilityError::Storage(_) => {
                AppError::Database(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn time(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    #[test]
    fn test_weekly_range_covers_only_its_window() {
        // Monday 09:00-10:00
        let block = AvailabilityBlock::manual(
            Uuid::new_v4(),
            BlockKind::WeeklyRange {
                day_of_week: 1,
                start_time: time("09:00"),
                end_time: time("10:00"),
                until: None,
            },
            None,
        );

        assert!(block.covers(date("2024-06-03"), time("09:30")));
        assert!(block.covers(date("2024-06-10"), time("09:30")));
        assert!(!block.covers(date("2024-06-04"), time("09:30")));
        assert!(!block.covers(date("2024-06-03"), time("10:30")));
        assert!(block.covers(date("2024-07-01"), time("09:30")));
        assert!(!block.covers(date("2024-07-01"), time("10:00")));
        assert!(!block.covers(date("2024-07-02"), time("09:30")));
        // Recurs with no upper bound.
        assert!(block.covers(date("2031-06-02"), time("09:00")));
    }

    #[test]
    fn test_weekly_until_ends_recurrence() {
        let kind = BlockKind::WeeklyDay { day_of_week: 5, until: Some(date("2024-07-12")) };

        assert!(kind.coverage_on(date("2024-07-12")).is_some());
        assert!(kind.coverage_on(date("2024-07-19")).is_none());
    }

    #[test]
    fn test_multi_day_time_range_is_continuous() {
        let kind = BlockKind::TimeRange {
            start_date: date("2024-07-01"),
            end_date: Some(date("2024-07-03")),
            start_time: time("18:00"),
            end_time: time("08:00"),
        };

        assert_eq!(kind.coverage_on(date("2024-07-01")), Some(DaySpan { start: 18 * 60, end: MINUTES_PER_DAY }));
        assert_eq!(kind.coverage_on(date("2024-07-02")), Some(DaySpan::WHOLE_DAY));
        assert_eq!(kind.coverage_on(date("2024-07-03")), Some(DaySpan { start: 0, end: 8 * 60 }));
        assert_eq!(kind.coverage_on(date("2024-07-04")), None);
    }

    #[test]
    fn test_range_ending_at_midnight_leaves_last_date_free() {
        let kind = BlockKind::TimeRange {
            start_date: date("2024-07-01"),
            end_date: Some(date("2024-07-02")),
            start_time: time("20:00"),
            end_time: time("00:00"),
        };

        assert!(kind.coverage_on(date("2024-07-02")).is_none());
    }

    #[test]
    fn test_block_validation_reasons() {
        assert_matches!(
            BlockKind::WeeklyDay { day_of_week: 7, until: None }.validate(),
            Err(AvailabilityError::Validation(_))
        );
        assert_matches!(
            BlockKind::FullDay { start_date: date("2024-07-05"), end_date: Some(date("2024-07-04")) }.validate(),
            Err(AvailabilityError::Validation(_))
        );
        assert_matches!(
            BlockKind::TimeRange {
                start_date: date("2024-07-05"),
                end_date: None,
                start_time: time("11:00"),
                end_time: time("10:00"),
            }
            .validate(),
            Err(AvailabilityError::Validation(_))
        );
    }

    #[test]
    fn test_row_conversion_rejects_incomplete_rows() {
        let block = AvailabilityBlock::manual(
            Uuid::new_v4(),
            BlockKind::WeeklyRange {
                day_of_week: 2,
                start_time: time("13:00"),
                end_time: time("14:00"),
                until: None,
            },
            Some("Lunch".to_string()),
        );

        let row = BlockRow::from(&block);
        assert!(row.is_recurring);
        assert_eq!(AvailabilityBlock::try_from(row.clone()).unwrap(), block);

        let broken = BlockRow { day_of_week: None, ..row.clone() };
        assert_matches!(AvailabilityBlock::try_from(broken), Err(AvailabilityError::MalformedBlock { .. }));

        let unknown = BlockRow { block_type: "fortnightly".to_string(), ..row };
        assert_matches!(AvailabilityBlock::try_from(unknown), Err(AvailabilityError::MalformedBlock { .. }));
    }

    #[test]
    fn test_request_parses_tagged_block() {
        let request: CreateBlockRequest = serde_json::from_value(serde_json::json!({
            "block_type": "full_day",
            "start_date": "2024-07-04",
            "title": "Holiday"
        }))
        .unwrap();

        assert_eq!(request.kind, BlockKind::FullDay { start_date: date("2024-07-04"), end_date: None });
        assert_eq!(request.title.as_deref(), Some("Holiday"));
    }

    #[test]
    fn test_required_gap_never_negative() {
        let profile = WorkingProfile {
            professional_id: Uuid::new_v4(),
            working_days: vec![1, 2, 3, 4, 5],
            working_start: time("09:00"),
            working_end: time("17:00"),
            session_duration_minutes: 50,
            break_duration_minutes: 10,
            tolerance_minutes: 15,
            updated_at: None,
        };

        assert_eq!(profile.required_gap_minutes(), 0);
        assert!(profile.validate().is_ok());
        assert!(profile.works_on(date("2024-07-05")));
        assert!(!profile.works_on(date("2024-07-06")));
    }
}
