//! Translation between provider events and local records.
//!
//! Imported events become date-bound blocks in the deployment's wall-clock
//! time. Exported records become events carrying an origin tag so the next
//! import recognizes and skips them.

use chrono::{Duration, NaiveDate};

use appointment_cell::models::Appointment;
use availability_cell::models::{weekday_number, AvailabilityBlock, BlockKind};
use shared_utils::{WallClock, WallClockError};

use crate::models::{EventPayload, EventTime, ProviderEvent};

const BYDAY: [&str; 7] = ["SU", "MO", "TU", "WE", "TH", "FR", "SA"];

/// Block shape for a busy upstream event, or `None` when it has no extent.
pub fn imported_kind(event: &ProviderEvent, clock: &WallClock) -> Option<BlockKind> {
    match (event.start, event.end) {
        (EventTime::Date(start), EventTime::Date(end)) => {
            // Provider end dates are exclusive.
            let last = end.pred_opt().filter(|last| *last > start);
            Some(BlockKind::FullDay { start_date: start, end_date: last })
        }
        (EventTime::DateTime(start), EventTime::DateTime(end)) if start < end => {
            let (start_date, start_time) = clock.from_instant(start);
            let (end_date, end_time) = clock.from_instant(end);
            Some(BlockKind::TimeRange {
                start_date,
                end_date: (end_date != start_date).then_some(end_date),
                start_time,
                end_time,
            })
        }
        _ => None,
    }
}

pub fn appointment_payload(appointment: &Appointment, clock: &WallClock) -> Result<EventPayload, WallClockError> {
    let start = clock.to_instant(appointment.appointment_date, appointment.appointment_time)?;
    let end = start + Duration::minutes(appointment.duration_minutes as i64);

    Ok(EventPayload {
        summary: format!("Session ({})", appointment.appointment_type),
        description: appointment.meeting_link.clone().or_else(|| appointment.location.clone()),
        start: EventTime::DateTime(start),
        end: EventTime::DateTime(end),
        time_zone: clock.zone_name().to_string(),
        recurrence: None,
        origin_id: appointment.id,
    })
}

/// Event for a manual block. `None` when nothing of the block lies on or after `today`.
pub fn block_payload(
    block: &AvailabilityBlock,
    clock: &WallClock,
    today: NaiveDate,
) -> Result<Option<EventPayload>, WallClockError> {
    let summary = block.title.clone().unwrap_or_else(|| "Unavailable".to_string());
    let time_zone = clock.zone_name().to_string();

    let (start, end, recurrence) = match &block.kind {
        BlockKind::FullDay { .. } => {
            let Some((first, last)) = block.kind.date_bounds() else { return Ok(None) };
            if last < today {
                return Ok(None);
            }
            (EventTime::Date(first), EventTime::Date(last + Duration::days(1)), None)
        }
        BlockKind::TimeRange { start_date, end_date, start_time, end_time } => {
            let last = end_date.unwrap_or(*start_date);
            if last < today {
                return Ok(None);
            }
            (
                EventTime::DateTime(clock.to_instant(*start_date, *start_time)?),
                EventTime::DateTime(clock.to_instant(last, *end_time)?),
                None,
            )
        }
        BlockKind::WeeklyDay { day_of_week, until } => {
            let Some(anchor) = first_occurrence(*day_of_week, today, *until) else { return Ok(None) };
            let rule = weekly_rule(*day_of_week, until.map(|u| u.format("%Y%m%d").to_string()));
            (EventTime::Date(anchor), EventTime::Date(anchor + Duration::days(1)), Some(rule))
        }
        BlockKind::WeeklyRange { day_of_week, start_time, end_time, until } => {
            let Some(anchor) = first_occurrence(*day_of_week, today, *until) else { return Ok(None) };
            // Timed series take UNTIL as a UTC instant: the end of the last local day.
            let until_utc = until.map(|u| {
                (clock.start_of_day(u + Duration::days(1)) - Duration::seconds(1))
                    .format("%Y%m%dT%H%M%SZ")
                    .to_string()
            });
            (
                EventTime::DateTime(clock.to_instant(anchor, *start_time)?),
                EventTime::DateTime(clock.to_instant(anchor, *end_time)?),
                Some(weekly_rule(*day_of_week, until_utc)),
            )
        }
    };

    Ok(Some(EventPayload {
        summary,
        description: None,
        start,
        end,
        time_zone,
        recurrence,
        origin_id: block.id,
    }))
}

fn first_occurrence(day_of_week: u8, from: NaiveDate, until: Option<NaiveDate>) -> Option<NaiveDate> {
    let date = from
        .iter_days()
        .take(7)
        .find(|date| weekday_number(*date) == day_of_week)?;
    until.map_or(true, |until| date <= until).then_some(date)
}

fn weekly_rule(day_of_week: u8, until: Option<String>) -> String {
    let day = BYDAY[(day_of_week % 7) as usize];
    match until {
        Some(until) => format!("RRULE:FREQ=WEEKLY;BYDAY={};UNTIL={}", day, until),
        None => format!("RRULE:FREQ=WEEKLY;BYDAY={}", day),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use uuid::Uuid;

    fn clock() -> WallClock {
        WallClock::from_zone_name("America/New_York").unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn time(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn event(start: EventTime, end: EventTime) -> ProviderEvent {
        ProviderEvent {
            id: "evt".to_string(),
            summary: None,
            start,
            end,
            cancelled: false,
            transparent: false,
            exported_by_us: false,
        }
    }

    #[test]
    fn test_single_all_day_event_uses_exclusive_end() {
        let kind = imported_kind(
            &event(EventTime::Date(date("2024-07-04")), EventTime::Date(date("2024-07-05"))),
            &clock(),
        );
        assert_eq!(kind, Some(BlockKind::FullDay { start_date: date("2024-07-04"), end_date: None }));
    }

    #[test]
    fn test_multi_day_all_day_event() {
        let kind = imported_kind(
            &event(EventTime::Date(date("2024-07-04")), EventTime::Date(date("2024-07-08"))),
            &clock(),
        );
        assert_eq!(
            kind,
            Some(BlockKind::FullDay { start_date: date("2024-07-04"), end_date: Some(date("2024-07-07")) })
        );
    }

    #[test]
    fn test_timed_event_converts_to_wall_clock() {
        let kind = imported_kind(
            &event(
                EventTime::DateTime("2024-07-08T14:00:00Z".parse().unwrap()),
                EventTime::DateTime("2024-07-08T15:30:00Z".parse().unwrap()),
            ),
            &clock(),
        )
        .unwrap();

        assert_eq!(
            kind,
            BlockKind::TimeRange {
                start_date: date("2024-07-08"),
                end_date: None,
                start_time: time("10:00"),
                end_time: time("11:30"),
            }
        );
    }

    #[test]
    fn test_overnight_event_spans_two_dates() {
        let kind = imported_kind(
            &event(
                EventTime::DateTime("2024-07-09T02:00:00Z".parse().unwrap()),
                EventTime::DateTime("2024-07-09T14:00:00Z".parse().unwrap()),
            ),
            &clock(),
        )
        .unwrap();

        // 22:00 on the 8th until 10:00 on the 9th, local.
        assert!(kind.coverage_on(date("2024-07-08")).is_some());
        assert!(kind.coverage_on(date("2024-07-09")).is_some());
        assert!(kind.coverage_on(date("2024-07-10")).is_none());
    }

    #[test]
    fn test_empty_event_is_ignored() {
        let instant = "2024-07-08T14:00:00Z".parse().unwrap();
        assert_eq!(imported_kind(&event(EventTime::DateTime(instant), EventTime::DateTime(instant)), &clock()), None);
    }

    #[test]
    fn test_weekly_range_exports_as_recurring_event() {
        let block = AvailabilityBlock::manual(
            Uuid::new_v4(),
            BlockKind::WeeklyRange {
                day_of_week: 1,
                start_time: time("09:00"),
                end_time: time("10:00"),
                until: None,
            },
            Some("Supervision".to_string()),
        );

        // 2024-07-03 is a Wednesday; the series starts the following Monday.
        let payload = block_payload(&block, &clock(), date("2024-07-03")).unwrap().unwrap();

        assert_eq!(payload.recurrence.as_deref(), Some("RRULE:FREQ=WEEKLY;BYDAY=MO"));
        assert_eq!(payload.start, EventTime::DateTime("2024-07-08T13:00:00Z".parse().unwrap()));
        assert_eq!(payload.summary, "Supervision");
        assert_eq!(payload.origin_id, block.id);
    }

    #[test]
    fn test_weekly_day_until_before_first_occurrence_is_not_exported() {
        let block = AvailabilityBlock::manual(
            Uuid::new_v4(),
            BlockKind::WeeklyDay { day_of_week: 1, until: Some(date("2024-07-05")) },
            None,
        );

        assert_eq!(block_payload(&block, &clock(), date("2024-07-03")).unwrap(), None);
    }

    #[test]
    fn test_past_full_day_block_is_not_exported() {
        let block = AvailabilityBlock::manual(
            Uuid::new_v4(),
            BlockKind::FullDay { start_date: date("2024-07-01"), end_date: None },
            None,
        );

        assert_eq!(block_payload(&block, &clock(), date("2024-07-03")).unwrap(), None);

        let payload = block_payload(&block, &clock(), date("2024-07-01")).unwrap().unwrap();
        assert_eq!(payload.end, EventTime::Date(date("2024-07-02")));
    }
}
