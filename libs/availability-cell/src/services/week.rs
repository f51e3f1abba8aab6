use chrono::{Duration, NaiveDate};

use crate::models::{
    weekday_number, AvailabilityBlock, CellState, DayColumn, HourCell, WeekGrid, WorkingProfile,
};

/// Seven consecutive days from `week_start`, 24 hourly cells each.
///
/// Hours outside the working profile are `NonWorking` whatever covers them.
/// Inside working hours a manual block wins over an external one.
pub fn project(blocks: &[AvailabilityBlock], profile: &WorkingProfile, week_start: NaiveDate) -> WeekGrid {
    let (working_start, working_end) = profile.working_minutes();

    let days = (0..7)
        .map(|offset| {
            let date = week_start + Duration::days(offset);
            let is_working_day = profile.works_on(date);

            let cells = (0u8..24)
                .map(|hour| {
                    let start = hour as i64 * 60;
                    let end = start + 60;
                    let working = is_working_day && start < working_end && working_start < end;

                    let state = if !working {
                        CellState::NonWorking
                    } else {
                        cell_state(blocks, date, start, end)
                    };

                    HourCell { hour, state }
                })
                .collect();

            DayColumn {
                date,
                day_of_week: weekday_number(date),
                is_working_day,
                cells,
            }
        })
        .collect();

    WeekGrid { week_start, days }
}

fn cell_state(blocks: &[AvailabilityBlock], date: NaiveDate, start: i64, end: i64) -> CellState {
    let mut external = None;

    for block in blocks.iter().filter(|block| !block.is_tombstoned() && block.overlaps(date, start, end)) {
        if !block.is_external_event() {
            return CellState::Blocked {
                block_id: block.id,
                title: block.title.clone(),
            };
        }
        external.get_or_insert(block);
    }

    match external {
        Some(block) => CellState::ExternalBlocked {
            block_id: block.id,
            title: block.title.clone(),
        },
        None => CellState::Free,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use uuid::Uuid;

    use crate::models::BlockKind;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn time(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn profile() -> WorkingProfile {
        WorkingProfile {
            professional_id: Uuid::new_v4(),
            working_days: vec![1, 2, 3, 4, 5],
            working_start: time("09:00"),
            working_end: time("17:00"),
            session_duration_minutes: 50,
            break_duration_minutes: 10,
            tolerance_minutes: 0,
            updated_at: None,
        }
    }

    #[test]
    fn test_grid_separates_non_working_blocked_and_external() {
        let profile = profile();
        let lunch = AvailabilityBlock::manual(
            profile.professional_id,
            BlockKind::WeeklyRange {
                day_of_week: 1,
                start_time: time("12:00"),
                end_time: time("13:00"),
                until: None,
            },
            Some("Lunch".to_string()),
        );
        let dentist = AvailabilityBlock::external(
            profile.professional_id,
            "evt-1".to_string(),
            BlockKind::TimeRange {
                start_date: date("2024-07-02"),
                end_date: None,
                start_time: time("14:30"),
                end_time: time("15:00"),
            },
            Some("Dentist".to_string()),
        );
        let blocks = vec![lunch.clone(), dentist.clone()];

        // 2024-07-01 is a Monday.
        let grid = project(&blocks, &profile, date("2024-07-01"));

        assert_eq!(grid.days.len(), 7);
        assert!(grid.days.iter().all(|day| day.cells.len() == 24));
        assert_eq!(grid.cell(0, 8), Some(&CellState::NonWorking));
        assert_eq!(grid.cell(0, 9), Some(&CellState::Free));
        assert_eq!(
            grid.cell(0, 12),
            Some(&CellState::Blocked { block_id: lunch.id, title: Some("Lunch".to_string()) })
        );
        assert_eq!(
            grid.cell(1, 14),
            Some(&CellState::ExternalBlocked { block_id: dentist.id, title: Some("Dentist".to_string()) })
        );
        assert_eq!(grid.cell(1, 15), Some(&CellState::Free));
        // Saturday
        assert!(!grid.days[5].is_working_day);
        assert_eq!(grid.cell(5, 12), Some(&CellState::NonWorking));
    }

    #[test]
    fn test_manual_block_wins_over_external() {
        let profile = profile();
        let external = AvailabilityBlock::external(
            profile.professional_id,
            "evt-2".to_string(),
            BlockKind::FullDay { start_date: date("2024-07-03"), end_date: None },
            None,
        );
        let manual = AvailabilityBlock::manual(
            profile.professional_id,
            BlockKind::TimeRange {
                start_date: date("2024-07-03"),
                end_date: None,
                start_time: time("10:00"),
                end_time: time("11:00"),
            },
            None,
        );

        let grid = project(&[external.clone(), manual.clone()], &profile, date("2024-07-01"));

        assert_eq!(grid.cell(2, 10), Some(&CellState::Blocked { block_id: manual.id, title: None }));
        assert_eq!(grid.cell(2, 11), Some(&CellState::ExternalBlocked { block_id: external.id, title: None }));
    }
}
