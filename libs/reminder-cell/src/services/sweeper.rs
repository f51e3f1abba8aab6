// libs/reminder-cell/src/services/sweeper.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use appointment_cell::models::{Appointment, ReminderLead};
use appointment_cell::services::AppointmentStore;
use shared_utils::WallClock;

use crate::models::{ReminderError, ReminderTemplate, SweepReport};
use crate::services::directory::RecipientDirectory;
use crate::services::sender::NotificationSender;

pub const DEFAULT_SWEEP_INTERVAL_MINUTES: i64 = 60;

enum Delivery {
    Sent,
    AlreadyClaimed,
    NoRecipients,
    Failed,
}

/// Fires the 24h and 1h reminders.
///
/// A sweep at `now` owns, for each lead time, the appointments starting in
/// `(now + lead - interval/2, now + lead + interval/2]`. Sweeps one interval
/// apart therefore partition time: every appointment lands in exactly one
/// sweep's window, and the set-once markers stop repeats when sweeps overlap.
pub struct ReminderSweeper {
    appointments: Arc<dyn AppointmentStore>,
    directory: Arc<dyn RecipientDirectory>,
    sender: Arc<dyn NotificationSender>,
    clock: WallClock,
    interval: Duration,
}

impl ReminderSweeper {
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        directory: Arc<dyn RecipientDirectory>,
        sender: Arc<dyn NotificationSender>,
        clock: WallClock,
    ) -> Self {
        Self {
            appointments,
            directory,
            sender,
            clock,
            interval: Duration::minutes(DEFAULT_SWEEP_INTERVAL_MINUTES),
        }
    }

    pub fn with_interval_minutes(mut self, minutes: i64) -> Self {
        self.interval = Duration::minutes(minutes.max(1));
        self
    }

    /// `(low, high]` instants whose appointments are due for `lead` at `now`.
    pub fn window(&self, lead: ReminderLead, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let half = self.interval / 2;
        let target = now + lead.lead();
        (target - half, target + half)
    }

    pub async fn sweep(&self) -> Result<SweepReport, ReminderError> {
        self.sweep_at(Utc::now()).await
    }

    #[instrument(skip(self))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, ReminderError> {
        let mut report = SweepReport::default();

        let (earliest, _) = self.window(ReminderLead::HourBefore, now);
        let (_, latest) = self.window(ReminderLead::DayBefore, now);
        let from = self.clock.from_instant(earliest).0;
        let to = self.clock.from_instant(latest).0;

        let candidates = self.appointments.list_confirmed_between(from, to).await?;
        debug!("{} confirmed appointments between {} and {}", candidates.len(), from, to);

        for appointment in candidates {
            report.examined += 1;
            let starts_at = self.clock.to_instant(appointment.appointment_date, appointment.appointment_time);

            for lead in ReminderLead::ALL {
                if appointment.reminder_sent_at(lead).is_some() {
                    continue;
                }
                let (low, high) = self.window(lead, now);

                let starts_at = match &starts_at {
                    Ok(instant) => *instant,
                    Err(e) => {
                        // Reported by the one sweep whose window holds the end of the gap.
                        if self.gap_end(&appointment).is_some_and(|end| end > low && end <= high) {
                            warn!("Appointment {} starts at no real instant, skipping reminder: {}", appointment.id, e);
                            report.skipped += 1;
                        }
                        continue;
                    }
                };
                if starts_at <= low || starts_at > high {
                    continue;
                }

                match self.deliver(&appointment, lead, starts_at, now).await {
                    Delivery::Sent => report.record_sent(lead),
                    Delivery::AlreadyClaimed | Delivery::NoRecipients => report.skipped += 1,
                    Delivery::Failed => report.failed += 1,
                }
            }
        }

        info!(
            "Reminder sweep: {} examined, {} sent (24h {}, 1h {}), {} failed, {} skipped",
            report.examined,
            report.total_sent(),
            report.sent_24h,
            report.sent_1h,
            report.failed,
            report.skipped
        );
        Ok(report)
    }

    /// First real instant after a wall-clock time skipped by a DST change.
    fn gap_end(&self, appointment: &Appointment) -> Option<DateTime<Utc>> {
        let shifted = appointment.appointment_date.and_time(appointment.appointment_time) + Duration::hours(1);
        self.clock.to_instant(shifted.date(), shifted.time()).ok()
    }

    async fn deliver(
        &self,
        appointment: &Appointment,
        lead: ReminderLead,
        starts_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Delivery {
        let recipients = match self
            .directory
            .contacts(&[appointment.patient_id, appointment.professional_id])
            .await
        {
            Ok(contacts) => contacts,
            Err(e) => {
                warn!("Recipients of appointment {} unavailable: {}", appointment.id, e);
                return Delivery::Failed;
            }
        };

        let reachable: Vec<_> = recipients.into_iter().filter(|c| c.is_reachable()).collect();
        if reachable.is_empty() {
            warn!("Appointment {} has nobody to remind", appointment.id);
            return Delivery::NoRecipients;
        }

        let template = ReminderTemplate::from(lead);
        let data = self.template_data(appointment, starts_at);

        let mut delivered = false;
        for recipient in &reachable {
            delivered |= self.sender.send(recipient, template, &data).await;
        }
        if !delivered {
            return Delivery::Failed;
        }

        match self.appointments.mark_reminder_sent(appointment.id, lead, now).await {
            Ok(true) => {
                debug!("{} recorded for appointment {}", template, appointment.id);
                Delivery::Sent
            }
            Ok(false) => {
                debug!("{} for appointment {} was already recorded", template, appointment.id);
                Delivery::AlreadyClaimed
            }
            Err(e) => {
                warn!("Sent {} for appointment {} but could not record it: {}", template, appointment.id, e);
                Delivery::Failed
            }
        }
    }

    fn template_data(&self, appointment: &Appointment, starts_at: DateTime<Utc>) -> Value {
        json!({
            "appointment_id": appointment.id,
            "appointment_date": appointment.appointment_date,
            "appointment_time": appointment.appointment_time.format("%H:%M").to_string(),
            "starts_at": self.clock.to_rfc3339(starts_at),
            "timezone": self.clock.zone_name(),
            "duration_minutes": appointment.duration_minutes,
            "appointment_type": appointment.appointment_type,
            "location": appointment.location,
            "meeting_link": appointment.meeting_link,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appointment_cell::services::InMemoryAppointmentStore;

    use crate::services::directory::InMemoryRecipientDirectory;
    use crate::services::sender::RecordingNotificationSender;

    #[test]
    fn test_windows_are_half_open_and_centered() {
        let sweeper = ReminderSweeper::new(
            Arc::new(InMemoryAppointmentStore::new()),
            Arc::new(InMemoryRecipientDirectory::new()),
            Arc::new(RecordingNotificationSender::new()),
            WallClock::from_zone_name("UTC").unwrap(),
        );
        let now: DateTime<Utc> = "2024-07-01T12:00:00Z".parse().unwrap();

        let (low, high) = sweeper.window(ReminderLead::DayBefore, now);
        assert_eq!(low, "2024-07-02T11:30:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(high, "2024-07-02T12:30:00Z".parse::<DateTime<Utc>>().unwrap());

        // The next sweep's window starts exactly where this one ends.
        let (next_low, _) = sweeper.window(ReminderLead::DayBefore, now + Duration::hours(1));
        assert_eq!(next_low, high);
    }
}
