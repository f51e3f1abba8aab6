use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use calendar_sync_cell::services::CalendarReconciler;
use reminder_cell::services::ReminderSweeper;

use crate::router::Services;

/// Starts the periodic reconciliation and reminder loops.
pub fn spawn_all(services: &Services) -> Vec<JoinHandle<()>> {
    let config = &services.config;
    let mut handles = Vec::new();

    if config.is_calendar_sync_configured() {
        handles.push(spawn_calendar_sync(
            services.reconciler.clone(),
            Duration::from_secs(config.calendar_sync_interval_minutes * 60),
        ));
    } else {
        warn!("Google Calendar credentials missing, periodic reconciliation disabled");
    }

    handles.push(spawn_reminder_sweeps(
        services.sweeper.clone(),
        Duration::from_secs(config.reminder_sweep_interval_minutes * 60),
    ));

    handles
}

fn spawn_calendar_sync(reconciler: Arc<CalendarReconciler>, period: Duration) -> JoinHandle<()> {
    supervise("calendar-sync", period, move || {
        let reconciler = reconciler.clone();
        async move {
            let run = reconciler.run_all().await;
            info!(
                "Reconciliation run {} finished {}: {} synced, {} failed, {} skipped",
                run.id, run.status, run.succeeded, run.failed, run.skipped
            );
        }
    })
}

fn spawn_reminder_sweeps(sweeper: Arc<ReminderSweeper>, period: Duration) -> JoinHandle<()> {
    supervise("reminder-sweep", period, move || {
        let sweeper = sweeper.clone();
        async move {
            if let Err(e) = sweeper.sweep().await {
                error!("Reminder sweep failed: {}", e);
            }
        }
    })
}

/// Runs `tick` every `period`. A tick that panics is logged and the loop keeps going;
/// a tick that overruns delays the next one instead of bunching up.
fn supervise<F, Fut>(name: &'static str, period: Duration, tick: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Started {} job every {:?}", name, period);

        loop {
            ticker.tick().await;
            debug!("Running {} job", name);

            if let Err(e) = tokio::spawn(tick()).await {
                error!("{} job aborted: {}", name, e);
            }
        }
    })
}
