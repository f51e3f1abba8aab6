// libs/calendar-sync-cell/src/services/reconciler.rs
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use appointment_cell::services::AppointmentStore;
use availability_cell::models::{AvailabilityBlock, AvailabilityError, BlockSource};
use availability_cell::services::BlockStore;
use shared_utils::WallClock;

use crate::models::{
    CalendarConnection, ProfessionalSyncResult, ReconciliationRun, SyncCounts, SyncError, SyncOutcome, SyncStatus,
};
use crate::services::credentials::{Credential, CredentialManager};
use crate::services::lock::ProfessionalLock;
use crate::services::mapping;
use crate::services::runs::RunLog;

pub const DEFAULT_IMPORT_WINDOW_DAYS: i64 = 60;
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Work done for one professional within one pass.
#[derive(Default)]
struct SyncPass {
    counts: SyncCounts,
    item_errors: Vec<String>,
}

/// Two-way reconciliation between local schedules and connected calendars.
/// Every step is idempotent, so a pass can be repeated or interrupted at any point.
pub struct CalendarReconciler {
    credentials: Arc<CredentialManager>,
    blocks: Arc<dyn BlockStore>,
    appointments: Arc<dyn AppointmentStore>,
    runs: Arc<dyn RunLog>,
    lock: Arc<dyn ProfessionalLock>,
    clock: WallClock,
    import_window_days: i64,
    concurrency: usize,
}

impl CalendarReconciler {
    pub fn new(
        credentials: Arc<CredentialManager>,
        blocks: Arc<dyn BlockStore>,
        appointments: Arc<dyn AppointmentStore>,
        runs: Arc<dyn RunLog>,
        lock: Arc<dyn ProfessionalLock>,
        clock: WallClock,
    ) -> Self {
        Self {
            credentials,
            blocks,
            appointments,
            runs,
            lock,
            clock,
            import_window_days: DEFAULT_IMPORT_WINDOW_DAYS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_import_window_days(mut self, days: i64) -> Self {
        self.import_window_days = days.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn status(&self, professional_id: Uuid) -> Result<SyncStatus, SyncError> {
        Ok(self
            .credentials
            .connections()
            .get(professional_id)
            .await?
            .map(|connection| SyncStatus::from(&connection))
            .unwrap_or_else(|| SyncStatus::disconnected(professional_id)))
    }

    pub async fn latest_run(&self) -> Result<Option<ReconciliationRun>, SyncError> {
        self.runs.latest().await
    }

    pub async fn run_all(&self) -> ReconciliationRun {
        self.run_all_at(Utc::now()).await
    }

    /// Reconciles every connected professional with bounded concurrency.
    /// One professional's failure never affects the others.
    #[instrument(skip(self))]
    pub async fn run_all_at(&self, now: DateTime<Utc>) -> ReconciliationRun {
        let mut run = ReconciliationRun::start(now);
        self.log_run(&run).await;

        let connections = match self.credentials.connections().list_connected().await {
            Ok(connections) => connections,
            Err(e) => {
                error!("Reconciliation run {} aborted: {}", run.id, e);
                run.abort(e.to_string(), Utc::now());
                self.log_run(&run).await;
                return run;
            }
        };

        info!("Reconciliation run {} over {} connected calendars", run.id, connections.len());

        let results: Vec<ProfessionalSyncResult> = stream::iter(connections)
            .map(|connection| async move {
                let professional_id = connection.professional_id;
                match self.sync_connection(&connection, now).await {
                    Ok(result) => result,
                    Err(SyncError::AlreadyRunning(_)) => {
                        ProfessionalSyncResult::skipped(professional_id, "reconciliation already running")
                    }
                    Err(e) => ProfessionalSyncResult::failed(professional_id, SyncCounts::default(), e.to_string()),
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        run.finish(results, Utc::now());
        self.log_run(&run).await;

        info!(
            "Reconciliation run {} {}: {} succeeded, {} failed, {} skipped",
            run.id, run.status, run.succeeded, run.failed, run.skipped
        );
        run
    }

    pub async fn reconcile_professional(&self, professional_id: Uuid) -> Result<ProfessionalSyncResult, SyncError> {
        self.reconcile_professional_at(professional_id, Utc::now()).await
    }

    /// On-demand pass for one professional. Fails fast when nothing is connected
    /// or a pass for the same professional is already in flight.
    pub async fn reconcile_professional_at(
        &self,
        professional_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ProfessionalSyncResult, SyncError> {
        let connection = self
            .credentials
            .connections()
            .get(professional_id)
            .await?
            .filter(CalendarConnection::is_connected)
            .ok_or(SyncError::NotConnected(professional_id))?;

        self.sync_connection(&connection, now).await
    }

    async fn log_run(&self, run: &ReconciliationRun) {
        if let Err(e) = self.runs.record(run).await {
            warn!("Failed to record reconciliation run {}: {}", run.id, e);
        }
    }

    async fn sync_connection(
        &self,
        connection: &CalendarConnection,
        now: DateTime<Utc>,
    ) -> Result<ProfessionalSyncResult, SyncError> {
        let professional_id = connection.professional_id;
        let token = self
            .lock
            .try_acquire(professional_id)
            .await?
            .ok_or(SyncError::AlreadyRunning(professional_id))?;

        let result = self.sync_locked(connection, now).await;

        if let Err(e) = self.lock.release(token).await {
            warn!("Failed to release reconciliation lock for {}: {}", professional_id, e);
        }
        Ok(result)
    }

    async fn sync_locked(&self, connection: &CalendarConnection, now: DateTime<Utc>) -> ProfessionalSyncResult {
        let professional_id = connection.professional_id;

        let access_token = match self.credentials.access_token(connection, now).await {
            Ok(Credential::Valid(token)) => token,
            Ok(Credential::Revoked) => {
                return ProfessionalSyncResult::skipped(professional_id, "calendar access revoked");
            }
            Err(e) => {
                warn!("Token refresh for {} failed, retrying next run: {}", professional_id, e);
                self.record_sync(professional_id, now, Some(e.to_string())).await;
                return ProfessionalSyncResult::failed(professional_id, SyncCounts::default(), e.to_string());
            }
        };

        let mut pass = SyncPass::default();
        let stages = self.run_stages(connection, &access_token, now, &mut pass).await;

        let outcome = match stages {
            Ok(()) if pass.item_errors.is_empty() => SyncOutcome::Synced,
            Ok(()) => SyncOutcome::Failed {
                error: format!("{} item(s) not synced", pass.item_errors.len()),
            },
            Err(e) => {
                warn!("Reconciliation of {} stopped: {}", professional_id, e);
                SyncOutcome::Failed { error: e.to_string() }
            }
        };

        let error = match &outcome {
            SyncOutcome::Failed { error } => Some(error.clone()),
            _ => None,
        };
        self.record_sync(professional_id, now, error).await;

        debug!("Reconciled {}: {:?}", professional_id, pass.counts);
        ProfessionalSyncResult {
            professional_id,
            outcome,
            counts: pass.counts,
            item_errors: pass.item_errors,
        }
    }

    async fn record_sync(&self, professional_id: Uuid, now: DateTime<Utc>, error: Option<String>) {
        if let Err(e) = self.credentials.connections().record_sync(professional_id, now, error).await {
            warn!("Failed to record sync status for {}: {}", professional_id, e);
        }
    }

    async fn run_stages(
        &self,
        connection: &CalendarConnection,
        access_token: &str,
        now: DateTime<Utc>,
        pass: &mut SyncPass,
    ) -> Result<(), SyncError> {
        let today = self.clock.from_instant(now).0;

        self.import(connection, access_token, today, pass).await?;
        self.export(connection, access_token, today, pass).await?;
        self.delete_upstream(connection, access_token, pass).await?;
        Ok(())
    }

    // ==========================================================================
    // IMPORT
    // ==========================================================================

    async fn import(
        &self,
        connection: &CalendarConnection,
        access_token: &str,
        today: NaiveDate,
        pass: &mut SyncPass,
    ) -> Result<(), SyncError> {
        let professional_id = connection.professional_id;
        let last_day = today + Duration::days(self.import_window_days);
        let from = self.clock.start_of_day(today);
        let to = self.clock.start_of_day(last_day + Duration::days(1));

        let events = self
            .credentials
            .provider()
            .list_events(access_token, &connection.calendar_id, from, to)
            .await?;

        let mut seen: HashSet<String> = HashSet::new();

        for event in events.iter().filter(|event| event.counts_as_busy()) {
            let Some(kind) = mapping::imported_kind(event, &self.clock) else {
                debug!("Ignoring event {} without extent", event.id);
                continue;
            };
            seen.insert(event.id.clone());

            match self.blocks.find_by_external_id(professional_id, &event.id).await? {
                // Deleted locally, upstream delete still pending.
                Some(existing) if existing.is_tombstoned() => {}
                Some(existing) if !existing.is_external_event() => {}
                Some(mut existing) => {
                    if existing.kind != kind || existing.title != event.summary {
                        existing.kind = kind;
                        existing.title = event.summary.clone();
                        existing.updated_at = Utc::now();
                        self.blocks.update(&existing).await?;
                        pass.counts.updated += 1;
                    }
                }
                None => {
                    let block = AvailabilityBlock::external(professional_id, event.id.clone(), kind, event.summary.clone());
                    match self.blocks.insert(&block).await {
                        Ok(_) => pass.counts.imported += 1,
                        Err(AvailabilityError::Conflict(_)) => {
                            debug!("Event {} was imported concurrently, keeping existing block", event.id);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        // The listing returns every event overlapping the window, so any block
        // overlapping it can be judged missing. Blocks that ended before today stay.
        for block in self.blocks.list_external(professional_id).await? {
            let Some(reference) = block.upstream_reference() else { continue };
            if seen.contains(reference) {
                continue;
            }
            let in_window = block
                .kind
                .date_bounds()
                .map_or(false, |(first, last)| last >= today && first <= last_day);
            if in_window {
                self.blocks.purge(professional_id, block.id).await?;
                pass.counts.removed += 1;
            }
        }

        if pass.counts.imported + pass.counts.updated + pass.counts.removed > 0 {
            info!(
                "Imported {} / updated {} / removed {} blocks for professional {}",
                pass.counts.imported, pass.counts.updated, pass.counts.removed, professional_id
            );
        }
        Ok(())
    }

    // ==========================================================================
    // EXPORT
    // ==========================================================================

    async fn export(
        &self,
        connection: &CalendarConnection,
        access_token: &str,
        today: NaiveDate,
        pass: &mut SyncPass,
    ) -> Result<(), SyncError> {
        let professional_id = connection.professional_id;
        let provider = self.credentials.provider();

        for appointment in self.appointments.list_unexported(professional_id, today).await? {
            let payload = match mapping::appointment_payload(&appointment, &self.clock) {
                Ok(payload) => payload,
                Err(e) => {
                    pass.item_errors.push(format!("appointment {}: {}", appointment.id, e));
                    continue;
                }
            };

            match provider.create_event(access_token, &connection.calendar_id, &payload).await {
                Ok(event_id) => {
                    self.appointments.set_external_event(appointment.id, Some(event_id)).await?;
                    pass.counts.exported += 1;
                }
                Err(e) => pass.item_errors.push(format!("appointment {}: {}", appointment.id, e)),
            }
        }

        for mut block in self.blocks.list_pending_export(professional_id).await? {
            let payload = match mapping::block_payload(&block, &self.clock, today) {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    pass.item_errors.push(format!("block {}: {}", block.id, e));
                    continue;
                }
            };

            match provider.create_event(access_token, &connection.calendar_id, &payload).await {
                Ok(event_id) => {
                    block.source = BlockSource::Manual { exported_event_id: Some(event_id) };
                    block.updated_at = Utc::now();
                    self.blocks.update(&block).await?;
                    pass.counts.exported += 1;
                }
                Err(e) => pass.item_errors.push(format!("block {}: {}", block.id, e)),
            }
        }

        Ok(())
    }

    /// Removes upstream events whose local record was cancelled or deleted.
    async fn delete_upstream(
        &self,
        connection: &CalendarConnection,
        access_token: &str,
        pass: &mut SyncPass,
    ) -> Result<(), SyncError> {
        let professional_id = connection.professional_id;
        let provider = self.credentials.provider();

        for appointment in self.appointments.list_cancelled_with_reference(professional_id).await? {
            let Some(reference) = appointment.external_event_id.as_deref() else { continue };

            match provider.delete_event(access_token, &connection.calendar_id, reference).await {
                Ok(()) => {
                    self.appointments.set_external_event(appointment.id, None).await?;
                    pass.counts.deleted_upstream += 1;
                }
                Err(e) => pass.item_errors.push(format!("appointment {}: {}", appointment.id, e)),
            }
        }

        for block in self.blocks.list_tombstoned(professional_id).await? {
            match block.upstream_reference() {
                None => self.blocks.purge(professional_id, block.id).await?,
                Some(reference) => match provider.delete_event(access_token, &connection.calendar_id, reference).await {
                    Ok(()) => {
                        self.blocks.purge(professional_id, block.id).await?;
                        pass.counts.deleted_upstream += 1;
                    }
                    Err(e) => pass.item_errors.push(format!("block {}: {}", block.id, e)),
                },
            }
        }

        Ok(())
    }
}
