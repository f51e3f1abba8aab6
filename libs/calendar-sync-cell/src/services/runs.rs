use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use tokio::sync::RwLock;
use tracing::debug;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_database::SupabaseError;

use crate::models::{ReconciliationRun, SyncError};

/// Audit trail of batch runs. A run is written when it starts and once more when it ends.
#[async_trait]
pub trait RunLog: Send + Sync {
    async fn record(&self, run: &ReconciliationRun) -> Result<(), SyncError>;

    async fn latest(&self) -> Result<Option<ReconciliationRun>, SyncError>;
}

pub struct SupabaseRunLog {
    supabase: SupabaseClient,
    token: String,
}

impl SupabaseRunLog {
    const TABLE: &'static str = "/rest/v1/reconciliation_runs";

    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            token: config.service_token().to_string(),
        }
    }
}

#[async_trait]
impl RunLog for SupabaseRunLog {
    async fn record(&self, run: &ReconciliationRun) -> Result<(), SyncError> {
        debug!("Recording reconciliation run {} as {}", run.id, run.status);
        let body = serde_json::to_value(run).map_err(SupabaseError::from)?;

        // Upsert on id, so the closing write replaces the "running" row.
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("resolution=merge-duplicates,return=minimal"));

        let _: Vec<ReconciliationRun> = self.supabase
            .request_with_headers(
                Method::POST,
                &format!("{}?on_conflict=id", Self::TABLE),
                Some(&self.token),
                Some(body),
                Some(headers),
            )
            .await?;
        Ok(())
    }

    async fn latest(&self) -> Result<Option<ReconciliationRun>, SyncError> {
        let path = format!("{}?order=started_at.desc&limit=1", Self::TABLE);
        let runs: Vec<ReconciliationRun> = self.supabase
            .request(Method::GET, &path, Some(&self.token), None)
            .await?;
        Ok(runs.into_iter().next())
    }
}

#[derive(Default)]
pub struct InMemoryRunLog {
    runs: RwLock<Vec<ReconciliationRun>>,
}

impl InMemoryRunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<ReconciliationRun> {
        self.runs.read().await.clone()
    }
}

#[async_trait]
impl RunLog for InMemoryRunLog {
    async fn record(&self, run: &ReconciliationRun) -> Result<(), SyncError> {
        let mut runs = self.runs.write().await;
        match runs.iter_mut().find(|existing| existing.id == run.id) {
            Some(existing) => *existing = run.clone(),
            None => runs.push(run.clone()),
        }
        Ok(())
    }

    async fn latest(&self) -> Result<Option<ReconciliationRun>, SyncError> {
        Ok(self.runs.read().await.iter().max_by_key(|run| run.started_at).cloned())
    }
}
