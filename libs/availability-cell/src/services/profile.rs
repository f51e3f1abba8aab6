use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{header::HeaderValue, Method};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{AvailabilityError, WorkingProfile};

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, professional_id: Uuid) -> Result<Option<WorkingProfile>, AvailabilityError>;

    async fn upsert(&self, profile: &WorkingProfile) -> Result<WorkingProfile, AvailabilityError>;
}

pub struct SupabaseProfileStore {
    supabase: SupabaseClient,
    token: String,
}

impl SupabaseProfileStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            token: config.service_token().to_string(),
        }
    }
}

#[async_trait]
impl ProfileStore for SupabaseProfileStore {
    async fn get(&self, professional_id: Uuid) -> Result<Option<WorkingProfile>, AvailabilityError> {
        let path = format!("/rest/v1/working_profiles?professional_id=eq.{}", professional_id);
        let profiles: Vec<WorkingProfile> = self.supabase
            .request(Method::GET, &path, Some(&self.token), None)
            .await?;
        Ok(profiles.into_iter().next())
    }

    async fn upsert(&self, profile: &WorkingProfile) -> Result<WorkingProfile, AvailabilityError> {
        debug!("Saving working profile for professional {}", profile.professional_id);

        let mut headers = SupabaseClient::representation_headers();
        headers.insert(
            "Prefer",
            HeaderValue::from_static("resolution=merge-duplicates,return=representation"),
        );

        let body = serde_json::to_value(profile)
            .map_err(|e| AvailabilityError::Validation(e.to_string()))?;

        let profiles: Vec<WorkingProfile> = self.supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/working_profiles?on_conflict=professional_id",
                Some(&self.token),
                Some(body),
                Some(headers),
            )
            .await?;

        profiles
            .into_iter()
            .next()
            .ok_or(AvailabilityError::ProfileNotFound(profile.professional_id))
    }
}

#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<Uuid, WorkingProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get(&self, professional_id: Uuid) -> Result<Option<WorkingProfile>, AvailabilityError> {
        Ok(self.profiles.read().await.get(&professional_id).cloned())
    }

    async fn upsert(&self, profile: &WorkingProfile) -> Result<WorkingProfile, AvailabilityError> {
        self.profiles
            .write()
            .await
            .insert(profile.professional_id, profile.clone());
        Ok(profile.clone())
    }
}
