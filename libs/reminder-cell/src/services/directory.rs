use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Method;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{Contact, ReminderError};

/// Who to notify about an appointment. Unknown ids are left out.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn contacts(&self, user_ids: &[Uuid]) -> Result<Vec<Contact>, ReminderError>;
}

pub struct SupabaseRecipientDirectory {
    supabase: SupabaseClient,
    token: String,
}

impl SupabaseRecipientDirectory {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            token: config.service_token().to_string(),
        }
    }
}

#[async_trait]
impl RecipientDirectory for SupabaseRecipientDirectory {
    async fn contacts(&self, user_ids: &[Uuid]) -> Result<Vec<Contact>, ReminderError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = user_ids.iter().map(Uuid::to_string).collect();
        let path = format!(
            "/rest/v1/profiles?id=in.({})&select=id,full_name,email,push_token",
            ids.join(",")
        );

        Ok(self.supabase
            .request(Method::GET, &path, Some(&self.token), None)
            .await?)
    }
}

#[derive(Default)]
pub struct InMemoryRecipientDirectory {
    contacts: RwLock<HashMap<Uuid, Contact>>,
}

impl InMemoryRecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, contact: Contact) {
        self.contacts.write().await.insert(contact.id, contact);
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryRecipientDirectory {
    async fn contacts(&self, user_ids: &[Uuid]) -> Result<Vec<Contact>, ReminderError> {
        let contacts = self.contacts.read().await;
        Ok(user_ids.iter().filter_map(|id| contacts.get(id).cloned()).collect())
    }
}
