// libs/calendar-sync-cell/src/services/google.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use shared_config::AppConfig;

use crate::models::{EventPayload, EventTime, ProviderError, ProviderEvent, TokenGrant};
use crate::services::provider::CalendarProvider;

/// Private extended property marking events this service created.
pub const ORIGIN_PROPERTY: &str = "scheduling_origin_id";

const PAGE_SIZE: &str = "250";

/// Google Calendar v3 client.
/// Based on: https://developers.google.com/calendar/api/v3/reference/events
pub struct GoogleCalendarProvider {
    client: Client,
    api_base: String,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl GoogleCalendarProvider {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            api_base: config.google_calendar_api_base.trim_end_matches('/').to_string(),
            token_url: config.google_oauth_token_url.clone(),
            client_id: config.google_calendar_client_id.clone(),
            client_secret: config.google_calendar_client_secret.clone(),
        }
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!("{}/calendars/{}/events", self.api_base, urlencoding::encode(calendar_id))
    }

    async fn failure(response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        error!("Google Calendar API error ({}): {}", status, body);

        if status == StatusCode::TOO_MANY_REQUESTS {
            return ProviderError::RateLimited;
        }
        ProviderError::Api { status: status.as_u16(), body }
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendarProvider {
    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProviderEvent>, ProviderError> {
        let url = self.events_url(calendar_id);
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("timeMin", from.to_rfc3339()),
                ("timeMax", to.to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            debug!("Listing Google events from {}", url);
            let response = self
                .client
                .get(&url)
                .bearer_auth(access_token)
                .query(&query)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(Self::failure(response).await);
            }

            let page: GoogleEventsPage = response
                .json()
                .await
                .map_err(|e| ProviderError::Decode(format!("Failed to parse events page: {}", e)))?;

            for item in page.items {
                match item.into_provider_event() {
                    Some(event) => events.push(event),
                    None => warn!("Skipping Google event without usable start/end"),
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("Listed {} Google events for calendar {}", events.len(), calendar_id);
        Ok(events)
    }

    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        payload: &EventPayload,
    ) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(self.events_url(calendar_id))
            .bearer_auth(access_token)
            .json(&event_body(payload))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }

        let created: CreatedEvent = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("Failed to parse created event: {}", e)))?;

        info!("Created Google event {} for {}", created.id, payload.origin_id);
        Ok(created.id)
    }

    async fn delete_event(&self, access_token: &str, calendar_id: &str, event_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/{}", self.events_url(calendar_id), urlencoding::encode(event_id));
        let response = self.client.delete(&url).bearer_auth(access_token).send().await?;

        match response.status() {
            status if status.is_success() => {
                info!("Deleted Google event {}", event_id);
                Ok(())
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                debug!("Google event {} was already gone", event_id);
                Ok(())
            }
            _ => Err(Self::failure(response).await),
        }
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let revoked = serde_json::from_str::<TokenErrorBody>(&body)
                .map(|e| e.error == "invalid_grant")
                .unwrap_or(false);

            if revoked {
                warn!("Google refresh token rejected with invalid_grant");
                return Err(ProviderError::InvalidGrant);
            }
            error!("Token refresh failed ({}): {}", status, body);
            return Err(ProviderError::Api { status: status.as_u16(), body });
        }

        let grant: GoogleTokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("Failed to parse token response: {}", e)))?;

        Ok(TokenGrant {
            access_token: grant.access_token,
            expires_in: grant.expires_in,
            refresh_token: grant.refresh_token,
        })
    }
}

fn event_time_json(time: &EventTime, time_zone: &str) -> Value {
    match time {
        EventTime::Date(date) => json!({ "date": date }),
        EventTime::DateTime(instant) => json!({
            "dateTime": instant.to_rfc3339(),
            "timeZone": time_zone,
        }),
    }
}

fn event_body(payload: &EventPayload) -> Value {
    let mut body = json!({
        "summary": payload.summary,
        "start": event_time_json(&payload.start, &payload.time_zone),
        "end": event_time_json(&payload.end, &payload.time_zone),
        "transparency": "opaque",
        "extendedProperties": {
            "private": { ORIGIN_PROPERTY: payload.origin_id.to_string() }
        },
    });

    if let Some(description) = &payload.description {
        body["description"] = json!(description);
    }
    if let Some(rule) = &payload.recurrence {
        body["recurrence"] = json!([rule]);
    }
    body
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventsPage {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    status: Option<String>,
    summary: Option<String>,
    start: Option<GoogleEventTime>,
    end: Option<GoogleEventTime>,
    transparency: Option<String>,
    extended_properties: Option<ExtendedProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventTime {
    date: Option<NaiveDate>,
    date_time: Option<DateTime<Utc>>,
}

impl GoogleEventTime {
    fn to_event_time(&self) -> Option<EventTime> {
        match (self.date_time, self.date) {
            (Some(instant), _) => Some(EventTime::DateTime(instant)),
            (None, Some(date)) => Some(EventTime::Date(date)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExtendedProperties {
    #[serde(default)]
    private: HashMap<String, String>,
}

impl GoogleEvent {
    fn into_provider_event(self) -> Option<ProviderEvent> {
        let start = self.start.as_ref()?.to_event_time()?;
        let end = self.end.as_ref()?.to_event_time()?;

        let exported_by_us = self
            .extended_properties
            .as_ref()
            .map_or(false, |props| props.private.contains_key(ORIGIN_PROPERTY));

        Some(ProviderEvent {
            id: self.id,
            summary: self.summary.filter(|s| !s.trim().is_empty()),
            start,
            end,
            cancelled: self.status.as_deref() == Some("cancelled"),
            transparent: self.transparency.as_deref() == Some("transparent"),
            exported_by_us,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CreatedEvent {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
}
