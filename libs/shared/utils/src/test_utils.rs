use std::sync::Arc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub timezone: String,
    pub cron_secret: String,
    pub provider_base_url: String,
    pub notification_webhook_url: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            timezone: "America/New_York".to_string(),
            cron_secret: "test-cron-secret".to_string(),
            provider_base_url: "http://localhost:54400".to_string(),
            notification_webhook_url: "http://localhost:54500/notify".to_string(),
        }
    }
}

impl TestConfig {
    /// Points every outbound HTTP dependency at one mock server.
    pub fn with_mock_server(uri: &str) -> Self {
        Self {
            supabase_url: uri.to_string(),
            provider_base_url: uri.to_string(),
            notification_webhook_url: format!("{}/notify", uri),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_service_role_key: "test-service-role-key".to_string(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            app_timezone: self.timezone.clone(),
            google_calendar_client_id: "test-client-id".to_string(),
            google_calendar_client_secret: "test-client-secret".to_string(),
            google_calendar_api_base: self.provider_base_url.clone(),
            google_oauth_token_url: format!("{}/token", self.provider_base_url),
            calendar_import_window_days: 60,
            calendar_sync_interval_minutes: 15,
            calendar_sync_concurrency: 4,
            reminder_sweep_interval_minutes: 60,
            reminder_cron_secret: self.cron_secret.clone(),
            notification_webhook_url: self.notification_webhook_url.clone(),
            redis_url: None,
            port: 3000,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn with_id(id: Uuid, email: &str, role: &str) -> Self {
        Self {
            id: id.to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn professional(email: &str) -> Self {
        Self::new(email, "professional")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Row shapes as PostgREST returns them.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn working_profile_response(professional_id: &str) -> serde_json::Value {
        json!({
            "professional_id": professional_id,
            "working_days": [1, 2, 3, 4, 5],
            "working_start": "09:00:00",
            "working_end": "17:00:00",
            "session_duration_minutes": 50,
            "break_duration_minutes": 10,
            "tolerance_minutes": 0,
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn full_day_block_response(professional_id: &str, date: &str) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "professional_id": professional_id,
            "block_type": "full_day",
            "start_date": date,
            "end_date": null,
            "day_of_week": null,
            "start_time": null,
            "end_time": null,
            "recurrence_until": null,
            "is_recurring": false,
            "is_external_event": false,
            "external_event_id": null,
            "title": "Day off",
            "deleted_at": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn weekly_range_block_response(
        professional_id: &str,
        day_of_week: u8,
        start_time: &str,
        end_time: &str,
    ) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "professional_id": professional_id,
            "block_type": "weekly_range",
            "start_date": null,
            "end_date": null,
            "day_of_week": day_of_week,
            "start_time": start_time,
            "end_time": end_time,
            "recurrence_until": null,
            "is_recurring": true,
            "is_external_event": false,
            "external_event_id": null,
            "title": "Supervision",
            "deleted_at": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn appointment_response(
        professional_id: &str,
        patient_id: &str,
        date: &str,
        time: &str,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "professional_id": professional_id,
            "patient_id": patient_id,
            "appointment_date": date,
            "appointment_time": time,
            "duration_minutes": 50,
            "appointment_type": "remote",
            "location": null,
            "meeting_link": "https://meet.example.com/abc",
            "status": status,
            "reminder_sent_24h_at": null,
            "reminder_sent_1h_at": null,
            "external_event_id": null,
            "cancellation_reason": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "message": message,
            "code": code
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.supabase_url, "http://localhost:54321");
        assert_eq!(app_config.supabase_anon_key, "test-anon-key");
        assert!(!app_config.supabase_jwt_secret.is_empty());
        assert!(app_config.validate().is_ok());
    }

    #[test]
    fn test_missing_timezone_fails_validation() {
        let config = TestConfig {
            timezone: String::new(),
            ..TestConfig::default()
        };

        assert_eq!(
            config.to_app_config().validate(),
            Err(shared_config::ConfigError::Missing("APP_TIMEZONE"))
        );
    }

    #[test]
    fn test_user_creation() {
        let user = TestUser::professional("pro@example.com");
        assert_eq!(user.email, "pro@example.com");
        assert_eq!(user.role, "professional");

        let user_model = user.to_user();
        assert_eq!(user_model.email, Some(user.email.clone()));
        assert_eq!(user_model.role, Some(user.role.clone()));
        assert_eq!(user_model.id, user.id);
        assert!(user_model.can_manage(&user.id));
        assert!(!user_model.can_manage("someone-else"));
    }

    #[test]
    fn test_jwt_token_round_trip() {
        let user = TestUser::default();
        let secret = "test-secret";
        let token = JwtTestUtils::create_test_token(&user, secret, Some(1));

        assert_eq!(token.split('.').count(), 3);

        let validated = crate::jwt::validate_token(&token, secret).unwrap();
        assert_eq!(validated.id, user.id);
    }

    #[test]
    fn test_jwt_rejections() {
        let user = TestUser::default();
        let secret = "test-secret";

        assert!(crate::jwt::validate_token(&JwtTestUtils::create_expired_token(&user, secret), secret).is_err());
        assert!(crate::jwt::validate_token(&JwtTestUtils::create_invalid_signature_token(&user), secret).is_err());
        assert!(crate::jwt::validate_token(&JwtTestUtils::create_malformed_token(), secret).is_err());
    }
}
