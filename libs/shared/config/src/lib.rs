use std::env;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

/// Systemic configuration problems. These are fatal at startup, never per-request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub supabase_jwt_secret: String,
    /// IANA zone every stored wall-clock date/time is interpreted in.
    pub app_timezone: String,
    pub google_calendar_client_id: String,
    pub google_calendar_client_secret: String,
    pub google_calendar_api_base: String,
    pub google_oauth_token_url: String,
    pub calendar_import_window_days: i64,
    pub calendar_sync_interval_minutes: u64,
    pub calendar_sync_concurrency: usize,
    pub reminder_sweep_interval_minutes: u64,
    pub reminder_cron_secret: String,
    pub notification_webhook_url: String,
    pub redis_url: Option<String>,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, background jobs will use the anon key");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            // No fallback: an unset zone must fail validation, not default to the host zone.
            app_timezone: env::var("APP_TIMEZONE").unwrap_or_default(),
            google_calendar_client_id: env::var("GOOGLE_CALENDAR_CLIENT_ID")
                .unwrap_or_else(|_| {
                    warn!("GOOGLE_CALENDAR_CLIENT_ID not set, calendar sync disabled");
                    String::new()
                }),
            google_calendar_client_secret: env::var("GOOGLE_CALENDAR_CLIENT_SECRET")
                .unwrap_or_default(),
            google_calendar_api_base: env::var("GOOGLE_CALENDAR_API_BASE")
                .unwrap_or_else(|_| "https://www.googleapis.com/calendar/v3".to_string()),
            google_oauth_token_url: env::var("GOOGLE_OAUTH_TOKEN_URL")
                .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".to_string()),
            calendar_import_window_days: parse_or("CALENDAR_IMPORT_WINDOW_DAYS", 60),
            calendar_sync_interval_minutes: parse_or("CALENDAR_SYNC_INTERVAL_MINUTES", 15),
            calendar_sync_concurrency: parse_or("CALENDAR_SYNC_CONCURRENCY", 4),
            reminder_sweep_interval_minutes: parse_or("REMINDER_SWEEP_INTERVAL_MINUTES", 60),
            reminder_cron_secret: env::var("REMINDER_CRON_SECRET")
                .unwrap_or_else(|_| {
                    warn!("REMINDER_CRON_SECRET not set, sweep endpoint will reject every call");
                    String::new()
                }),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .unwrap_or_else(|_| {
                    warn!("NOTIFICATION_WEBHOOK_URL not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            port: parse_or("PORT", 3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    /// Checks the settings the scheduling core cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_timezone.trim().is_empty() {
            return Err(ConfigError::Missing("APP_TIMEZONE"));
        }
        if self.reminder_sweep_interval_minutes == 0 {
            return Err(ConfigError::Invalid {
                key: "REMINDER_SWEEP_INTERVAL_MINUTES",
                value: "0".to_string(),
            });
        }
        if self.calendar_sync_interval_minutes == 0 {
            return Err(ConfigError::Invalid {
                key: "CALENDAR_SYNC_INTERVAL_MINUTES",
                value: "0".to_string(),
            });
        }
        if self.calendar_import_window_days <= 0 {
            return Err(ConfigError::Invalid {
                key: "CALENDAR_IMPORT_WINDOW_DAYS",
                value: self.calendar_import_window_days.to_string(),
            });
        }
        if self.calendar_sync_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "CALENDAR_SYNC_CONCURRENCY",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_calendar_sync_configured(&self) -> bool {
        !self.google_calendar_client_id.is_empty()
            && !self.google_calendar_client_secret.is_empty()
    }

    /// Token used for server-side calls that are not made on behalf of a user.
    pub fn service_token(&self) -> &str {
        if self.supabase_service_role_key.is_empty() {
            &self.supabase_anon_key
        } else {
            &self.supabase_service_role_key
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an unparsable value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
