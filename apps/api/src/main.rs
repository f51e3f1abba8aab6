use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod jobs;
mod router;

use appointment_cell::services::{BookingService, SupabaseAppointmentStore};
use availability_cell::services::AvailabilityService;
use calendar_sync_cell::services::{
    CalendarReconciler, ConnectedCalendar, CredentialManager, GoogleCalendarProvider, LocalProfessionalLock,
    ProfessionalLock, RedisProfessionalLock, SupabaseConnectionStore, SupabaseRunLog,
};
use reminder_cell::services::{ReminderSweeper, SupabaseRecipientDirectory, WebhookNotificationSender};
use shared_config::AppConfig;
use shared_utils::WallClock;

use router::Services;

/// Upper bound on how long a crashed instance can hold a professional's sync lock.
const SYNC_LOCK_TTL: Duration = Duration::from_secs(10 * 60);

async fn professional_lock(config: &AppConfig) -> Arc<dyn ProfessionalLock> {
    match config.redis_url.as_deref() {
        Some(url) => match RedisProfessionalLock::new(url, SYNC_LOCK_TTL).await {
            Ok(lock) => Arc::new(lock),
            Err(e) => {
                warn!("Redis unavailable ({}), falling back to an in-process sync lock", e);
                Arc::new(LocalProfessionalLock::new())
            }
        },
        None => Arc::new(LocalProfessionalLock::new()),
    }
}

async fn build_services(config: Arc<AppConfig>) -> anyhow::Result<Services> {
    let clock = WallClock::from_config(&config).context("Invalid APP_TIMEZONE")?;
    info!("Scheduling in wall-clock zone {}", clock.zone_name());

    let credentials = Arc::new(CredentialManager::new(
        Arc::new(SupabaseConnectionStore::new(&config)),
        Arc::new(GoogleCalendarProvider::new(&config)),
    ));
    let upstream = Arc::new(ConnectedCalendar::new(credentials.clone()));

    let availability = Arc::new(AvailabilityService::from_config(&config, upstream.clone()));
    let appointments = Arc::new(SupabaseAppointmentStore::new(&config));
    let booking = Arc::new(BookingService::new(
        availability.clone(),
        appointments.clone(),
        upstream,
        clock,
    ));

    let reconciler = Arc::new(
        CalendarReconciler::new(
            credentials,
            availability.block_store(),
            appointments.clone(),
            Arc::new(SupabaseRunLog::new(&config)),
            professional_lock(&config).await,
            clock,
        )
        .with_import_window_days(config.calendar_import_window_days)
        .with_concurrency(config.calendar_sync_concurrency),
    );

    let sweeper = Arc::new(
        ReminderSweeper::new(
            appointments,
            Arc::new(SupabaseRecipientDirectory::new(&config)),
            Arc::new(WebhookNotificationSender::new(&config)),
            clock,
        )
        .with_interval_minutes(config.reminder_sweep_interval_minutes as i64),
    );

    Ok(Services {
        config,
        availability,
        booking,
        reconciler,
        sweeper,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting scheduling API server");

    // Load configuration
    let config = AppConfig::from_env();
    config.validate().context("Invalid configuration")?;
    if !config.is_configured() {
        warn!("Supabase is not fully configured; storage calls will fail");
    }
    let port = config.port;

    let services = build_services(Arc::new(config)).await?;
    let background = jobs::spawn_all(&services);

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(services)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await.context("Failed to bind listener")?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    for handle in background {
        handle.abort();
    }
    Ok(())
}
