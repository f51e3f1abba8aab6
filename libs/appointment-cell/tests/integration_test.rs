use std::sync::Arc;

use assert_matches::assert_matches;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::handlers::AppointmentState;
use appointment_cell::models::{Appointment, AppointmentError, ReminderLead};
use appointment_cell::router::appointment_routes;
use appointment_cell::services::{AppointmentStore, BookingService, InMemoryAppointmentStore, SupabaseAppointmentStore};
use availability_cell::models::SaveWorkingProfileRequest;
use availability_cell::services::{AvailabilityService, InMemoryBlockStore, InMemoryProfileStore, NoUpstreamCalendar};
use shared_config::AppConfig;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};
use shared_utils::WallClock;

async fn create_test_app(config: Arc<AppConfig>, professional_id: Uuid) -> Router {
    let availability = Arc::new(AvailabilityService::new(
        Arc::new(InMemoryProfileStore::new()),
        Arc::new(InMemoryBlockStore::new()),
        Arc::new(NoUpstreamCalendar),
    ));
    availability
        .save_profile(
            professional_id,
            SaveWorkingProfileRequest {
                working_days: vec![1, 2, 3, 4, 5],
                working_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                working_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                session_duration_minutes: 50,
                break_duration_minutes: 10,
                tolerance_minutes: 0,
            },
        )
        .await
        .unwrap();

    let booking = Arc::new(BookingService::new(
        availability,
        Arc::new(InMemoryAppointmentStore::new()),
        Arc::new(NoUpstreamCalendar),
        WallClock::from_config(&config).unwrap(),
    ));

    appointment_routes(AppointmentState { config, booking })
}

fn bearer(user: &TestUser, config: &AppConfig) -> String {
    format!("Bearer {}", JwtTestUtils::create_test_token(user, &config.supabase_jwt_secret, None))
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn booking_body(professional_id: Uuid, time: &str) -> Body {
    Body::from(json!({
        "professional_id": professional_id,
        "appointment_date": "2030-07-05",
        "appointment_time": time,
        "appointment_type": "in_person",
        "location": "Room 3"
    }).to_string())
}

#[tokio::test]
async fn test_check_slot_reports_reason() {
    let config = TestConfig::default().to_arc();
    let professional_id = Uuid::new_v4();
    let app = create_test_app(config.clone(), professional_id).await;
    let patient = TestUser::patient("patient@example.com");

    let request = Request::builder()
        .method("GET")
        .uri(format!(
            "/slots/check?professional_id={}&date=2030-07-05&time=16:40:00&duration_minutes=50",
            professional_id
        ))
        .header("Authorization", bearer(&patient, &config))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json_response = body_json(response).await;
    assert_eq!(json_response["bookable"], false);
    assert_eq!(json_response["reason"]["reason"], "outside_working_hours");
}

#[tokio::test]
async fn test_book_then_double_book() {
    let config = TestConfig::default().to_arc();
    let professional_id = Uuid::new_v4();
    let app = create_test_app(config.clone(), professional_id).await;
    let patient = TestUser::patient("patient@example.com");

    let first = Request::builder()
        .method("POST")
        .uri("/")
        .header("Authorization", bearer(&patient, &config))
        .header("Content-Type", "application/json")
        .body(booking_body(professional_id, "10:00:00"))
        .unwrap();

    let response = app.clone().oneshot(first).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let appointment = body_json(response).await;
    assert_eq!(appointment["status"], "pending");
    assert_eq!(appointment["patient_id"], patient.id);

    let second = Request::builder()
        .method("POST")
        .uri("/")
        .header("Authorization", bearer(&TestUser::patient("other@example.com"), &config))
        .header("Content-Type", "application/json")
        .body(booking_body(professional_id, "10:30:00"))
        .unwrap();

    let response = app.oneshot(second).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_only_professional_confirms() {
    let config = TestConfig::default().to_arc();
    let professional_id = Uuid::new_v4();
    let app = create_test_app(config.clone(), professional_id).await;
    let patient = TestUser::patient("patient@example.com");
    let professional = TestUser::with_id(professional_id, "pro@example.com", "professional");

    let create = Request::builder()
        .method("POST")
        .uri("/")
        .header("Authorization", bearer(&patient, &config))
        .header("Content-Type", "application/json")
        .body(booking_body(professional_id, "11:00:00"))
        .unwrap();
    let appointment = body_json(app.clone().oneshot(create).await.unwrap()).await;
    let appointment_id = appointment["id"].as_str().unwrap().to_string();

    let by_patient = Request::builder()
        .method("POST")
        .uri(format!("/{}/confirm", appointment_id))
        .header("Authorization", bearer(&patient, &config))
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.clone().oneshot(by_patient).await.unwrap().status(), StatusCode::FORBIDDEN);

    let by_professional = Request::builder()
        .method("POST")
        .uri(format!("/{}/confirm", appointment_id))
        .header("Authorization", bearer(&professional, &config))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(by_professional).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "confirmed");
}

#[tokio::test]
async fn test_supabase_conflict_maps_to_slot_taken() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_mock_server(&mock_server.uri()).to_app_config();

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(
            MockSupabaseResponses::error_response("conflicting key value violates exclusion constraint", "23P01"),
        ))
        .mount(&mock_server)
        .await;

    let row = MockSupabaseResponses::appointment_response(
        &Uuid::new_v4().to_string(),
        &Uuid::new_v4().to_string(),
        "2030-07-05",
        "10:00:00",
        "pending",
    );
    let appointment: Appointment = serde_json::from_value(row).unwrap();

    let store = SupabaseAppointmentStore::new(&config);
    assert_matches!(store.insert(&appointment).await, Err(AppointmentError::SlotTaken));
}

#[tokio::test]
async fn test_reminder_marker_is_conditional() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_mock_server(&mock_server.uri()).to_app_config();
    let appointment_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(query_param("reminder_sent_24h_at", "is.null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = SupabaseAppointmentStore::new(&config);
    let set = store
        .mark_reminder_sent(appointment_id, ReminderLead::DayBefore, Utc::now())
        .await
        .unwrap();

    // Someone else already set it: zero rows updated.
    assert!(!set);
}

#[tokio::test]
async fn test_active_appointments_query_excludes_cancelled() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_mock_server(&mock_server.uri()).to_app_config();
    let professional_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("professional_id", format!("eq.{}", professional_id)))
        .and(query_param("appointment_date", "eq.2030-07-05"))
        .and(query_param("status", "neq.cancelled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &professional_id.to_string(),
                &Uuid::new_v4().to_string(),
                "2030-07-05",
                "10:00:00",
                "confirmed",
            )
        ])))
        .mount(&mock_server)
        .await;

    let store = SupabaseAppointmentStore::new(&config);
    let appointments = store
        .list_active_on(professional_id, NaiveDate::from_ymd_opt(2030, 7, 5).unwrap())
        .await
        .unwrap();

    assert_eq!(appointments.len(), 1);
    assert_eq!(appointments[0].appointment_time, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
}
