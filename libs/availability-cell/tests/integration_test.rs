use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use availability_cell::handlers::AvailabilityState;
use availability_cell::router::availability_routes;
use availability_cell::services::{AvailabilityService, NoUpstreamCalendar};
use shared_config::AppConfig;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

fn create_test_app(config: Arc<AppConfig>) -> Router {
    let service = Arc::new(AvailabilityService::from_config(&config, Arc::new(NoUpstreamCalendar)));
    availability_routes(AvailabilityState { config, service })
}

fn bearer(user: &TestUser, config: &AppConfig) -> String {
    format!("Bearer {}", JwtTestUtils::create_test_token(user, &config.supabase_jwt_secret, None))
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn mock_schedule(mock_server: &MockServer, professional_id: Uuid) {
    let id = professional_id.to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/working_profiles"))
        .and(query_param("professional_id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::working_profile_response(&id)
        ])))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_blocks"))
        .and(query_param("professional_id", format!("eq.{}", id)))
        .and(query_param("deleted_at", "is.null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::weekly_range_block_response(&id, 1, "09:00:00", "10:00:00"),
            MockSupabaseResponses::full_day_block_response(&id, "2024-07-03")
        ])))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let config = TestConfig::default().to_arc();
    let app = create_test_app(config);

    let request = Request::builder()
        .method("GET")
        .uri(format!("/{}/profile", Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_blocks_applies_date_matching() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_mock_server(&mock_server.uri()).to_arc();
    let professional_id = Uuid::new_v4();
    mock_schedule(&mock_server, professional_id).await;

    let user = TestUser::patient("patient@example.com");
    let app = create_test_app(config.clone());

    // 2024-07-01 is a Monday: only the weekly block applies.
    let request = Request::builder()
        .method("GET")
        .uri(format!("/{}/blocks?date=2024-07-01", professional_id))
        .header("Authorization", bearer(&user, &config))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json_response = body_json(response).await;
    assert_eq!(json_response["total"], 1);
    assert_eq!(json_response["blocks"][0]["block_type"], "weekly_range");
    assert_eq!(json_response["blocks"][0]["source"]["origin"], "manual");
}

#[tokio::test]
async fn test_week_view() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_mock_server(&mock_server.uri()).to_arc();
    let professional_id = Uuid::new_v4();
    mock_schedule(&mock_server, professional_id).await;

    let user = TestUser::with_id(professional_id, "pro@example.com", "professional");
    let app = create_test_app(config.clone());

    let request = Request::builder()
        .method("GET")
        .uri(format!("/{}/week?start=2024-07-01", professional_id))
        .header("Authorization", bearer(&user, &config))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let grid = body_json(response).await;
    let days = grid["days"].as_array().unwrap();
    assert_eq!(days.len(), 7);
    assert_eq!(days[0]["cells"][8]["state"], "non_working");
    assert_eq!(days[0]["cells"][9]["state"], "blocked");
    assert_eq!(days[0]["cells"][9]["title"], "Supervision");
    assert_eq!(days[0]["cells"][10]["state"], "free");
    assert_eq!(days[2]["cells"][13]["state"], "blocked");
    assert_eq!(days[5]["is_working_day"], false);
}

#[tokio::test]
async fn test_create_block_persists_flat_row() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_mock_server(&mock_server.uri()).to_arc();
    let professional_id = Uuid::new_v4();
    let id = professional_id.to_string();

    Mock::given(method("POST"))
        .and(path("/rest/v1/availability_blocks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::full_day_block_response(&id, "2024-07-04")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let user = TestUser::with_id(professional_id, "pro@example.com", "professional");
    let app = create_test_app(config.clone());

    let request = Request::builder()
        .method("POST")
        .uri(format!("/{}/blocks", professional_id))
        .header("Authorization", bearer(&user, &config))
        .header("Content-Type", "application/json")
        .body(Body::from(json!({
            "block_type": "full_day",
            "start_date": "2024-07-04",
            "title": "Day off"
        }).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let block = body_json(response).await;
    assert_eq!(block["block_type"], "full_day");
    assert_eq!(block["start_date"], "2024-07-04");

    let received = mock_server.received_requests().await.unwrap();
    let row: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(row["block_type"], "full_day");
    assert_eq!(row["is_recurring"], false);
    assert_eq!(row["is_external_event"], false);
}

#[tokio::test]
async fn test_invalid_block_returns_unprocessable() {
    let config = TestConfig::default().to_arc();
    let professional_id = Uuid::new_v4();
    let user = TestUser::with_id(professional_id, "pro@example.com", "professional");
    let app = create_test_app(config.clone());

    let request = Request::builder()
        .method("POST")
        .uri(format!("/{}/blocks", professional_id))
        .header("Authorization", bearer(&user, &config))
        .header("Content-Type", "application/json")
        .body(Body::from(json!({
            "block_type": "weekly_range",
            "day_of_week": 2,
            "start_time": "11:00:00",
            "end_time": "10:00:00"
        }).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_only_owner_can_change_schedule() {
    let config = TestConfig::default().to_arc();
    let professional_id = Uuid::new_v4();
    let other = TestUser::professional("other@example.com");
    let app = create_test_app(config.clone());

    let request = Request::builder()
        .method("POST")
        .uri(format!("/{}/blocks", professional_id))
        .header("Authorization", bearer(&other, &config))
        .header("Content-Type", "application/json")
        .body(Body::from(json!({
            "block_type": "full_day",
            "start_date": "2024-07-04"
        }).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
