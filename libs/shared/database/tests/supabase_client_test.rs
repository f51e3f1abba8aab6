use assert_matches::assert_matches;
use reqwest::Method;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_database::{SupabaseClient, SupabaseError};
use shared_utils::test_utils::TestConfig;

#[tokio::test]
async fn test_request_sends_keys_and_decodes_rows() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_mock_server(&mock_server.uri()).to_app_config();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.confirmed"))
        .and(header("apikey", "test-anon-key"))
        .and(header("authorization", "Bearer service-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }, { "id": 2 }])))
        .mount(&mock_server)
        .await;

    let client = SupabaseClient::new(&config);
    let rows: Vec<Value> = client
        .request(Method::GET, "/rest/v1/appointments?status=eq.confirmed", Some("service-token"), None)
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_empty_body_is_an_empty_row_set() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_mock_server(&mock_server.uri()).to_app_config();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock_server)
        .await;

    let client = SupabaseClient::new(&config);
    let rows: Vec<Value> = client
        .request(Method::PATCH, "/rest/v1/appointments", None, Some(json!({ "status": "cancelled" })))
        .await
        .unwrap();

    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_status_codes_map_to_errors() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_mock_server(&mock_server.uri()).to_app_config();

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({ "code": "23P01" })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/secret"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let client = SupabaseClient::new(&config);

    let conflict = client
        .execute(Method::POST, "/rest/v1/appointments", None, Some(json!({})))
        .await
        .unwrap_err();
    assert!(conflict.is_conflict());

    let auth = client.execute(Method::GET, "/rest/v1/secret", None, None).await.unwrap_err();
    assert_matches!(auth, SupabaseError::Auth(_));

    let api = client.execute(Method::GET, "/rest/v1/broken", None, None).await.unwrap_err();
    assert_matches!(api, SupabaseError::Api { status: 500, .. });
}
