use axum::{
    body::Body,
    extract::Extension,
    http::{Request, StatusCode},
    middleware,
    routing::get,
    Router,
};
use tower::ServiceExt;

use shared_models::auth::User;
use shared_utils::extractor::auth_middleware;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

fn app() -> Router {
    let config = TestConfig::default().to_arc();
    Router::new()
        .route("/me", get(|Extension(user): Extension<User>| async move { user.id }))
        .layer(middleware::from_fn_with_state(config, auth_middleware))
}

async fn call(authorization: Option<String>) -> (StatusCode, String) {
    let mut request = Request::builder().uri("/me");
    if let Some(value) = authorization {
        request = request.header("Authorization", value);
    }

    let response = app().oneshot(request.body(Body::empty()).unwrap()).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_valid_token_exposes_user() {
    let config = TestConfig::default();
    let user = TestUser::professional("pro@example.com");
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, None);

    let (status, body) = call(Some(format!("Bearer {}", token))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, user.id);
}

#[tokio::test]
async fn test_rejected_tokens() {
    let config = TestConfig::default();
    let user = TestUser::patient("patient@example.com");

    let cases = vec![
        None,
        Some("Token abc".to_string()),
        Some(format!("Bearer {}", JwtTestUtils::create_malformed_token())),
        Some(format!("Bearer {}", JwtTestUtils::create_invalid_signature_token(&user))),
        Some(format!("Bearer {}", JwtTestUtils::create_expired_token(&user, &config.jwt_secret))),
    ];

    for authorization in cases {
        let (status, _) = call(authorization.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{:?}", authorization);
    }
}

#[test]
fn test_admins_manage_any_schedule() {
    let owner = TestUser::professional("pro@example.com").to_user();
    let admin = TestUser::admin("admin@example.com").to_user();
    let stranger = TestUser::new("someone@example.com", "professional").to_user();

    assert!(owner.can_manage(&owner.id));
    assert!(admin.can_manage(&owner.id));
    assert!(!stranger.can_manage(&owner.id));
}
