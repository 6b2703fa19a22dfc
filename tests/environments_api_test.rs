// Integration tests for /api/users and /api/environments

mod common;

use axum::http::{Method, StatusCode};
use common::{create_test_app, create_test_app_with};
use serde_json::json;
use sfbench::config::AppConfig;
use tower::ServiceExt;

fn uat() -> serde_json::Value {
    json!({
        "name": "uat",
        "type": "sandbox",
        "instanceUrl": "https://acme--uat.sandbox.my.salesforce.com/",
        "clientId": "cid",
        "clientSecret": "top-secret",
    })
}

/// Requests without a bearer token are rejected
#[tokio::test]
async fn test_requires_bearer_token() {
    let app = create_test_app();

    let (status, body) = app
        .request(Method::GET, "/api/environments", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = app
        .request(Method::GET, "/api/environments", Some("nope"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health() {
    let app = create_test_app();
    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

/// Registration is gated by the admin token when one is configured
#[tokio::test]
async fn test_user_registration() {
    let mut config = AppConfig::default();
    config.server.admin_token = Some("admin".to_string());
    let app = create_test_app_with(config);

    let (status, _) = app
        .request(Method::POST, "/api/users", None, Some(json!({"name": "alice"})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, user) = app
        .request(
            Method::POST,
            "/api/users",
            Some("admin"),
            Some(json!({"name": "alice"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = user["token"].as_str().unwrap().to_string();

    let (status, me) = app
        .request(Method::GET, "/api/users/me", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["name"], "alice");
    assert!(me.get("token").is_none());

    let (status, _) = app
        .request(
            Method::POST,
            "/api/users",
            Some("admin"),
            Some(json!({"name": "alice"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/users",
            Some("admin"),
            Some(json!({"name": "Al"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"][0]["field"], "name");
}

#[tokio::test]
async fn test_environment_crud() {
    let app = create_test_app();
    let token = app.user("alice");

    let (status, env) = app
        .request(Method::POST, "/api/environments", Some(&token), Some(uat()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(env["type"], "sandbox");
    assert_eq!(env["instanceUrl"], "https://acme--uat.sandbox.my.salesforce.com");
    assert_eq!(env["hasClientSecret"], true);
    assert_eq!(env["oauthStatus"], "configured");
    assert!(!env.to_string().contains("top-secret"));
    let id = env["id"].as_str().unwrap().to_string();

    let (status, list) = app
        .request(Method::GET, "/api/environments", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    // Partial update; an empty secret clears it
    let (status, updated) = app
        .request(
            Method::PUT,
            &format!("/api/environments/{}", id),
            Some(&token),
            Some(json!({"name": "uat-2", "clientSecret": ""})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "uat-2");
    assert_eq!(updated["type"], "sandbox");
    assert_eq!(updated["hasClientSecret"], false);
    assert_eq!(updated["oauthStatus"], "unconfigured");

    let (status, _) = app
        .request(Method::DELETE, &format!("/api/environments/{}", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .request(Method::GET, &format!("/api/environments/{}", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Secrets are encrypted in the database
#[tokio::test]
async fn test_client_secret_encrypted_at_rest() {
    let app = create_test_app();
    let token = app.user("alice");
    let id = app.create_environment(&token, uat()).await;

    let env = app.store.get_environment(&id).unwrap().unwrap();
    assert_eq!(env.client_secret.as_deref(), Some("top-secret"));
}

#[tokio::test]
async fn test_environment_validation() {
    let app = create_test_app();
    let token = app.user("alice");

    let (status, body) = app
        .request(
            Method::POST,
            "/api/environments",
            Some(&token),
            Some(json!({"type": "staging", "instanceUrl": "http://acme.my.salesforce.com"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let fields: Vec<&str> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["name", "type", "instanceUrl"]);
}

#[tokio::test]
async fn test_duplicate_environment_name_conflicts() {
    let app = create_test_app();
    let token = app.user("alice");
    app.create_environment(&token, uat()).await;

    let (status, _) = app
        .request(Method::POST, "/api/environments", Some(&token), Some(uat()))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Names are unique per user only
    let bob = app.user("bob");
    app.create_environment(&bob, uat()).await;
}

/// Another user's environment reads as 404 and refuses mutation with 403
#[tokio::test]
async fn test_foreign_environment() {
    let app = create_test_app();
    let alice = app.user("alice");
    let bob = app.user("bob");
    let id = app.create_environment(&alice, uat()).await;
    let uri = format!("/api/environments/{}", id);

    let (status, _) = app.request(Method::GET, &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request(Method::PUT, &uri, Some(&bob), Some(json!({"name": "mine"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.request(Method::DELETE, &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, list) = app
        .request(Method::GET, "/api/environments", Some(&bob), None)
        .await;
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = create_test_app();
    let token = app.user("alice");

    let response = app
        .router
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/environments")
                .header("Authorization", format!("Bearer {}", token))
                .header("Content-Type", "application/json")
                .body(axum::body::Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
