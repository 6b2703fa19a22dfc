// Integration tests for /api/credentials

mod common;

use axum::http::{Method, StatusCode};
use common::create_test_app;
use serde_json::json;

async fn setup() -> (common::TestApp, String, String) {
    let app = create_test_app();
    let token = app.user("alice");
    let env_id = app
        .sandbox(&token, "https://acme--uat.sandbox.my.salesforce.com")
        .await;
    (app, token, env_id)
}

#[tokio::test]
async fn test_apikey_credential_lifecycle() {
    let (app, token, env_id) = setup().await;

    let (status, credential) = app
        .request(
            Method::POST,
            "/api/credentials",
            Some(&token),
            Some(json!({
                "environmentId": env_id,
                "authType": "apikey",
                "orgName": "Acme Lettings",
                "memberId": "M100",
                "branchId": "B7",
                "apiKey": "key-abc-123",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", credential);
    assert_eq!(credential["authType"], "apikey");
    assert_eq!(credential["hasApiKey"], true);
    assert!(!credential.to_string().contains("key-abc-123"));
    let id = credential["id"].as_str().unwrap().to_string();

    let stored = app.store.get_credential(&id).unwrap().unwrap();
    assert_eq!(stored.api_key.as_deref(), Some("key-abc-123"));

    let (status, list) = app
        .request(
            Method::GET,
            &format!("/api/credentials?environmentId={}", env_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, updated) = app
        .request(
            Method::PUT,
            &format!("/api/credentials/{}", id),
            Some(&token),
            Some(json!({"branchId": "B8"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["branchId"], "B8");
    assert_eq!(updated["memberId"], "M100");
    assert_eq!(updated["hasApiKey"], true);

    let (status, _) = app
        .request(Method::DELETE, &format!("/api/credentials/{}", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

/// apikey and oauth2 secret fields are mutually exclusive
#[tokio::test]
async fn test_auth_type_exclusivity() {
    let (app, token, env_id) = setup().await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/credentials",
            Some(&token),
            Some(json!({
                "environmentId": env_id,
                "authType": "oauth2",
                "orgName": "Acme",
                "clientId": "cid",
                "clientSecret": "secret",
                "apiKey": "stray",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"][0]["field"], "apiKey");

    let (status, body) = app
        .request(
            Method::POST,
            "/api/credentials",
            Some(&token),
            Some(json!({
                "environmentId": env_id,
                "authType": "apikey",
                "orgName": "Acme",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let fields: Vec<&str> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["apiKey", "memberId", "branchId"]);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/credentials",
            Some(&token),
            Some(json!({"environmentId": env_id, "authType": "basic", "orgName": "Acme"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_environment_cannot_change() {
    let (app, token, env_id) = setup().await;
    let other_env = app
        .create_environment(
            &token,
            json!({"name": "prod", "type": "production", "instanceUrl": "https://acme.my.salesforce.com"}),
        )
        .await;

    let (_, credential) = app
        .request(
            Method::POST,
            "/api/credentials",
            Some(&token),
            Some(json!({
                "environmentId": env_id,
                "authType": "oauth2",
                "orgName": "Acme",
                "clientId": "cid",
                "clientSecret": "secret",
            })),
        )
        .await;

    let (status, _) = app
        .request(
            Method::PUT,
            &format!("/api/credentials/{}", credential["id"].as_str().unwrap()),
            Some(&token),
            Some(json!({"environmentId": other_env})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_foreign_credentials() {
    let (app, alice, env_id) = setup().await;
    let bob = app.user("bob");

    // Creating under someone else's environment is a mutation
    let (status, _) = app
        .request(
            Method::POST,
            "/api/credentials",
            Some(&bob),
            Some(json!({
                "environmentId": env_id,
                "authType": "oauth2",
                "orgName": "Acme",
                "clientId": "cid",
                "clientSecret": "secret",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, credential) = app
        .request(
            Method::POST,
            "/api/credentials",
            Some(&alice),
            Some(json!({
                "environmentId": env_id,
                "authType": "oauth2",
                "orgName": "Acme",
                "clientId": "cid",
                "clientSecret": "secret",
            })),
        )
        .await;
    let uri = format!("/api/credentials/{}", credential["id"].as_str().unwrap());

    let (status, _) = app.request(Method::GET, &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.request(Method::DELETE, &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/credentials?environmentId={}", env_id),
            Some(&bob),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
