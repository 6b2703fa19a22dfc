// Shared helpers for API integration tests
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use sfbench::api::{create_router, AppState};
use sfbench::config::AppConfig;
use sfbench::crypto::SecretCipher;
use sfbench::store::Store;
use std::sync::Arc;
use tower::ServiceExt;

pub const SECRET: &str = "integration-test-secret-0123456789";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<Store>,
    pub cipher: SecretCipher,
}

pub fn create_test_app() -> TestApp {
    create_test_app_with(AppConfig::default())
}

pub fn create_test_app_with(config: AppConfig) -> TestApp {
    let cipher = SecretCipher::from_secret(SECRET).unwrap();
    let store = Arc::new(Store::open(":memory:", cipher.clone()).unwrap());
    let state = AppState::new(Arc::clone(&store), cipher.clone(), config).unwrap();

    TestApp {
        router: create_router(state),
        store,
        cipher,
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

impl TestApp {
    /// Registers a user directly in the store and returns its token
    pub fn user(&self, name: &str) -> String {
        self.store.create_user(name).unwrap().token
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, bearer(token));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&value).unwrap())
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    /// Sends a request and decodes the JSON body (`Null` when empty)
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.send(method, uri, token, body).await;
        let status = response.status();
        (status, read_json(response).await)
    }

    pub async fn create_environment(&self, token: &str, body: Value) -> String {
        let (status, env) = self
            .request(Method::POST, "/api/environments", Some(token), Some(body))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", env);
        env["id"].as_str().unwrap().to_string()
    }

    /// Sandbox environment with Connected App credentials
    pub async fn sandbox(&self, token: &str, instance_url: &str) -> String {
        self.create_environment(
            token,
            json!({
                "name": "uat",
                "type": "sandbox",
                "instanceUrl": instance_url,
                "clientId": "connected-app-id",
                "clientSecret": "connected-app-secret",
            }),
        )
        .await
    }

    pub async fn create_test(&self, token: &str, body: Value) -> String {
        let (status, test) = self
            .request(Method::POST, "/api/tests", Some(token), Some(body))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", test);
        test["id"].as_str().unwrap().to_string()
    }

    pub async fn record_result(&self, token: &str, body: Value) -> String {
        let (status, result) = self
            .request(Method::POST, "/api/results", Some(token), Some(body))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", result);
        result["id"].as_str().unwrap().to_string()
    }
}

pub async fn read_body(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn read_json(response: Response) -> Value {
    let text = read_body(response).await;
    if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    }
}
