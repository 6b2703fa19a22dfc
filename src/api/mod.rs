//! HTTP API.
//!
//! Every route under `/api` except the OAuth callback authenticates the
//! caller by bearer token. Resources hang off environments, and an
//! environment belongs to exactly one user: a foreign resource reads as
//! 404 and refuses mutation with 403.

mod credentials;
mod deposits;
mod environments;
pub mod error;
pub mod oauth;
mod pagination;
mod reports;
mod results;
mod test_cases;
mod users;

pub use error::ApiError;
pub use pagination::{PageInfo, Paginated, Pagination};

use crate::auth;
use crate::config::AppConfig;
use crate::crypto::SecretCipher;
use crate::store::{Credential, Environment, Store, TestCase, TestResult, User};
use anyhow::Context;
use axum::{
    body::Bytes,
    http::{HeaderMap, HeaderValue},
    response::Json,
    routing::get,
    Router,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub cipher: SecretCipher,
    pub http: reqwest::Client,
    pub config: Arc<AppConfig>,
}

/// How a handler intends to use a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Read,
    Write,
}

impl AppState {
    /// Builds the state, including the HTTP client shared by the OAuth
    /// exchanges and the test runner.
    pub fn new(store: Arc<Store>, cipher: SecretCipher, config: AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.runner.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            store,
            cipher,
            http,
            config: Arc::new(config),
        })
    }

    pub(crate) fn authenticate(&self, headers: &HeaderMap) -> Result<User, ApiError> {
        Ok(auth::authenticate(headers, &self.store)?)
    }

    /// Loads an environment and checks the caller owns it
    pub(crate) fn owned_environment(
        &self,
        user: &User,
        id: &str,
        access: Access,
    ) -> Result<Environment, ApiError> {
        let env = self
            .store
            .get_environment(id)?
            .ok_or_else(|| ApiError::not_found("Environment", id))?;

        if env.user_id != user.id {
            return Err(foreign(user, "Environment", id, access));
        }
        Ok(env)
    }

    pub(crate) fn owned_credential(
        &self,
        user: &User,
        id: &str,
        access: Access,
    ) -> Result<Credential, ApiError> {
        let credential = self
            .store
            .get_credential(id)?
            .ok_or_else(|| ApiError::not_found("Credential", id))?;

        self.check_parent(user, &credential.environment_id, "Credential", id, access)?;
        Ok(credential)
    }

    /// Loads a test together with its (owned) environment
    pub(crate) fn owned_test(
        &self,
        user: &User,
        id: &str,
        access: Access,
    ) -> Result<(TestCase, Environment), ApiError> {
        let test = self
            .store
            .get_test_case(id)?
            .ok_or_else(|| ApiError::not_found("Test", id))?;

        let env = self.check_parent(user, &test.environment_id, "Test", id, access)?;
        Ok((test, env))
    }

    pub(crate) fn owned_result(
        &self,
        user: &User,
        id: &str,
        access: Access,
    ) -> Result<TestResult, ApiError> {
        let result = self
            .store
            .get_result(id)?
            .ok_or_else(|| ApiError::not_found("Result", id))?;
        let test = self
            .store
            .get_test_case(&result.test_id)?
            .ok_or_else(|| ApiError::not_found("Result", id))?;

        self.check_parent(user, &test.environment_id, "Result", id, access)?;
        Ok(result)
    }

    /// Ownership of a child resource is ownership of its environment. The
    /// error names the child, not the environment.
    fn check_parent(
        &self,
        user: &User,
        environment_id: &str,
        what: &str,
        id: &str,
        access: Access,
    ) -> Result<Environment, ApiError> {
        let env = self
            .store
            .get_environment(environment_id)?
            .ok_or_else(|| ApiError::not_found(what, id))?;

        if env.user_id != user.id {
            return Err(foreign(user, what, id, access));
        }
        Ok(env)
    }

    /// Checks that an optional credential belongs to the given environment
    pub(crate) fn credential_in_environment(
        &self,
        credential_id: &str,
        environment_id: &str,
    ) -> Result<Credential, ApiError> {
        match self.store.get_credential(credential_id)? {
            Some(c) if c.environment_id == environment_id => Ok(c),
            Some(_) => Err(ApiError::field(
                "credentialId",
                "must belong to the same environment",
            )),
            None => Err(ApiError::field("credentialId", "does not exist")),
        }
    }
}

fn foreign(user: &User, what: &str, id: &str, access: Access) -> ApiError {
    warn!(user_id = %user.id, resource = what, id = %id, "Access to foreign resource");
    match access {
        Access::Read => ApiError::not_found(what, id),
        Access::Write => ApiError::Forbidden(format!("{} '{}' belongs to another user", what, id)),
    }
}

/// Body of an endpoint whose JSON payload is optional. An empty body
/// means defaults; anything else must parse.
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Failed to parse the request body as JSON: {}", e)))
}

/// GET /health
async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors = match HeaderValue::from_str(state.config.app_url()) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(_) => {
            warn!(app_url = %state.config.app_url(), "app_url is not a valid origin, CORS disabled");
            CorsLayer::new()
        }
    };

    Router::new()
        .route("/health", get(health))
        .merge(users::routes())
        .merge(environments::routes())
        .merge(credentials::routes())
        .merge(test_cases::routes())
        .merge(results::routes())
        .merge(reports::routes())
        .merge(deposits::routes())
        .merge(oauth::routes())
        .layer(cors)
        .with_state(Arc::new(state))
}
