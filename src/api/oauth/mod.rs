//! Salesforce OAuth 2.0 authorization code flow.
//!
//! 1. The UI opens a popup on GET /api/oauth/authorize?environmentId=...
//! 2. The user is redirected to the org's login host and approves the Connected App
//! 3. Salesforce redirects to GET /api/oauth/callback with a code and our state
//! 4. The code is exchanged for tokens, which are stored encrypted
//! 5. The callback page posts the outcome back to the opener and closes
//!
//! Access tokens are later renewed through POST /api/oauth/refresh.

mod exchange;
mod page;
mod provider;
mod state;

pub use state::OAuthState;

use super::{Access, ApiError, AppState};
use crate::store::{OAuthStatus, OAuthTokens};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const NO_REFRESH_TOKEN: &str =
    "No refresh token available. Please re-authenticate with Salesforce.";

/// `environmentId` as a query parameter or JSON body
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentParam {
    pub environment_id: Option<String>,
}

impl EnvironmentParam {
    fn required(self) -> Result<String, ApiError> {
        self.environment_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::field("environmentId", "is required"))
    }
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub success: bool,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub environment_id: String,
    pub status: OAuthStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
}

#[derive(Serialize)]
pub struct RevokeResponse {
    pub success: bool,
}

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/oauth/authorize", get(authorize))
        .route("/api/oauth/callback", get(callback))
        .route("/api/oauth/refresh", post(refresh))
        .route("/api/oauth/status", get(status))
        .route("/api/oauth/revoke", post(revoke))
}

/// GET /api/oauth/authorize?environmentId=
///
/// Redirects to the Salesforce login host with an encrypted state that
/// names the environment and the user.
async fn authorize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<EnvironmentParam>, QueryRejection>,
) -> Result<Redirect, ApiError> {
    let user = state.authenticate(&headers)?;
    let Query(query) = query?;
    let env_id = query.required()?;
    let env = state.owned_environment(&user, &env_id, Access::Read)?;

    let client_id = match env.client_id.as_deref() {
        Some(id) if env.has_client_credentials() => id,
        _ => {
            return Err(ApiError::BadRequest(
                "Environment has no OAuth client id/secret configured".to_string(),
            ))
        }
    };

    let csrf_state = OAuthState::new(&env.id, &user.id).encode(&state.cipher)?;
    let login_url = provider::login_url(&state.config.oauth, &env);
    let url = provider::build_authorize_url(
        login_url,
        client_id,
        &state.config.redirect_uri(),
        &state.config.oauth.scopes,
        &csrf_state,
    );

    info!(
        environment_id = %env.id,
        user_id = %user.id,
        login_url = %login_url,
        "Redirecting to Salesforce login"
    );

    Ok(Redirect::temporary(&url))
}

/// Failure rendered as the popup page
struct CallbackError {
    status: StatusCode,
    message: String,
}

impl CallbackError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        error!(error = %message, "OAuth callback failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message,
        }
    }
}

/// GET /api/oauth/callback
///
/// Unauthenticated: the state carries the environment and user. Always
/// answers with the popup page, success or not.
async fn callback(
    State(state): State<Arc<AppState>>,
    Query(callback): Query<OAuthCallback>,
) -> Response {
    let origin = state.config.app_url();
    match complete_authorization(&state, callback).await {
        Ok((token, expires_at)) => {
            let message = page::success_message(&token, expires_at);
            Html(page::render(&message, origin)).into_response()
        }
        Err(e) => {
            let message = page::failure_message(&e.message);
            (e.status, Html(page::render(&message, origin))).into_response()
        }
    }
}

async fn complete_authorization(
    state: &AppState,
    callback: OAuthCallback,
) -> Result<(String, DateTime<Utc>), CallbackError> {
    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "Salesforce denied authorization");
        return Err(CallbackError::bad_request(format!(
            "Authorization failed: {} - {}",
            error, description
        )));
    }

    let code = callback
        .code
        .ok_or_else(|| CallbackError::bad_request("Missing 'code' parameter"))?;
    let raw_state = callback
        .state
        .ok_or_else(|| CallbackError::bad_request("Missing 'state' parameter"))?;

    let oauth_state = OAuthState::decode(
        &raw_state,
        &state.cipher,
        state.config.oauth.state_ttl_seconds,
        Utc::now(),
    )
    .map_err(|e| {
        warn!(error = %format!("{:#}", e), "Rejected OAuth state");
        CallbackError::bad_request("Invalid or expired OAuth state")
    })?;

    let env = state
        .store
        .get_environment(&oauth_state.environment_id)
        .map_err(CallbackError::internal)?
        .filter(|env| env.user_id == oauth_state.user_id)
        .ok_or_else(|| CallbackError::bad_request("Environment no longer exists"))?;

    let (Some(client_id), Some(client_secret)) = (&env.client_id, &env.client_secret) else {
        return Err(CallbackError::bad_request(
            "Environment has no OAuth client id/secret configured",
        ));
    };

    let token_url = provider::token_url(provider::login_url(&state.config.oauth, &env));
    debug!(environment_id = %env.id, "Exchanging authorization code");
    let tokens = exchange::exchange_code(
        &state.http,
        &token_url,
        &code,
        &state.config.redirect_uri(),
        client_id,
        client_secret,
    )
    .await
    .map_err(|e| {
        let message = format!("{:#}", e);
        error!(environment_id = %env.id, error = %message, "Authorization code exchange failed");
        CallbackError {
            status: StatusCode::BAD_GATEWAY,
            message,
        }
    })?;

    let expires_at = Utc::now() + Duration::seconds(state.config.oauth.token_lifetime_seconds);
    state
        .store
        .store_oauth_tokens(
            &env.id,
            &OAuthTokens {
                access_token: tokens.access_token.clone(),
                refresh_token: tokens.refresh_token.clone(),
                expires_at,
                instance_url: tokens.instance_url,
            },
        )
        .map_err(CallbackError::internal)?;

    info!(
        environment_id = %env.id,
        user_id = %env.user_id,
        has_refresh_token = tokens.refresh_token.is_some(),
        "Salesforce authorization completed"
    );

    Ok((tokens.access_token, expires_at))
}

/// POST /api/oauth/refresh {environmentId}
async fn refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<EnvironmentParam>, JsonRejection>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let user = state.authenticate(&headers)?;
    let Json(body) = payload?;
    let env_id = body.required()?;
    let env = state.owned_environment(&user, &env_id, Access::Write)?;

    let (Some(client_id), Some(client_secret)) = (&env.client_id, &env.client_secret) else {
        return Err(ApiError::BadRequest(
            "Environment has no OAuth client id/secret configured".to_string(),
        ));
    };
    let refresh_token = env
        .refresh_token
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest(NO_REFRESH_TOKEN.to_string()))?;

    let token_url = provider::token_url(provider::login_url(&state.config.oauth, &env));
    let tokens = exchange::refresh_access_token(
        &state.http,
        &token_url,
        refresh_token,
        client_id,
        client_secret,
    )
    .await
    .map_err(|e| ApiError::Upstream(format!("{:#}", e)))?;

    let expires_at = Utc::now() + Duration::seconds(state.config.oauth.token_lifetime_seconds);
    state.store.store_oauth_tokens(
        &env.id,
        &OAuthTokens {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at,
            instance_url: tokens.instance_url,
        },
    )?;

    info!(environment_id = %env.id, expires_at = %expires_at, "Access token refreshed");

    Ok(Json(RefreshResponse {
        success: true,
        expires_at,
    }))
}

/// GET /api/oauth/status?environmentId=
async fn status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<EnvironmentParam>, QueryRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let user = state.authenticate(&headers)?;
    let Query(query) = query?;
    let env_id = query.required()?;
    let env = state.owned_environment(&user, &env_id, Access::Read)?;

    Ok(Json(StatusResponse {
        status: env.oauth_status(Utc::now()),
        expires_at: env.token_expires_at,
        has_refresh_token: env.refresh_token.is_some(),
        environment_id: env.id,
    }))
}

/// POST /api/oauth/revoke {environmentId}
///
/// Forgets the stored tokens locally; nothing is sent to Salesforce.
async fn revoke(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<EnvironmentParam>, JsonRejection>,
) -> Result<Json<RevokeResponse>, ApiError> {
    let user = state.authenticate(&headers)?;
    let Json(body) = payload?;
    let env_id = body.required()?;
    let env = state.owned_environment(&user, &env_id, Access::Write)?;

    state.store.clear_oauth_tokens(&env.id)?;
    info!(environment_id = %env.id, "OAuth tokens revoked");

    Ok(Json(RevokeResponse { success: true }))
}
