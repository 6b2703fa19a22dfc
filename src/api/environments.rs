use super::{Access, ApiError, AppState};
use crate::store::{Environment, EnvironmentType, NewEnvironment, OAuthStatus};
use crate::validation::Validator;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Create/update body. On update every field is optional; an empty string
/// clears `clientId` or `clientSecret`.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub env_type: Option<String>,
    pub instance_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Environment as returned by the API (secrets reduced to flags)
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentResponse {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub env_type: EnvironmentType,
    pub instance_url: String,
    pub client_id: Option<String>,
    pub has_client_secret: bool,
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub oauth_status: OAuthStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Environment> for EnvironmentResponse {
    fn from(env: Environment) -> Self {
        EnvironmentResponse {
            oauth_status: env.oauth_status(Utc::now()),
            has_client_secret: env.client_secret.is_some(),
            has_access_token: env.access_token.is_some(),
            has_refresh_token: env.refresh_token.is_some(),
            id: env.id,
            name: env.name,
            env_type: env.env_type,
            instance_url: env.instance_url,
            client_id: env.client_id,
            token_expires_at: env.token_expires_at,
            created_at: env.created_at,
            updated_at: env.updated_at,
        }
    }
}

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/environments",
            get(list_environments).post(create_environment),
        )
        .route(
            "/api/environments/:id",
            get(get_environment)
                .put(update_environment)
                .delete(delete_environment),
        )
}

/// Trims an optional secret; blank means "none"
fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Validates the editable fields of an environment
fn validate(
    name: Option<&str>,
    env_type: Option<&str>,
    instance_url: Option<&str>,
) -> Result<(String, EnvironmentType, String), ApiError> {
    let mut v = Validator::new();

    let name = v.required("name", name);
    if let Some(name) = name {
        v.length("name", name, 1, 100);
    }

    let env_type = v.required("type", env_type).and_then(|t| {
        v.one_of("type", t, &EnvironmentType::NAMES)
            .then(|| EnvironmentType::parse(t))
            .flatten()
    });

    let instance_url = v.required("instanceUrl", instance_url);
    if let Some(url) = instance_url {
        v.url("instanceUrl", url);
    }

    v.finish()?;

    match (name, env_type, instance_url) {
        (Some(name), Some(env_type), Some(url)) => Ok((
            name.to_string(),
            env_type,
            url.trim_end_matches('/').to_string(),
        )),
        _ => Err(ApiError::BadRequest("Invalid environment".to_string())),
    }
}

/// GET /api/environments
async fn list_environments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<EnvironmentResponse>>, ApiError> {
    let user = state.authenticate(&headers)?;
    let envs = state.store.list_environments(&user.id)?;
    Ok(Json(envs.into_iter().map(EnvironmentResponse::from).collect()))
}

/// POST /api/environments
async fn create_environment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<EnvironmentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EnvironmentResponse>), ApiError> {
    let user = state.authenticate(&headers)?;
    let Json(request) = payload?;

    let (name, env_type, instance_url) = validate(
        request.name.as_deref(),
        request.env_type.as_deref(),
        request.instance_url.as_deref(),
    )?;

    let env = state.store.insert_environment(
        &user.id,
        &NewEnvironment {
            name,
            env_type,
            instance_url,
            client_id: optional(request.client_id.as_deref()),
            client_secret: optional(request.client_secret.as_deref()),
        },
    )?;

    info!(
        environment_id = %env.id,
        user_id = %user.id,
        env_type = env.env_type.as_str(),
        "Environment created"
    );

    Ok((StatusCode::CREATED, Json(env.into())))
}

/// GET /api/environments/:id
async fn get_environment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<EnvironmentResponse>, ApiError> {
    let user = state.authenticate(&headers)?;
    let env = state.owned_environment(&user, &id, Access::Read)?;
    Ok(Json(env.into()))
}

/// PUT /api/environments/:id - partial update
async fn update_environment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<EnvironmentRequest>, JsonRejection>,
) -> Result<Json<EnvironmentResponse>, ApiError> {
    let user = state.authenticate(&headers)?;
    let Json(request) = payload?;
    let mut env = state.owned_environment(&user, &id, Access::Write)?;

    let (name, env_type, instance_url) = validate(
        Some(request.name.as_deref().unwrap_or(&env.name)),
        Some(request.env_type.as_deref().unwrap_or(env.env_type.as_str())),
        Some(request.instance_url.as_deref().unwrap_or(&env.instance_url)),
    )?;
    env.name = name;
    env.env_type = env_type;
    env.instance_url = instance_url;
    if let Some(client_id) = request.client_id.as_deref() {
        env.client_id = optional(Some(client_id));
    }
    if let Some(client_secret) = request.client_secret.as_deref() {
        env.client_secret = optional(Some(client_secret));
    }

    state.store.update_environment(&env)?;
    info!(environment_id = %id, "Environment updated");

    let env = state
        .store
        .get_environment(&id)?
        .ok_or_else(|| ApiError::not_found("Environment", &id))?;
    Ok(Json(env.into()))
}

/// DELETE /api/environments/:id
async fn delete_environment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = state.authenticate(&headers)?;
    state.owned_environment(&user, &id, Access::Write)?;

    state.store.delete_environment(&id)?;
    info!(environment_id = %id, "Environment deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_collects_every_field() {
        let err = validate(Some(""), Some("galaxy"), Some("ftp://example.com")).unwrap_err();
        match err {
            ApiError::Validation(errors) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["name", "type", "instanceUrl"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_validate_normalizes_url() {
        let (name, env_type, url) = validate(
            Some(" uat "),
            Some("sandbox"),
            Some("https://acme--uat.sandbox.my.salesforce.com/"),
        )
        .unwrap();
        assert_eq!(name, "uat");
        assert_eq!(env_type, EnvironmentType::Sandbox);
        assert_eq!(url, "https://acme--uat.sandbox.my.salesforce.com");
    }

    #[test]
    fn test_blank_secret_is_none() {
        assert_eq!(optional(Some("  ")), None);
        assert_eq!(optional(Some(" id ")), Some("id".to_string()));
        assert_eq!(optional(None), None);
    }
}
