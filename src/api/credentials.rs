use super::{Access, ApiError, AppState};
use crate::store::{AuthType, Credential, NewCredential};
use crate::validation::Validator;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Create/update body. On update omitted fields keep their stored value and
/// an empty string clears an optional one.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequest {
    pub environment_id: Option<String>,
    pub auth_type: Option<String>,
    pub org_name: Option<String>,
    pub member_id: Option<String>,
    pub branch_id: Option<String>,
    pub api_key: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialQuery {
    pub environment_id: Option<String>,
}

/// Credential as returned by the API (secrets reduced to flags)
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialResponse {
    pub id: String,
    pub environment_id: String,
    pub auth_type: AuthType,
    pub org_name: String,
    pub member_id: Option<String>,
    pub branch_id: Option<String>,
    pub client_id: Option<String>,
    pub has_api_key: bool,
    pub has_client_secret: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Credential> for CredentialResponse {
    fn from(c: Credential) -> Self {
        CredentialResponse {
            has_api_key: c.api_key.is_some(),
            has_client_secret: c.client_secret.is_some(),
            id: c.id,
            environment_id: c.environment_id,
            auth_type: c.auth_type,
            org_name: c.org_name,
            member_id: c.member_id,
            branch_id: c.branch_id,
            client_id: c.client_id,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/credentials",
            get(list_credentials).post(create_credential),
        )
        .route(
            "/api/credentials/:id",
            get(get_credential)
                .put(update_credential)
                .delete(delete_credential),
        )
}

fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_auth_type(value: Option<&str>) -> Result<AuthType, ApiError> {
    let mut v = Validator::new();
    if let Some(t) = v.required("authType", value) {
        if v.one_of("authType", t, &AuthType::NAMES) {
            if let Some(auth_type) = AuthType::parse(t) {
                return Ok(auth_type);
            }
        }
    }
    v.finish()?;
    Err(ApiError::field("authType", "is invalid"))
}

/// Field rules, including which secrets each auth type carries
fn validate(new: &NewCredential) -> Result<(), ApiError> {
    let mut v = Validator::new();

    if let Some(org_name) = v.required("orgName", Some(new.org_name.as_str())) {
        v.length("orgName", org_name, 1, 200);
    }

    let require = |v: &mut Validator, field: &str, value: &Option<String>| {
        v.required(field, value.as_deref());
    };
    let forbid = |v: &mut Validator, field: &str, value: &Option<String>, auth: &str| {
        if value.is_some() {
            v.error(field, format!("must not be set for {} credentials", auth));
        }
    };

    match new.auth_type {
        AuthType::ApiKey => {
            require(&mut v, "apiKey", &new.api_key);
            require(&mut v, "memberId", &new.member_id);
            require(&mut v, "branchId", &new.branch_id);
            forbid(&mut v, "clientId", &new.client_id, "apikey");
            forbid(&mut v, "clientSecret", &new.client_secret, "apikey");
        }
        AuthType::OAuth2 => {
            require(&mut v, "clientId", &new.client_id);
            require(&mut v, "clientSecret", &new.client_secret);
            forbid(&mut v, "apiKey", &new.api_key, "oauth2");
        }
    }

    Ok(v.finish()?)
}

/// Applies a request on top of `base`. Switching auth type drops the
/// previous type's secrets before the request's fields are applied.
fn merge(mut base: NewCredential, request: &CredentialRequest, auth_type: AuthType) -> NewCredential {
    if base.auth_type != auth_type {
        base.api_key = None;
        base.client_id = None;
        base.client_secret = None;
        base.auth_type = auth_type;
    }

    if let Some(org_name) = &request.org_name {
        base.org_name = org_name.trim().to_string();
    }
    let fields = [
        (&request.member_id, &mut base.member_id),
        (&request.branch_id, &mut base.branch_id),
        (&request.api_key, &mut base.api_key),
        (&request.client_id, &mut base.client_id),
        (&request.client_secret, &mut base.client_secret),
    ];
    for (given, slot) in fields {
        if let Some(value) = given {
            *slot = optional(value);
        }
    }
    base
}

/// GET /api/credentials?environmentId=
async fn list_credentials(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<CredentialQuery>, QueryRejection>,
) -> Result<Json<Vec<CredentialResponse>>, ApiError> {
    let user = state.authenticate(&headers)?;
    let Query(query) = query?;

    if let Some(env_id) = &query.environment_id {
        state.owned_environment(&user, env_id, Access::Read)?;
    }

    let credentials = state
        .store
        .list_credentials(&user.id, query.environment_id.as_deref())?;
    Ok(Json(
        credentials.into_iter().map(CredentialResponse::from).collect(),
    ))
}

/// POST /api/credentials
async fn create_credential(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CredentialRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CredentialResponse>), ApiError> {
    let user = state.authenticate(&headers)?;
    let Json(request) = payload?;

    let environment_id = request
        .environment_id
        .as_deref()
        .and_then(optional)
        .ok_or_else(|| ApiError::field("environmentId", "is required"))?;
    let auth_type = parse_auth_type(request.auth_type.as_deref())?;
    state.owned_environment(&user, &environment_id, Access::Write)?;

    let base = NewCredential {
        environment_id,
        auth_type,
        org_name: String::new(),
        member_id: None,
        branch_id: None,
        api_key: None,
        client_id: None,
        client_secret: None,
    };
    let new = merge(base, &request, auth_type);
    validate(&new)?;

    let credential = state.store.insert_credential(&new)?;
    info!(
        credential_id = %credential.id,
        environment_id = %credential.environment_id,
        auth_type = credential.auth_type.as_str(),
        "Credential created"
    );

    Ok((StatusCode::CREATED, Json(credential.into())))
}

/// GET /api/credentials/:id
async fn get_credential(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CredentialResponse>, ApiError> {
    let user = state.authenticate(&headers)?;
    let credential = state.owned_credential(&user, &id, Access::Read)?;
    Ok(Json(credential.into()))
}

/// PUT /api/credentials/:id
async fn update_credential(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<CredentialRequest>, JsonRejection>,
) -> Result<Json<CredentialResponse>, ApiError> {
    let user = state.authenticate(&headers)?;
    let Json(request) = payload?;
    let existing = state.owned_credential(&user, &id, Access::Write)?;

    if let Some(env_id) = &request.environment_id {
        if env_id != &existing.environment_id {
            return Err(ApiError::field("environmentId", "cannot be changed"));
        }
    }
    let auth_type = match request.auth_type.as_deref() {
        Some(t) => parse_auth_type(Some(t))?,
        None => existing.auth_type,
    };

    let new = merge(NewCredential::from(&existing), &request, auth_type);
    validate(&new)?;

    state.store.update_credential(&id, &new)?;
    info!(credential_id = %id, "Credential updated");

    let credential = state
        .store
        .get_credential(&id)?
        .ok_or_else(|| ApiError::not_found("Credential", &id))?;
    Ok(Json(credential.into()))
}

/// DELETE /api/credentials/:id
async fn delete_credential(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = state.authenticate(&headers)?;
    state.owned_credential(&user, &id, Access::Write)?;

    state.store.delete_credential(&id)?;
    info!(credential_id = %id, "Credential deleted");

    Ok(StatusCode::NO_CONTENT)
}
