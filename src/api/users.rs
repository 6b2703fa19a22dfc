use super::{ApiError, AppState};
use crate::auth::is_admin;
use crate::validation::Validator;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Request to create a user
#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub name: Option<String>,
}

/// Response for successful user creation (the only time the token is shown)
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedUser {
    pub id: String,
    pub name: String,
    pub token: String,
    pub created_at: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/users", post(create_user))
        .route("/api/users/me", get(current_user))
}

fn validate_name(name: Option<&str>) -> Result<String, ApiError> {
    let mut v = Validator::new();
    let name = v.required("name", name);
    if let Some(name) = name {
        if v.length("name", name, 3, 32)
            && !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            v.error(
                "name",
                "may only contain lowercase letters, digits, '-' and '_'",
            );
        }
    }
    v.finish()?;
    Ok(name.unwrap_or_default().to_string())
}

/// POST /api/users - Create a user and issue its bearer token
async fn create_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedUser>), ApiError> {
    // Require admin token if configured
    if !is_admin(&headers, state.config.server.admin_token.as_deref()) {
        return Err(ApiError::Unauthorized("Admin token required".to_string()));
    }

    let Json(request) = payload?;
    let name = validate_name(request.name.as_deref())?;

    let user = state.store.create_user(&name)?;
    info!(user_id = %user.id, name = %user.name, "User created");

    Ok((
        StatusCode::CREATED,
        Json(CreatedUser {
            id: user.id,
            name: user.name,
            token: user.token,
            created_at: user.created_at.to_rfc3339(),
        }),
    ))
}

/// GET /api/users/me
async fn current_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UserInfo>, ApiError> {
    let user = state.authenticate(&headers)?;
    Ok(Json(UserInfo {
        id: user.id,
        name: user.name,
        created_at: user.created_at.to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_rules() {
        assert_eq!(validate_name(Some(" qa-team_1 ")).unwrap(), "qa-team_1");
        assert!(validate_name(None).is_err());
        assert!(validate_name(Some("ab")).is_err());
        assert!(validate_name(Some("Has Spaces")).is_err());
        assert!(validate_name(Some(&"x".repeat(33))).is_err());
    }
}
