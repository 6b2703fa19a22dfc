use super::{Access, ApiError, AppState};
use crate::deposits::{self, AvailableDan, DepositCreation};
use crate::store::ResultWithTest;
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::HeaderMap,
    response::Json,
    routing::get,
    Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositQuery {
    pub environment_id: Option<String>,
}

#[derive(Serialize)]
pub struct DepositList<T> {
    pub data: Vec<T>,
    pub count: usize,
}

impl<T> From<Vec<T>> for DepositList<T> {
    fn from(data: Vec<T>) -> Self {
        DepositList {
            count: data.len(),
            data,
        }
    }
}

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/deposits/available-dans", get(available_dans))
        .route(
            "/api/deposits/successful-creations",
            get(successful_creations),
        )
}

/// Passed results inside the lookback window, newest first
fn recent_rows(
    state: &AppState,
    headers: &HeaderMap,
    query: Result<Query<DepositQuery>, QueryRejection>,
) -> Result<Vec<ResultWithTest>, ApiError> {
    let user = state.authenticate(headers)?;
    let Query(query) = query?;

    if let Some(env_id) = &query.environment_id {
        state.owned_environment(&user, env_id, Access::Read)?;
    }

    let since = Utc::now() - Duration::days(state.config.api.deposit_lookback_days);
    let rows = state
        .store
        .recent_passed_results(&user.id, query.environment_id.as_deref(), since)?;
    debug!(user_id = %user.id, rows = rows.len(), "Loaded recent passed results");
    Ok(rows)
}

/// GET /api/deposits/available-dans?environmentId=
async fn available_dans(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<DepositQuery>, QueryRejection>,
) -> Result<Json<DepositList<AvailableDan>>, ApiError> {
    let rows = recent_rows(&state, &headers, query)?;
    let creations = deposits::successful_creations(&rows);
    Ok(Json(deposits::available_dans(&creations).into()))
}

/// GET /api/deposits/successful-creations?environmentId=
async fn successful_creations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<DepositQuery>, QueryRejection>,
) -> Result<Json<DepositList<DepositCreation>>, ApiError> {
    let rows = recent_rows(&state, &headers, query)?;
    Ok(Json(deposits::successful_creations(&rows).into()))
}
