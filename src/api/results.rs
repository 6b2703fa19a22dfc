use super::{Access, ApiError, AppState, Paginated, Pagination};
use crate::store::{NewTestResult, ResultFilter, TestResult, TestStatus};
use crate::validation::Validator;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, patch, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

const MAX_BULK_DELETE: usize = 1000;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultQuery {
    pub environment_id: Option<String>,
    pub test_id: Option<String>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Body for recording an externally executed result
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordResultRequest {
    pub test_id: Option<String>,
    pub credential_id: Option<String>,
    pub status: Option<String>,
    pub request: Option<Value>,
    pub response: Option<Value>,
    pub validation_results: Option<Value>,
    pub duration_ms: Option<i64>,
    pub executed_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteResponse {
    pub deleted_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultResponse {
    pub id: String,
    pub test_id: String,
    pub credential_id: Option<String>,
    pub status: TestStatus,
    pub manual_status: Option<TestStatus>,
    pub effective_status: TestStatus,
    pub request: Value,
    pub response: Value,
    pub validation_results: Value,
    pub duration_ms: Option<i64>,
    pub executed_at: DateTime<Utc>,
}

impl From<TestResult> for ResultResponse {
    fn from(r: TestResult) -> Self {
        ResultResponse {
            effective_status: r.effective_status(),
            id: r.id,
            test_id: r.test_id,
            credential_id: r.credential_id,
            status: r.status,
            manual_status: r.manual_status,
            request: r.request,
            response: r.response,
            validation_results: r.validation_results,
            duration_ms: r.duration_ms,
            executed_at: r.executed_at,
        }
    }
}

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/results", get(list_results).post(record_result))
        .route("/api/results/bulk-delete", post(bulk_delete))
        .route(
            "/api/results/:id",
            get(get_result).delete(delete_result),
        )
        .route("/api/results/:id/manual-status", patch(set_manual_status))
}

fn parse_status(field: &str, value: &str) -> Result<TestStatus, ApiError> {
    TestStatus::parse(value).ok_or_else(|| {
        ApiError::field(
            field,
            format!("must be one of: {}", TestStatus::NAMES.join(", ")),
        )
    })
}

/// Reads `manualStatus` from a PATCH body: a status name sets the override,
/// `null` clears it, anything else is rejected.
fn parse_manual_status(body: &Value) -> Result<Option<TestStatus>, ApiError> {
    match body.get("manualStatus") {
        None => Err(ApiError::field("manualStatus", "is required")),
        Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => parse_status("manualStatus", s).map(Some),
        Some(_) => Err(ApiError::field(
            "manualStatus",
            format!("must be one of: {}, or null", TestStatus::NAMES.join(", ")),
        )),
    }
}

/// GET /api/results?environmentId=&testId=&status=&page=&limit=
async fn list_results(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<ResultQuery>, QueryRejection>,
) -> Result<Json<Paginated<ResultResponse>>, ApiError> {
    let user = state.authenticate(&headers)?;
    let Query(query) = query?;

    let status = query
        .status
        .as_deref()
        .map(|s| parse_status("status", s))
        .transpose()?;
    let filter = ResultFilter {
        environment_id: query.environment_id,
        test_id: query.test_id,
        status,
    };

    let pagination = Pagination::resolve(query.page, query.limit, &state.config.api);
    let (results, total) =
        state
            .store
            .list_results(&user.id, &filter, Some(pagination.window()))?;

    Ok(Json(Paginated {
        data: results.into_iter().map(ResultResponse::from).collect(),
        pagination: pagination.info(total),
    }))
}

/// POST /api/results - record a result produced outside the runner
async fn record_result(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<RecordResultRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ResultResponse>), ApiError> {
    let user = state.authenticate(&headers)?;
    let Json(request) = payload?;

    let mut v = Validator::new();
    let test_id = v.required("testId", request.test_id.as_deref()).map(str::to_string);
    let status = v
        .required("status", request.status.as_deref())
        .and_then(|s| {
            v.one_of("status", s, &TestStatus::NAMES)
                .then(|| TestStatus::parse(s))
                .flatten()
        });
    if request.duration_ms.is_some_and(|d| d < 0) {
        v.error("durationMs", "must not be negative");
    }
    v.finish()?;
    let (Some(test_id), Some(status)) = (test_id, status) else {
        return Err(ApiError::BadRequest("Invalid result".to_string()));
    };

    let (test, env) = state.owned_test(&user, &test_id, Access::Write)?;
    let credential_id = match request.credential_id.as_deref() {
        Some(id) => Some(state.credential_in_environment(id, &env.id)?.id),
        None => None,
    };

    let result = state.store.insert_result(&NewTestResult {
        test_id: test.id,
        credential_id,
        status,
        request: request.request.unwrap_or_else(|| json!({})),
        response: request.response.unwrap_or_else(|| json!({})),
        validation_results: request.validation_results.unwrap_or_else(|| json!([])),
        duration_ms: request.duration_ms,
        executed_at: request.executed_at,
    })?;
    info!(result_id = %result.id, test_id = %result.test_id, "Result recorded");

    Ok((StatusCode::CREATED, Json(result.into())))
}

/// GET /api/results/:id
async fn get_result(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ResultResponse>, ApiError> {
    let user = state.authenticate(&headers)?;
    let result = state.owned_result(&user, &id, Access::Read)?;
    Ok(Json(result.into()))
}

/// PATCH /api/results/:id/manual-status
async fn set_manual_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ResultResponse>, ApiError> {
    let user = state.authenticate(&headers)?;
    let Json(body) = payload?;
    let manual_status = parse_manual_status(&body)?;
    state.owned_result(&user, &id, Access::Write)?;

    state.store.set_manual_status(&id, manual_status)?;
    info!(
        result_id = %id,
        manual_status = manual_status.map(|s| s.as_str()).unwrap_or("none"),
        "Manual status set"
    );

    let result = state
        .store
        .get_result(&id)?
        .ok_or_else(|| ApiError::not_found("Result", &id))?;
    Ok(Json(result.into()))
}

/// DELETE /api/results/:id
async fn delete_result(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = state.authenticate(&headers)?;
    state.owned_result(&user, &id, Access::Write)?;

    state.store.delete_result(&id)?;
    info!(result_id = %id, "Result deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/results/bulk-delete
///
/// Deletes the caller's results among `ids`. Unknown or foreign ids are
/// skipped, so `deletedCount` may be lower than the number of ids.
async fn bulk_delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<BulkDeleteRequest>, JsonRejection>,
) -> Result<Json<BulkDeleteResponse>, ApiError> {
    let user = state.authenticate(&headers)?;
    let Json(request) = payload?;

    let ids = request
        .ids
        .filter(|ids| !ids.is_empty())
        .ok_or_else(|| ApiError::field("ids", "must be a non-empty array"))?;
    if ids.len() > MAX_BULK_DELETE {
        return Err(ApiError::field(
            "ids",
            format!("must contain at most {} ids", MAX_BULK_DELETE),
        ));
    }

    let deleted_count = state.store.delete_results(&user.id, &ids)?;
    info!(
        user_id = %user.id,
        requested = ids.len(),
        deleted = deleted_count,
        "Bulk delete"
    );

    Ok(Json(BulkDeleteResponse { deleted_count }))
}
