use super::results::ResultResponse;
use super::{optional_json, Access, ApiError, AppState, Paginated, Pagination};
use crate::runner::{self, rules::ValidationRule};
use crate::store::{NewTestCase, NewTestResult, TestCase};
use crate::validation::Validator;
use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

const METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Create/replace body
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TestRequest {
    pub environment_id: Option<String>,
    pub credential_id: Option<String>,
    pub name: Option<String>,
    pub category: Option<String>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    pub headers: Option<Value>,
    pub body: Option<Value>,
    pub expected_status: Option<i64>,
    pub validations: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestQuery {
    pub environment_id: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Optional run parameters
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub credential_id: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResponse {
    pub id: String,
    pub environment_id: String,
    pub credential_id: Option<String>,
    pub name: String,
    pub category: Option<String>,
    pub endpoint: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub expected_status: u16,
    pub validations: Vec<ValidationRule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TestCase> for TestResponse {
    fn from(t: TestCase) -> Self {
        TestResponse {
            id: t.id,
            environment_id: t.environment_id,
            credential_id: t.credential_id,
            name: t.name,
            category: t.category,
            endpoint: t.endpoint,
            method: t.method,
            headers: t.headers,
            body: t.body,
            expected_status: t.expected_status,
            validations: t.validations,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tests", get(list_tests).post(create_test))
        .route(
            "/api/tests/:id",
            get(get_test).put(update_test).delete(delete_test),
        )
        .route("/api/tests/:id/run", post(run_test))
}

fn is_valid_endpoint(endpoint: &str) -> bool {
    if endpoint.starts_with('/') {
        return true;
    }
    Url::parse(endpoint)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Validates a request into a test definition for `environment_id`.
/// Credential ownership is checked by the caller.
fn validate(environment_id: &str, request: TestRequest) -> Result<NewTestCase, ApiError> {
    let mut v = Validator::new();

    let name = v.required("name", request.name.as_deref());
    if let Some(name) = name {
        v.length("name", name, 1, 200);
    }

    let category = request
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    if let Some(category) = category {
        v.length("category", category, 1, 100);
    }

    let endpoint = v.required("endpoint", request.endpoint.as_deref());
    if let Some(endpoint) = endpoint {
        if !is_valid_endpoint(endpoint) {
            v.error("endpoint", "must be a path starting with '/' or an absolute URL");
        }
    }

    let method = v
        .required("method", request.method.as_deref())
        .map(str::to_uppercase);
    if let Some(method) = &method {
        v.one_of("method", method, &METHODS);
    }

    let expected_status = request.expected_status.unwrap_or(200);
    if !(100..=599).contains(&expected_status) {
        v.error("expectedStatus", "must be between 100 and 599");
    }

    let headers = match request.headers {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(value) => serde_json::from_value::<BTreeMap<String, String>>(value).unwrap_or_else(|_| {
            v.error("headers", "must be an object of string values");
            BTreeMap::new()
        }),
    };

    let validations = match request.validations {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => serde_json::from_value::<Vec<ValidationRule>>(value).unwrap_or_else(|e| {
            v.error("validations", format!("must be an array of rules: {}", e));
            Vec::new()
        }),
    };

    let credential_id = request
        .credential_id
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    v.finish()?;

    Ok(NewTestCase {
        environment_id: environment_id.to_string(),
        credential_id,
        name: name.unwrap_or_default().to_string(),
        category: category.map(str::to_string),
        endpoint: endpoint.unwrap_or_default().to_string(),
        method: method.unwrap_or_default(),
        headers,
        body: request.body.filter(|b| !b.is_null()),
        expected_status: expected_status as u16,
        validations,
    })
}

/// GET /api/tests?environmentId=&page=&limit=
async fn list_tests(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<TestQuery>, QueryRejection>,
) -> Result<Json<Paginated<TestResponse>>, ApiError> {
    let user = state.authenticate(&headers)?;
    let Query(query) = query?;

    if let Some(env_id) = &query.environment_id {
        state.owned_environment(&user, env_id, Access::Read)?;
    }

    let pagination = Pagination::resolve(query.page, query.limit, &state.config.api);
    let (tests, total) = state.store.list_test_cases(
        &user.id,
        query.environment_id.as_deref(),
        Some(pagination.window()),
    )?;

    Ok(Json(Paginated {
        data: tests.into_iter().map(TestResponse::from).collect(),
        pagination: pagination.info(total),
    }))
}

/// POST /api/tests
async fn create_test(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<TestRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TestResponse>), ApiError> {
    let user = state.authenticate(&headers)?;
    let Json(request) = payload?;

    let environment_id = request
        .environment_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::field("environmentId", "is required"))?;
    state.owned_environment(&user, &environment_id, Access::Write)?;

    let new = validate(&environment_id, request)?;
    if let Some(credential_id) = &new.credential_id {
        state.credential_in_environment(credential_id, &environment_id)?;
    }

    let test = state.store.insert_test_case(&new)?;
    info!(test_id = %test.id, environment_id = %environment_id, "Test created");

    Ok((StatusCode::CREATED, Json(test.into())))
}

/// GET /api/tests/:id
async fn get_test(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<TestResponse>, ApiError> {
    let user = state.authenticate(&headers)?;
    let (test, _) = state.owned_test(&user, &id, Access::Read)?;
    Ok(Json(test.into()))
}

/// PUT /api/tests/:id - replaces the definition; the environment is fixed
async fn update_test(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<TestRequest>, JsonRejection>,
) -> Result<Json<TestResponse>, ApiError> {
    let user = state.authenticate(&headers)?;
    let Json(request) = payload?;
    let (existing, _) = state.owned_test(&user, &id, Access::Write)?;

    if let Some(env_id) = &request.environment_id {
        if env_id != &existing.environment_id {
            return Err(ApiError::field("environmentId", "cannot be changed"));
        }
    }

    let new = validate(&existing.environment_id, request)?;
    if let Some(credential_id) = &new.credential_id {
        state.credential_in_environment(credential_id, &existing.environment_id)?;
    }

    state.store.update_test_case(&id, &new)?;
    info!(test_id = %id, "Test updated");

    let test = state
        .store
        .get_test_case(&id)?
        .ok_or_else(|| ApiError::not_found("Test", &id))?;
    Ok(Json(test.into()))
}

/// DELETE /api/tests/:id
async fn delete_test(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = state.authenticate(&headers)?;
    state.owned_test(&user, &id, Access::Write)?;

    state.store.delete_test_case(&id)?;
    info!(test_id = %id, "Test deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/tests/:id/run
///
/// Executes the test now and records the result.
async fn run_test(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<ResultResponse>), ApiError> {
    let user = state.authenticate(&headers)?;
    let request: RunRequest = optional_json(&body)?;
    let (test, env) = state.owned_test(&user, &id, Access::Write)?;

    let credential = match request.credential_id.as_ref().or(test.credential_id.as_ref()) {
        Some(credential_id) => Some(state.credential_in_environment(credential_id, &env.id)?),
        None => None,
    };

    let execution =
        runner::execute(&state.http, &env, &test, credential.as_ref(), &request.variables).await;

    let validation_results = serde_json::to_value(&execution.validation_results)
        .map_err(|e| ApiError::Internal(e.into()))?;
    let result = state.store.insert_result(&NewTestResult {
        test_id: test.id.clone(),
        credential_id: credential.map(|c| c.id),
        status: execution.status,
        request: execution.request,
        response: execution.response,
        validation_results,
        duration_ms: Some(execution.duration_ms),
        executed_at: None,
    })?;

    info!(
        test_id = %test.id,
        result_id = %result.id,
        status = result.status.as_str(),
        duration_ms = execution.duration_ms,
        "Test run recorded"
    );

    Ok((StatusCode::CREATED, Json(result.into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: Value) -> TestRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_validate_applies_defaults() {
        let new = validate(
            "env",
            request(json!({
                "name": "Create deposit",
                "endpoint": "/services/apexrest/deposits",
                "method": "post"
            })),
        )
        .unwrap();

        assert_eq!(new.method, "POST");
        assert_eq!(new.expected_status, 200);
        assert!(new.headers.is_empty());
        assert!(new.validations.is_empty());
        assert!(new.body.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let err = validate(
            "env",
            request(json!({
                "name": "x",
                "endpoint": "services/no-slash",
                "method": "TRACE",
                "expectedStatus": 700,
                "headers": {"X-Count": 3},
                "validations": [{"type": "regex"}]
            })),
        )
        .unwrap_err();

        match err {
            ApiError::Validation(errors) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(
                    fields,
                    vec!["endpoint", "method", "expectedStatus", "headers", "validations"]
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_endpoint_forms() {
        assert!(is_valid_endpoint("/services/data/v60.0/sobjects"));
        assert!(is_valid_endpoint("https://api.example.com/deposits"));
        assert!(!is_valid_endpoint("deposits"));
        assert!(!is_valid_endpoint("ftp://example.com/x"));
    }
}
