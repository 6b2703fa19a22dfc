use super::{optional_json, Access, ApiError, AppState};
use crate::store::{TestCase, TestReport, TestResult, TestStatus};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateReportRequest {
    pub environment_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    pub id: String,
    pub environment_id: Option<String>,
    pub summary: Value,
    pub generated_at: DateTime<Utc>,
}

impl From<TestReport> for ReportResponse {
    fn from(r: TestReport) -> Self {
        ReportResponse {
            id: r.id,
            environment_id: r.environment_id,
            summary: r.summary,
            generated_at: r.generated_at,
        }
    }
}

/// One line of a report: a test and its latest outcome
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    pub test_id: String,
    pub name: String,
    pub endpoint: String,
    pub method: String,
    /// Effective status of the latest run, or `not_run`
    pub status: String,
    pub result_id: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub error: usize,
    pub not_run: usize,
    /// Percentage of executed tests that passed, one decimal
    pub pass_rate: f64,
    pub tests: Vec<ReportEntry>,
}

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/reports", get(list_reports).post(generate_report))
        .route("/api/reports/:id", get(get_report).delete(delete_report))
}

/// Aggregates each test's latest result
pub fn summarize(latest: Vec<(TestCase, Option<TestResult>)>) -> ReportSummary {
    let mut summary = ReportSummary {
        total: latest.len(),
        passed: 0,
        failed: 0,
        error: 0,
        not_run: 0,
        pass_rate: 0.0,
        tests: Vec::with_capacity(latest.len()),
    };

    for (test, result) in latest {
        let status = result.as_ref().map(TestResult::effective_status);
        match status {
            Some(TestStatus::Passed) => summary.passed += 1,
            Some(TestStatus::Failed) => summary.failed += 1,
            Some(TestStatus::Error) => summary.error += 1,
            None => summary.not_run += 1,
        }
        summary.tests.push(ReportEntry {
            test_id: test.id,
            name: test.name,
            endpoint: test.endpoint,
            method: test.method,
            status: status.map(|s| s.as_str()).unwrap_or("not_run").to_string(),
            result_id: result.as_ref().map(|r| r.id.clone()),
            executed_at: result.as_ref().map(|r| r.executed_at),
        });
    }

    let executed = summary.total - summary.not_run;
    if executed > 0 {
        let rate = summary.passed as f64 * 100.0 / executed as f64;
        summary.pass_rate = (rate * 10.0).round() / 10.0;
    }
    summary
}

/// POST /api/reports
async fn generate_report(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ReportResponse>), ApiError> {
    let user = state.authenticate(&headers)?;
    let request: GenerateReportRequest = optional_json(&body)?;

    if let Some(env_id) = &request.environment_id {
        state.owned_environment(&user, env_id, Access::Read)?;
    }

    let (tests, _) = state
        .store
        .list_test_cases(&user.id, request.environment_id.as_deref(), None)?;
    let mut latest = Vec::with_capacity(tests.len());
    for test in tests {
        let result = state.store.latest_result(&test.id)?;
        latest.push((test, result));
    }

    let summary = summarize(latest);
    let summary = serde_json::to_value(&summary).map_err(|e| ApiError::Internal(e.into()))?;
    let report = state.store.insert_report(
        &user.id,
        request.environment_id.as_deref(),
        &summary,
    )?;

    info!(report_id = %report.id, user_id = %user.id, "Report generated");

    Ok((StatusCode::CREATED, Json(report.into())))
}

/// GET /api/reports
async fn list_reports(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ReportResponse>>, ApiError> {
    let user = state.authenticate(&headers)?;
    let reports = state.store.list_reports(&user.id)?;
    Ok(Json(reports.into_iter().map(ReportResponse::from).collect()))
}

fn owned_report(
    state: &AppState,
    user_id: &str,
    id: &str,
    access: Access,
) -> Result<TestReport, ApiError> {
    let report = state
        .store
        .get_report(id)?
        .ok_or_else(|| ApiError::not_found("Report", id))?;

    if report.user_id != user_id {
        return Err(match access {
            Access::Read => ApiError::not_found("Report", id),
            Access::Write => ApiError::Forbidden(format!("Report '{}' belongs to another user", id)),
        });
    }
    Ok(report)
}

/// GET /api/reports/:id
async fn get_report(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ReportResponse>, ApiError> {
    let user = state.authenticate(&headers)?;
    let report = owned_report(&state, &user.id, &id, Access::Read)?;
    Ok(Json(report.into()))
}

/// DELETE /api/reports/:id
async fn delete_report(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = state.authenticate(&headers)?;
    owned_report(&state, &user.id, &id, Access::Write)?;

    state.store.delete_report(&id)?;
    info!(report_id = %id, "Report deleted");

    Ok(StatusCode::NO_CONTENT)
}
