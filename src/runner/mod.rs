//! Test execution: issues one test's HTTP call against its environment and
//! judges the response.
//!
//! Execution never fails as a whole. A transport problem is recorded as an
//! `error` outcome with the message in the response snapshot, so every run
//! produces a result row.

pub mod rules;
mod template;

use crate::store::{Credential, Environment, TestCase, TestStatus};
use reqwest::header::AUTHORIZATION;
use reqwest::Method;
use rules::{evaluate_all, ResponseView, RuleOutcome};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, warn};

pub use template::{substitute, substitute_value};

const REDACTED: &str = "[REDACTED]";

/// Outcome of one execution, ready to be stored as a result
#[derive(Debug, Clone)]
pub struct Execution {
    pub status: TestStatus,
    pub request: Value,
    pub response: Value,
    pub validation_results: Vec<RuleOutcome>,
    pub duration_ms: i64,
}

/// Placeholder values for a run: credential fields first, then caller
/// variables (which win on a name clash).
pub fn placeholder_values(
    credential: Option<&Credential>,
    variables: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    if let Some(c) = credential {
        vars.insert("orgName".to_string(), c.org_name.clone());
        let optional = [
            ("memberId", &c.member_id),
            ("branchId", &c.branch_id),
            ("apiKey", &c.api_key),
            ("clientId", &c.client_id),
            ("clientSecret", &c.client_secret),
        ];
        for (name, value) in optional {
            if let Some(v) = value {
                vars.insert(name.to_string(), v.clone());
            }
        }
    }
    vars.extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));
    vars
}

/// Absolute URL for a test endpoint
pub fn resolve_url(instance_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!(
            "{}/{}",
            instance_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

fn secrets_of(credential: Option<&Credential>) -> Vec<String> {
    credential
        .map(|c| {
            [&c.api_key, &c.client_secret]
                .into_iter()
                .flatten()
                .filter(|s| !s.is_empty())
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// Header map for the request snapshot
fn redact_headers(headers: &BTreeMap<String, String>, secrets: &[String]) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let hidden = name.eq_ignore_ascii_case(AUTHORIZATION.as_str())
                || secrets.iter().any(|s| value.contains(s.as_str()));
            let value = if hidden { REDACTED.to_string() } else { value.clone() };
            (name.clone(), value)
        })
        .collect()
}

/// Runs a test against an environment.
///
/// # Arguments
/// * `http` - Shared client (carries the request timeout)
/// * `env` - Target environment; its access token is sent as a bearer token
///   unless the test sets its own Authorization header
/// * `test` - Test definition
/// * `credential` - Credential supplying placeholder values
/// * `variables` - Extra placeholder values
pub async fn execute(
    http: &reqwest::Client,
    env: &Environment,
    test: &TestCase,
    credential: Option<&Credential>,
    variables: &BTreeMap<String, String>,
) -> Execution {
    let vars = placeholder_values(credential, variables);
    let url = resolve_url(&env.instance_url, &substitute(&test.endpoint, &vars));

    let mut headers: BTreeMap<String, String> = test
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), substitute(v, &vars)))
        .collect();
    let has_authorization = headers
        .keys()
        .any(|k| k.eq_ignore_ascii_case(AUTHORIZATION.as_str()));
    if !has_authorization {
        if let Some(token) = &env.access_token {
            headers.insert("Authorization".to_string(), format!("Bearer {}", token));
        }
    }
    let body = test.body.as_ref().map(|b| substitute_value(b, &vars));

    let secrets = secrets_of(credential);
    let request = json!({
        "method": test.method,
        "url": redact_text(&url, &secrets),
        "headers": redact_headers(&headers, &secrets),
        "body": body.as_ref().map(|b| redact_value(b, &secrets)),
    });

    let started = Instant::now();
    let elapsed = |started: Instant| started.elapsed().as_millis() as i64;

    let method = match Method::from_bytes(test.method.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            return failed_to_send(request, format!("Invalid method '{}'", test.method), 0);
        }
    };

    debug!(test_id = %test.id, method = %method, url = %url, "Executing test");

    let mut builder = http.request(method, &url);
    for (name, value) in &headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &body {
        builder = builder.json(body);
    }

    let response = match builder.send().await {
        Ok(r) => r,
        Err(e) => {
            warn!(test_id = %test.id, error = %e, "Test request failed");
            return failed_to_send(request, format!("Request failed: {}", e), elapsed(started));
        }
    };

    let status = response.status().as_u16();
    let response_headers: BTreeMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
        .collect();

    let text = match response.text().await {
        Ok(t) => t,
        Err(e) => {
            warn!(test_id = %test.id, error = %e, "Failed to read test response");
            return failed_to_send(
                request,
                format!("Failed to read response: {}", e),
                elapsed(started),
            );
        }
    };
    let duration_ms = elapsed(started);
    let response_body = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };

    let outcomes = evaluate_all(
        &test.validations,
        ResponseView {
            status,
            headers: &response_headers,
            body: &response_body,
        },
    );
    let passed = status == test.expected_status && outcomes.iter().all(|o| o.passed);

    debug!(
        test_id = %test.id,
        status,
        passed,
        duration_ms,
        "Test executed"
    );

    Execution {
        status: if passed { TestStatus::Passed } else { TestStatus::Failed },
        request,
        response: json!({
            "status": status,
            "headers": response_headers,
            "body": response_body,
        }),
        validation_results: outcomes,
        duration_ms,
    }
}

fn failed_to_send(request: Value, message: String, duration_ms: i64) -> Execution {
    Execution {
        status: TestStatus::Error,
        request,
        response: json!({ "error": message }),
        validation_results: Vec::new(),
        duration_ms,
    }
}

/// Copy of `text` with every secret value masked
fn redact_text(text: &str, secrets: &[String]) -> String {
    secrets
        .iter()
        .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
}

/// Masks secrets in every string of a JSON value, object keys included
fn redact_value(value: &Value, secrets: &[String]) -> Value {
    match value {
        Value::String(s) => Value::String(redact_text(s, secrets)),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_value(v, secrets)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (redact_text(k, secrets), redact_value(v, secrets)))
                .collect(),
        ),
        other => other.clone(),
    }
}
