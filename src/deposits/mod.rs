//! Deposit values recovered from earlier test runs.
//!
//! Deposit-creation tests return a deposit account number (DAN) that
//! follow-up tests (repayments, updates) need. Rather than keeping a separate
//! table, the values are re-parsed from the stored request and response
//! snapshots of recent passed runs.

use crate::store::ResultWithTest;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};

/// Category marking a test as a deposit creation
pub const DEPOSIT_CREATION_CATEGORY: &str = "deposit_creation";

const DAN_KEYS: &[&str] = &["dan", "DAN", "deposit_account_number", "depositAccountNumber"];
const TENANCY_START_KEYS: &[&str] = &["tenancy_start_date", "tenancyStartDate", "start_date"];
const TENANCY_END_KEYS: &[&str] = &["tenancy_end_date", "tenancyEndDate", "end_date"];
const AMOUNT_KEYS: &[&str] = &["deposit_amount", "depositAmount", "amount"];
const PROPERTY_KEYS: &[&str] = &["property_reference", "propertyReference", "property_id"];

/// Whether a test creates deposits.
///
/// An explicit category decides. Uncategorized tests fall back to the
/// endpoint: it mentions `deposit` together with `create` or `new`, or it is
/// a POST to a path ending in `/deposits`.
pub fn is_deposit_creation(category: Option<&str>, method: &str, endpoint: &str) -> bool {
    if let Some(category) = category {
        return category == DEPOSIT_CREATION_CATEGORY;
    }

    let endpoint = endpoint.to_lowercase();
    let path = endpoint.split('?').next().unwrap_or_default().trim_end_matches('/');

    (endpoint.contains("deposit") && (endpoint.contains("create") || endpoint.contains("new")))
        || (method.eq_ignore_ascii_case("POST") && path.ends_with("/deposits"))
}

/// Finds the first value stored under any of `keys`, searching breadth-first
/// so shallow matches win over nested ones.
pub fn find_key<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let mut queue = VecDeque::from([value]);

    while let Some(current) = queue.pop_front() {
        match current {
            Value::Object(map) => {
                let found = keys
                    .iter()
                    .find_map(|k| map.get(*k).filter(|v| !v.is_null()));
                if found.is_some() {
                    return found;
                }
                queue.extend(map.values());
            }
            Value::Array(items) => queue.extend(items.iter()),
            _ => {}
        }
    }
    None
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A deposit reconstructed from one passed creation run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositCreation {
    pub result_id: String,
    pub test_id: String,
    pub test_name: String,
    pub environment_id: String,
    pub dan: Option<String>,
    pub tenancy_start_date: Option<String>,
    pub tenancy_end_date: Option<String>,
    pub deposit_amount: Option<Value>,
    pub property_reference: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// A DAN available for follow-up tests
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableDan {
    pub dan: String,
    pub result_id: String,
    pub test_name: String,
    pub environment_id: String,
    pub executed_at: DateTime<Utc>,
}

fn find_either<'a>(first: &'a Value, second: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    find_key(first, keys).or_else(|| find_key(second, keys))
}

/// Parses the deposit fields out of a result's snapshots. The DAN comes from
/// the response; the other fields from the request, falling back to the
/// response.
pub fn parse_creation(row: &ResultWithTest) -> DepositCreation {
    let request = &row.result.request;
    let response = &row.result.response;
    let lookup = |keys| find_either(request, response, keys);

    DepositCreation {
        result_id: row.result.id.clone(),
        test_id: row.result.test_id.clone(),
        test_name: row.test_name.clone(),
        environment_id: row.environment_id.clone(),
        dan: find_key(response, DAN_KEYS).and_then(as_text),
        tenancy_start_date: lookup(TENANCY_START_KEYS).and_then(as_text),
        tenancy_end_date: lookup(TENANCY_END_KEYS).and_then(as_text),
        deposit_amount: lookup(AMOUNT_KEYS).cloned(),
        property_reference: lookup(PROPERTY_KEYS).and_then(as_text),
        executed_at: row.result.executed_at,
    }
}

/// Every deposit creation among `rows`, in input order
pub fn successful_creations(rows: &[ResultWithTest]) -> Vec<DepositCreation> {
    rows.iter()
        .filter(|row| is_deposit_creation(row.category.as_deref(), &row.method, &row.endpoint))
        .map(parse_creation)
        .collect()
}

/// Distinct DANs among `creations`; the first occurrence of each wins
pub fn available_dans(creations: &[DepositCreation]) -> Vec<AvailableDan> {
    let mut seen = HashSet::new();

    creations
        .iter()
        .filter_map(|c| {
            let dan = c.dan.as_ref()?;
            if !seen.insert(dan.clone()) {
                return None;
            }
            Some(AvailableDan {
                dan: dan.clone(),
                result_id: c.result_id.clone(),
                test_name: c.test_name.clone(),
                environment_id: c.environment_id.clone(),
                executed_at: c.executed_at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{TestResult, TestStatus};
    use serde_json::json;

    fn row(id: &str, category: Option<&str>, endpoint: &str, response: Value) -> ResultWithTest {
        ResultWithTest {
            result: TestResult {
                id: id.to_string(),
                test_id: "t1".to_string(),
                credential_id: None,
                status: TestStatus::Passed,
                manual_status: None,
                request: json!({
                    "method": "POST",
                    "body": {
                        "tenancy": {
                            "tenancy_start_date": "2026-01-01",
                            "tenancy_end_date": "2027-01-01",
                            "deposit_amount": 1200
                        },
                        "property": {"property_reference": "PROP-9"}
                    }
                }),
                response,
                validation_results: json!([]),
                duration_ms: Some(10),
                executed_at: Utc::now(),
            },
            environment_id: "e1".to_string(),
            test_name: "Create deposit".to_string(),
            category: category.map(str::to_string),
            endpoint: endpoint.to_string(),
            method: "POST".to_string(),
        }
    }

    #[test]
    fn test_category_decides_before_pattern() {
        assert!(is_deposit_creation(Some("deposit_creation"), "GET", "/anything"));
        assert!(!is_deposit_creation(Some("repayment"), "POST", "/deposits/create"));
    }

    #[test]
    fn test_endpoint_pattern_fallback() {
        assert!(is_deposit_creation(None, "POST", "/services/apexrest/Deposit/Create"));
        assert!(is_deposit_creation(None, "PUT", "/api/deposit/new"));
        assert!(is_deposit_creation(None, "POST", "/api/v1/deposits/"));
        assert!(!is_deposit_creation(None, "GET", "/api/v1/deposits"));
        assert!(!is_deposit_creation(None, "POST", "/api/v1/repayments"));
    }

    #[test]
    fn test_find_key_prefers_shallow_match() {
        let value = json!({"nested": {"dan": "DEEP"}, "DAN": "TOP"});
        assert_eq!(find_key(&value, DAN_KEYS), Some(&json!("TOP")));

        let value = json!({"items": [{"x": 1}, {"depositAccountNumber": 77}]});
        assert_eq!(find_key(&value, DAN_KEYS), Some(&json!(77)));

        assert_eq!(find_key(&json!({"dan": null}), DAN_KEYS), None);
    }

    #[test]
    fn test_parse_creation_fields() {
        let creation = parse_creation(&row(
            "r1",
            Some("deposit_creation"),
            "/deposits",
            json!({"status": 201, "body": {"success": true, "dan": "EWC00012345"}}),
        ));

        assert_eq!(creation.dan.as_deref(), Some("EWC00012345"));
        assert_eq!(creation.tenancy_start_date.as_deref(), Some("2026-01-01"));
        assert_eq!(creation.tenancy_end_date.as_deref(), Some("2027-01-01"));
        assert_eq!(creation.deposit_amount, Some(json!(1200)));
        assert_eq!(creation.property_reference.as_deref(), Some("PROP-9"));
    }

    #[test]
    fn test_available_dans_distinct_first_wins() {
        let rows = vec![
            row("r1", None, "/deposits/create", json!({"body": {"dan": "D1"}})),
            row("r2", None, "/deposits/create", json!({"body": {"dan": "D1"}})),
            row("r3", None, "/deposits/create", json!({"body": {"error": "nope"}})),
            row("r4", None, "/repayments", json!({"body": {"dan": "D9"}})),
            row("r5", Some("deposit_creation"), "/x", json!({"body": {"DAN": "D2"}})),
        ];

        let creations = successful_creations(&rows);
        assert_eq!(creations.len(), 4);

        let dans = available_dans(&creations);
        let pairs: Vec<_> = dans.iter().map(|d| (d.dan.as_str(), d.result_id.as_str())).collect();
        assert_eq!(pairs, vec![("D1", "r1"), ("D2", "r5")]);
    }
}
