//! Immutable execution records, with a human override status.

use super::{limit_offset, new_id, parse_json, parse_timestamp, timestamp, Page, Store};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a test execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
}

impl TestStatus {
    pub const NAMES: [&'static str; 3] = ["passed", "failed", "error"];

    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "passed" => Some(TestStatus::Passed),
            "failed" => Some(TestStatus::Failed),
            "error" => Some(TestStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub id: String,
    pub test_id: String,
    pub credential_id: Option<String>,
    pub status: TestStatus,
    pub manual_status: Option<TestStatus>,
    pub request: Value,
    pub response: Value,
    pub validation_results: Value,
    pub duration_ms: Option<i64>,
    pub executed_at: DateTime<Utc>,
}

impl TestResult {
    /// The manual override when set, else the recorded status
    pub fn effective_status(&self) -> TestStatus {
        self.manual_status.unwrap_or(self.status)
    }
}

#[derive(Debug, Clone)]
pub struct NewTestResult {
    pub test_id: String,
    pub credential_id: Option<String>,
    pub status: TestStatus,
    pub request: Value,
    pub response: Value,
    pub validation_results: Value,
    pub duration_ms: Option<i64>,
    /// Defaults to now
    pub executed_at: Option<DateTime<Utc>>,
}

/// Filters for listing results. `status` matches the effective status.
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    pub environment_id: Option<String>,
    pub test_id: Option<String>,
    pub status: Option<TestStatus>,
}

/// A result joined with the test that produced it
#[derive(Debug, Clone)]
pub struct ResultWithTest {
    pub result: TestResult,
    pub environment_id: String,
    pub test_name: String,
    pub category: Option<String>,
    pub endpoint: String,
    pub method: String,
}

const COLUMNS: &str = "r.id, r.test_id, r.credential_id, r.status, r.manual_status, r.request, \
                       r.response, r.validation_results, r.duration_ms, r.executed_at";

/// Restricts `r` to results under environments owned by the user bound to `?1`
const OWNED_BY_USER: &str = "r.test_id IN (SELECT t.id FROM tests t \
                             JOIN environments e ON e.id = t.environment_id WHERE e.user_id = ?1)";

struct ResultRow {
    id: String,
    test_id: String,
    credential_id: Option<String>,
    status: String,
    manual_status: Option<String>,
    request: String,
    response: String,
    validation_results: String,
    duration_ms: Option<i64>,
    executed_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<ResultRow> {
    Ok(ResultRow {
        id: row.get(0)?,
        test_id: row.get(1)?,
        credential_id: row.get(2)?,
        status: row.get(3)?,
        manual_status: row.get(4)?,
        request: row.get(5)?,
        response: row.get(6)?,
        validation_results: row.get(7)?,
        duration_ms: row.get(8)?,
        executed_at: row.get(9)?,
    })
}

fn parse_status(value: &str) -> Result<TestStatus> {
    TestStatus::parse(value).ok_or_else(|| anyhow!("Unknown result status '{}'", value))
}

impl ResultRow {
    fn into_result(self) -> Result<TestResult> {
        Ok(TestResult {
            status: parse_status(&self.status)?,
            manual_status: self.manual_status.as_deref().map(parse_status).transpose()?,
            request: parse_json(&self.request, "request")?,
            response: parse_json(&self.response, "response")?,
            validation_results: parse_json(&self.validation_results, "validation_results")?,
            executed_at: parse_timestamp(&self.executed_at)?,
            id: self.id,
            test_id: self.test_id,
            credential_id: self.credential_id,
            duration_ms: self.duration_ms,
        })
    }
}

impl Store {
    pub fn insert_result(&self, new: &NewTestResult) -> Result<TestResult> {
        let id = new_id();
        let executed_at = new.executed_at.unwrap_or_else(Utc::now);

        self.conn()?
            .execute(
                r#"
                INSERT INTO test_results (
                    id, test_id, credential_id, status, manual_status,
                    request, response, validation_results, duration_ms, executed_at
                )
                VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    id,
                    new.test_id,
                    new.credential_id,
                    new.status.as_str(),
                    new.request.to_string(),
                    new.response.to_string(),
                    new.validation_results.to_string(),
                    new.duration_ms,
                    timestamp(&executed_at),
                ],
            )
            .context("Failed to insert test result")?;

        self.get_result(&id)?
            .ok_or_else(|| anyhow!("Result {} vanished after insert", id))
    }

    pub fn get_result(&self, id: &str) -> Result<Option<TestResult>> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {} FROM test_results r WHERE r.id = ?1", COLUMNS),
                params![id],
                read_row,
            )
            .optional()
            .context("Failed to query test result")?;

        row.map(ResultRow::into_result).transpose()
    }

    /// Lists a user's results, newest first.
    ///
    /// Returns the requested page and the total number of matching results.
    pub fn list_results(
        &self,
        user_id: &str,
        filter: &ResultFilter,
        page: Option<Page>,
    ) -> Result<(Vec<TestResult>, u64)> {
        let (limit, offset) = limit_offset(page);
        let status = filter.status.map(|s| s.as_str());
        let predicate = format!(
            r#"
            {}
            AND (?2 IS NULL OR r.test_id IN (SELECT id FROM tests WHERE environment_id = ?2))
            AND (?3 IS NULL OR r.test_id = ?3)
            AND (?4 IS NULL OR COALESCE(r.manual_status, r.status) = ?4)
            "#,
            OWNED_BY_USER
        );

        let conn = self.conn()?;
        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM test_results r WHERE {}", predicate),
                params![user_id, filter.environment_id, filter.test_id, status],
                |row| row.get(0),
            )
            .context("Failed to count test results")?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM test_results r WHERE {} \
                 ORDER BY r.executed_at DESC, r.id DESC LIMIT ?5 OFFSET ?6",
                COLUMNS, predicate
            ))
            .context("Failed to prepare query")?;
        let rows = stmt
            .query_map(
                params![user_id, filter.environment_id, filter.test_id, status, limit, offset],
                read_row,
            )
            .context("Failed to execute query")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read test results")?;

        let results = rows
            .into_iter()
            .map(ResultRow::into_result)
            .collect::<Result<Vec<_>>>()?;

        Ok((results, total as u64))
    }

    /// Most recent result of a test, if it ever ran
    pub fn latest_result(&self, test_id: &str) -> Result<Option<TestResult>> {
        let row = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {} FROM test_results r WHERE r.test_id = ?1 \
                     ORDER BY r.executed_at DESC, r.id DESC LIMIT 1",
                    COLUMNS
                ),
                params![test_id],
                read_row,
            )
            .optional()
            .context("Failed to query latest result")?;

        row.map(ResultRow::into_result).transpose()
    }

    /// Sets or clears the manual override
    pub fn set_manual_status(&self, id: &str, status: Option<TestStatus>) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                "UPDATE test_results SET manual_status = ?2 WHERE id = ?1",
                params![id, status.map(|s| s.as_str())],
            )
            .context("Failed to update manual status")?;
        Ok(rows > 0)
    }

    pub fn delete_result(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()?
            .execute("DELETE FROM test_results WHERE id = ?1", params![id])
            .context("Failed to delete test result")?;
        Ok(rows > 0)
    }

    /// Deletes the listed results owned by `user_id` in one transaction.
    ///
    /// Returns the number of rows actually deleted; ids that are missing,
    /// repeated, or owned by someone else count zero.
    pub fn delete_results(&self, user_id: &str, ids: &[String]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let mut deleted = 0;
        {
            let mut stmt = tx
                .prepare(
                    "DELETE FROM test_results WHERE id = ?2 AND test_id IN ( \
                     SELECT t.id FROM tests t \
                     JOIN environments e ON e.id = t.environment_id WHERE e.user_id = ?1)",
                )
                .context("Failed to prepare delete")?;
            for id in ids {
                deleted += stmt
                    .execute(params![user_id, id])
                    .context("Failed to delete test result")?;
            }
        }

        tx.commit().context("Failed to commit bulk delete")?;
        Ok(deleted)
    }

    /// Passed (effective status) results of a user's tests executed since
    /// `since`, newest first, joined with their test.
    pub fn recent_passed_results(
        &self,
        user_id: &str,
        environment_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<ResultWithTest>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                r#"
                SELECT {}, t.environment_id, t.name, t.category, t.endpoint, t.method
                FROM test_results r
                JOIN tests t ON t.id = r.test_id
                JOIN environments e ON e.id = t.environment_id
                WHERE e.user_id = ?1
                  AND (?2 IS NULL OR t.environment_id = ?2)
                  AND COALESCE(r.manual_status, r.status) = 'passed'
                  AND r.executed_at >= ?3
                ORDER BY r.executed_at DESC, r.id DESC
                "#,
                COLUMNS
            ))
            .context("Failed to prepare query")?;

        let rows = stmt
            .query_map(params![user_id, environment_id, timestamp(&since)], |row| {
                Ok((
                    read_row(row)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, String>(11)?,
                    row.get::<_, Option<String>>(12)?,
                    row.get::<_, String>(13)?,
                    row.get::<_, String>(14)?,
                ))
            })
            .context("Failed to execute query")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read test results")?;

        rows.into_iter()
            .map(|(row, environment_id, test_name, category, endpoint, method)| {
                Ok(ResultWithTest {
                    result: row.into_result()?,
                    environment_id,
                    test_name,
                    category,
                    endpoint,
                    method,
                })
            })
            .collect()
    }
}
