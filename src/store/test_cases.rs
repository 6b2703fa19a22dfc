//! Test definitions: one HTTP call to issue against an environment.

use super::{limit_offset, new_id, parse_json, parse_timestamp, timestamp, Page, Store};
use crate::runner::rules::ValidationRule;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;
use std::collections::BTreeMap;

/// A stored test, with JSON columns parsed
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub id: String,
    pub environment_id: String,
    pub credential_id: Option<String>,
    pub name: String,
    /// Explicit grouping such as `deposit_creation`
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

/// Fields accepted when creating or replacing a test
#[derive(Debug, Clone)]
pub struct NewTestCase {
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
}

impl From<&TestCase> for NewTestCase {
    fn from(t: &TestCase) -> Self {
        NewTestCase {
            environment_id: t.environment_id.clone(),
            credential_id: t.credential_id.clone(),
            name: t.name.clone(),
            category: t.category.clone(),
            endpoint: t.endpoint.clone(),
            method: t.method.clone(),
            headers: t.headers.clone(),
            body: t.body.clone(),
            expected_status: t.expected_status,
            validations: t.validations.clone(),
        }
    }
}

const COLUMNS: &str = "t.id, t.environment_id, t.credential_id, t.name, t.category, t.endpoint, \
                       t.method, t.headers, t.body, t.expected_status, t.validations, \
                       t.created_at, t.updated_at";

struct TestCaseRow {
    id: String,
    environment_id: String,
    credential_id: Option<String>,
    name: String,
    category: Option<String>,
    endpoint: String,
    method: String,
    headers: String,
    body: Option<String>,
    expected_status: i64,
    validations: String,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<TestCaseRow> {
    Ok(TestCaseRow {
        id: row.get(0)?,
        environment_id: row.get(1)?,
        credential_id: row.get(2)?,
        name: row.get(3)?,
        category: row.get(4)?,
        endpoint: row.get(5)?,
        method: row.get(6)?,
        headers: row.get(7)?,
        body: row.get(8)?,
        expected_status: row.get(9)?,
        validations: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl TestCaseRow {
    fn into_test_case(self) -> Result<TestCase> {
        Ok(TestCase {
            headers: parse_json(&self.headers, "headers")?,
            body: self.body.as_deref().map(|b| parse_json(b, "body")).transpose()?,
            validations: parse_json(&self.validations, "validations")?,
            expected_status: u16::try_from(self.expected_status)
                .with_context(|| format!("Invalid expected_status {}", self.expected_status))?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
            environment_id: self.environment_id,
            credential_id: self.credential_id,
            name: self.name,
            category: self.category,
            endpoint: self.endpoint,
            method: self.method,
        })
    }
}

fn serialized(new: &NewTestCase) -> Result<(String, Option<String>, String)> {
    let headers = serde_json::to_string(&new.headers).context("Failed to serialize headers")?;
    let body = new
        .body
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to serialize body")?;
    let validations =
        serde_json::to_string(&new.validations).context("Failed to serialize validations")?;
    Ok((headers, body, validations))
}

impl Store {
    pub fn insert_test_case(&self, new: &NewTestCase) -> Result<TestCase> {
        let (headers, body, validations) = serialized(new)?;
        let id = new_id();
        let now = timestamp(&Utc::now());

        self.conn()?
            .execute(
                r#"
                INSERT INTO tests (
                    id, environment_id, credential_id, name, category, endpoint, method,
                    headers, body, expected_status, validations, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
                "#,
                params![
                    id,
                    new.environment_id,
                    new.credential_id,
                    new.name,
                    new.category,
                    new.endpoint,
                    new.method,
                    headers,
                    body,
                    new.expected_status,
                    validations,
                    now,
                ],
            )
            .context("Failed to insert test")?;

        self.get_test_case(&id)?
            .ok_or_else(|| anyhow!("Test {} vanished after insert", id))
    }

    pub fn get_test_case(&self, id: &str) -> Result<Option<TestCase>> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {} FROM tests t WHERE t.id = ?1", COLUMNS),
                params![id],
                read_row,
            )
            .optional()
            .context("Failed to query test")?;

        row.map(TestCaseRow::into_test_case).transpose()
    }

    /// Lists tests in environments owned by `user_id`, ordered by name.
    ///
    /// Returns the requested page and the total number of matching tests.
    pub fn list_test_cases(
        &self,
        user_id: &str,
        environment_id: Option<&str>,
        page: Option<Page>,
    ) -> Result<(Vec<TestCase>, u64)> {
        let (limit, offset) = limit_offset(page);
        let conn = self.conn()?;

        let total: i64 = conn
            .query_row(
                r#"
                SELECT COUNT(*) FROM tests t
                JOIN environments e ON e.id = t.environment_id
                WHERE e.user_id = ?1 AND (?2 IS NULL OR t.environment_id = ?2)
                "#,
                params![user_id, environment_id],
                |row| row.get(0),
            )
            .context("Failed to count tests")?;

        let mut stmt = conn
            .prepare(&format!(
                r#"
                SELECT {} FROM tests t
                JOIN environments e ON e.id = t.environment_id
                WHERE e.user_id = ?1 AND (?2 IS NULL OR t.environment_id = ?2)
                ORDER BY t.name, t.id
                LIMIT ?3 OFFSET ?4
                "#,
                COLUMNS
            ))
            .context("Failed to prepare query")?;
        let rows = stmt
            .query_map(params![user_id, environment_id, limit, offset], read_row)
            .context("Failed to execute query")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read tests")?;

        let tests = rows
            .into_iter()
            .map(TestCaseRow::into_test_case)
            .collect::<Result<Vec<_>>>()?;

        Ok((tests, total as u64))
    }

    pub fn update_test_case(&self, id: &str, new: &NewTestCase) -> Result<bool> {
        let (headers, body, validations) = serialized(new)?;

        let rows = self
            .conn()?
            .execute(
                r#"
                UPDATE tests SET
                    environment_id = ?2,
                    credential_id = ?3,
                    name = ?4,
                    category = ?5,
                    endpoint = ?6,
                    method = ?7,
                    headers = ?8,
                    body = ?9,
                    expected_status = ?10,
                    validations = ?11,
                    updated_at = ?12
                WHERE id = ?1
                "#,
                params![
                    id,
                    new.environment_id,
                    new.credential_id,
                    new.name,
                    new.category,
                    new.endpoint,
                    new.method,
                    headers,
                    body,
                    new.expected_status,
                    validations,
                    timestamp(&Utc::now()),
                ],
            )
            .context("Failed to update test")?;

        Ok(rows > 0)
    }

    /// Deletes a test and, by cascade, its results
    pub fn delete_test_case(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()?
            .execute("DELETE FROM tests WHERE id = ?1", params![id])
            .context("Failed to delete test")?;
        Ok(rows > 0)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures;
    use crate::store::{is_unique_violation, testing, Page};

    #[test]
    fn test_insert_parses_json_columns() {
        let store = testing::store();
        let (_, env_id) = fixtures::environment(&store);

        let created = store
            .insert_test_case(&fixtures::test_case(&env_id, "Create deposit"))
            .unwrap();
        let fetched = store.get_test_case(&created.id).unwrap().unwrap();

        assert_eq!(fetched.headers["Content-Type"], "application/json");
        assert_eq!(fetched.body.unwrap()["deposit_amount"], 1200);
        assert_eq!(fetched.validations.len(), 1);
        assert_eq!(fetched.expected_status, 201);
    }

    #[test]
    fn test_duplicate_name_in_environment() {
        let store = testing::store();
        let (_, env_id) = fixtures::environment(&store);
        store
            .insert_test_case(&fixtures::test_case(&env_id, "Create deposit"))
            .unwrap();
        let err = store
            .insert_test_case(&fixtures::test_case(&env_id, "Create deposit"))
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn test_list_paginates_with_total() {
        let store = testing::store();
        let (user_id, env_id) = fixtures::environment(&store);
        for i in 0..7 {
            store
                .insert_test_case(&fixtures::test_case(&env_id, &format!("t{}", i)))
                .unwrap();
        }

        let (page, total) = store
            .list_test_cases(&user_id, Some(&env_id), Some(Page { limit: 3, offset: 3 }))
            .unwrap();
        assert_eq!(total, 7);
        let names: Vec<_> = page.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["t3", "t4", "t5"]);

        let (all, _) = store.list_test_cases(&user_id, None, None).unwrap();
        assert_eq!(all.len(), 7);

        let (none, total) = store.list_test_cases("someone-else", None, None).unwrap();
        assert!(none.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn test_update_and_delete() {
        let store = testing::store();
        let (_, env_id) = fixtures::environment(&store);
        let created = store
            .insert_test_case(&fixtures::test_case(&env_id, "Create deposit"))
            .unwrap();

        let mut update = super::NewTestCase::from(&created);
        update.method = "PUT".to_string();
        update.body = None;
        assert!(store.update_test_case(&created.id, &update).unwrap());

        let fetched = store.get_test_case(&created.id).unwrap().unwrap();
        assert_eq!(fetched.method, "PUT");
        assert!(fetched.body.is_none());

        assert!(store.delete_test_case(&created.id).unwrap());
        assert!(store.get_test_case(&created.id).unwrap().is_none());
    }
}
