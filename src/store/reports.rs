use super::{new_id, parse_json, parse_timestamp, timestamp, Store};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

/// A generated summary over a set of results
#[derive(Debug, Clone, PartialEq)]
pub struct TestReport {
    pub id: String,
    pub user_id: String,
    pub environment_id: Option<String>,
    pub summary: Value,
    pub generated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, user_id, environment_id, summary, generated_at";

fn read_row(row: &Row<'_>) -> rusqlite::Result<(String, String, Option<String>, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_report(
    (id, user_id, environment_id, summary, generated_at): (
        String,
        String,
        Option<String>,
        String,
        String,
    ),
) -> Result<TestReport> {
    Ok(TestReport {
        summary: parse_json(&summary, "summary")?,
        generated_at: parse_timestamp(&generated_at)?,
        id,
        user_id,
        environment_id,
    })
}

impl Store {
    pub fn insert_report(
        &self,
        user_id: &str,
        environment_id: Option<&str>,
        summary: &Value,
    ) -> Result<TestReport> {
        let id = new_id();
        self.conn()?
            .execute(
                &format!(
                    "INSERT INTO test_reports ({}) VALUES (?1, ?2, ?3, ?4, ?5)",
                    COLUMNS
                ),
                params![
                    id,
                    user_id,
                    environment_id,
                    summary.to_string(),
                    timestamp(&Utc::now())
                ],
            )
            .context("Failed to insert report")?;

        self.get_report(&id)?
            .ok_or_else(|| anyhow!("Report {} vanished after insert", id))
    }

    pub fn get_report(&self, id: &str) -> Result<Option<TestReport>> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {} FROM test_reports WHERE id = ?1", COLUMNS),
                params![id],
                read_row,
            )
            .optional()
            .context("Failed to query report")?;

        row.map(into_report).transpose()
    }

    /// Lists a user's reports, newest first
    pub fn list_reports(&self, user_id: &str) -> Result<Vec<TestReport>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM test_reports WHERE user_id = ?1 \
                 ORDER BY generated_at DESC, id DESC",
                COLUMNS
            ))
            .context("Failed to prepare query")?;

        let rows = stmt
            .query_map(params![user_id], read_row)
            .context("Failed to execute query")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read reports")?;

        rows.into_iter().map(into_report).collect()
    }

    pub fn delete_report(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()?
            .execute("DELETE FROM test_reports WHERE id = ?1", params![id])
            .context("Failed to delete report")?;
        Ok(rows > 0)
    }
}
