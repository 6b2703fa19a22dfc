//! Target Salesforce orgs and their OAuth state.

use super::{new_id, parse_timestamp, timestamp, Store};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Kind of Salesforce org
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentType {
    Production,
    Sandbox,
    Scratch,
}

impl EnvironmentType {
    pub const NAMES: [&'static str; 3] = ["production", "sandbox", "scratch"];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Production => "production",
            EnvironmentType::Sandbox => "sandbox",
            EnvironmentType::Scratch => "scratch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "production" => Some(EnvironmentType::Production),
            "sandbox" => Some(EnvironmentType::Sandbox),
            "scratch" => Some(EnvironmentType::Scratch),
            _ => None,
        }
    }
}

/// OAuth lifecycle of an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthStatus {
    /// No Connected App client id/secret
    Unconfigured,
    /// Client credentials present, never authorized
    Configured,
    /// Access token present and not expired
    Authorized,
    /// Access token expired (or expiry unknown); needs refresh
    Expired,
}

/// A configured target org, with secrets decrypted
#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub env_type: EnvironmentType,
    pub instance_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Environment {
    pub fn has_client_credentials(&self) -> bool {
        self.client_id.as_deref().is_some_and(|v| !v.is_empty())
            && self.client_secret.as_deref().is_some_and(|v| !v.is_empty())
    }

    pub fn oauth_status(&self, now: DateTime<Utc>) -> OAuthStatus {
        if !self.has_client_credentials() {
            return OAuthStatus::Unconfigured;
        }
        match (&self.access_token, self.token_expires_at) {
            (None, _) => OAuthStatus::Configured,
            (Some(_), Some(expires_at)) if expires_at > now => OAuthStatus::Authorized,
            (Some(_), _) => OAuthStatus::Expired,
        }
    }
}

/// Fields accepted when creating an environment
#[derive(Debug, Clone)]
pub struct NewEnvironment {
    pub name: String,
    pub env_type: EnvironmentType,
    pub instance_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Tokens obtained from a code exchange or refresh
#[derive(Debug, Clone)]
pub struct OAuthTokens {
    pub access_token: String,
    /// `None` keeps the stored refresh token (refresh grants don't rotate it)
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    /// Replaces the stored instance URL when the provider reports one
    pub instance_url: Option<String>,
}

const COLUMNS: &str = "id, user_id, name, env_type, instance_url, client_id, client_secret, \
                       access_token, refresh_token, token_expires_at, created_at, updated_at";

struct EnvironmentRow {
    id: String,
    user_id: String,
    name: String,
    env_type: String,
    instance_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_expires_at: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<EnvironmentRow> {
    Ok(EnvironmentRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        env_type: row.get(3)?,
        instance_url: row.get(4)?,
        client_id: row.get(5)?,
        client_secret: row.get(6)?,
        access_token: row.get(7)?,
        refresh_token: row.get(8)?,
        token_expires_at: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl Store {
    fn environment_from_row(&self, row: EnvironmentRow) -> Result<Environment> {
        let env_type = EnvironmentType::parse(&row.env_type)
            .ok_or_else(|| anyhow!("Unknown environment type '{}'", row.env_type))?;

        Ok(Environment {
            client_secret: self.decrypt_opt(row.client_secret, "client_secret")?,
            access_token: self.decrypt_opt(row.access_token, "access_token")?,
            refresh_token: self.decrypt_opt(row.refresh_token, "refresh_token")?,
            token_expires_at: row
                .token_expires_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            env_type,
            instance_url: row.instance_url,
            client_id: row.client_id,
        })
    }

    /// Creates an environment owned by `user_id`.
    ///
    /// The client secret is encrypted before it is written.
    pub fn insert_environment(&self, user_id: &str, new: &NewEnvironment) -> Result<Environment> {
        let now = Utc::now();
        let id = new_id();
        let client_secret = self.encrypt_opt(new.client_secret.as_deref())?;

        self.conn()?
            .execute(
                &format!(
                    "INSERT INTO environments ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL, NULL, ?8, ?8)",
                    COLUMNS
                ),
                params![
                    id,
                    user_id,
                    new.name,
                    new.env_type.as_str(),
                    new.instance_url,
                    new.client_id,
                    client_secret,
                    timestamp(&now),
                ],
            )
            .context("Failed to insert environment")?;

        self.get_environment(&id)?
            .ok_or_else(|| anyhow!("Environment {} vanished after insert", id))
    }

    pub fn get_environment(&self, id: &str) -> Result<Option<Environment>> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {} FROM environments WHERE id = ?1", COLUMNS),
                params![id],
                read_row,
            )
            .optional()
            .context("Failed to query environment")?;

        row.map(|r| self.environment_from_row(r)).transpose()
    }

    /// Lists a user's environments ordered by name
    pub fn list_environments(&self, user_id: &str) -> Result<Vec<Environment>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM environments WHERE user_id = ?1 ORDER BY name",
                    COLUMNS
                ))
                .context("Failed to prepare query")?;
            let rows = stmt
                .query_map(params![user_id], read_row)
                .context("Failed to execute query")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read environments")?;
            rows
        };

        rows.into_iter()
            .map(|r| self.environment_from_row(r))
            .collect()
    }

    /// Writes the editable fields of an environment (not its tokens).
    pub fn update_environment(&self, env: &Environment) -> Result<bool> {
        let client_secret = self.encrypt_opt(env.client_secret.as_deref())?;

        let rows = self
            .conn()?
            .execute(
                r#"
                UPDATE environments SET
                    name = ?2,
                    env_type = ?3,
                    instance_url = ?4,
                    client_id = ?5,
                    client_secret = ?6,
                    updated_at = ?7
                WHERE id = ?1
                "#,
                params![
                    env.id,
                    env.name,
                    env.env_type.as_str(),
                    env.instance_url,
                    env.client_id,
                    client_secret,
                    timestamp(&Utc::now()),
                ],
            )
            .context("Failed to update environment")?;

        Ok(rows > 0)
    }

    /// Deletes an environment and, by cascade, its credentials, tests and results.
    pub fn delete_environment(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()?
            .execute("DELETE FROM environments WHERE id = ?1", params![id])
            .context("Failed to delete environment")?;
        Ok(rows > 0)
    }

    /// Persists tokens from a code exchange or refresh, encrypted.
    ///
    /// Last write wins: concurrent refreshes are not serialized.
    pub fn store_oauth_tokens(&self, id: &str, tokens: &OAuthTokens) -> Result<bool> {
        let access_token = self.encrypt(&tokens.access_token)?;
        let refresh_token = self.encrypt_opt(tokens.refresh_token.as_deref())?;

        let rows = self
            .conn()?
            .execute(
                r#"
                UPDATE environments SET
                    access_token = ?2,
                    refresh_token = COALESCE(?3, refresh_token),
                    token_expires_at = ?4,
                    instance_url = COALESCE(?5, instance_url),
                    updated_at = ?6
                WHERE id = ?1
                "#,
                params![
                    id,
                    access_token,
                    refresh_token,
                    timestamp(&tokens.expires_at),
                    tokens.instance_url,
                    timestamp(&Utc::now()),
                ],
            )
            .context("Failed to store OAuth tokens")?;

        Ok(rows > 0)
    }

    /// Forgets stored access/refresh tokens and expiry
    pub fn clear_oauth_tokens(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                r#"
                UPDATE environments SET
                    access_token = NULL,
                    refresh_token = NULL,
                    token_expires_at = NULL,
                    updated_at = ?2
                WHERE id = ?1
                "#,
                params![id, timestamp(&Utc::now())],
            )
            .context("Failed to clear OAuth tokens")?;
        Ok(rows > 0)
    }
}
