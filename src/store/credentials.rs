//! API credentials used when executing tests against an environment.

use super::{new_id, parse_timestamp, timestamp, Store};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// How a credential authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    #[serde(rename = "apikey")]
    ApiKey,
    #[serde(rename = "oauth2")]
    OAuth2,
}

impl AuthType {
    pub const NAMES: [&'static str; 2] = ["apikey", "oauth2"];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::ApiKey => "apikey",
            AuthType::OAuth2 => "oauth2",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "apikey" => Some(AuthType::ApiKey),
            "oauth2" => Some(AuthType::OAuth2),
            _ => None,
        }
    }
}

/// A credential, with secrets decrypted.
///
/// `api_key` is only populated for `ApiKey`; `client_id`/`client_secret`
/// only for `OAuth2`.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub id: String,
    pub environment_id: String,
    pub auth_type: AuthType,
    pub org_name: String,
    pub member_id: Option<String>,
    pub branch_id: Option<String>,
    pub api_key: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating or replacing a credential
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub environment_id: String,
    pub auth_type: AuthType,
    pub org_name: String,
    pub member_id: Option<String>,
    pub branch_id: Option<String>,
    pub api_key: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl NewCredential {
    /// Drops the secret fields that don't belong to the auth type
    fn normalized(&self) -> NewCredential {
        let mut c = self.clone();
        match c.auth_type {
            AuthType::ApiKey => {
                c.client_id = None;
                c.client_secret = None;
            }
            AuthType::OAuth2 => {
                c.api_key = None;
            }
        }
        c
    }
}

const COLUMNS: &str = "c.id, c.environment_id, c.auth_type, c.org_name, c.member_id, c.branch_id, \
                       c.api_key, c.client_id, c.client_secret, c.created_at, c.updated_at";

struct CredentialRow {
    id: String,
    environment_id: String,
    auth_type: String,
    org_name: String,
    member_id: Option<String>,
    branch_id: Option<String>,
    api_key: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<CredentialRow> {
    Ok(CredentialRow {
        id: row.get(0)?,
        environment_id: row.get(1)?,
        auth_type: row.get(2)?,
        org_name: row.get(3)?,
        member_id: row.get(4)?,
        branch_id: row.get(5)?,
        api_key: row.get(6)?,
        client_id: row.get(7)?,
        client_secret: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl Store {
    fn credential_from_row(&self, row: CredentialRow) -> Result<Credential> {
        let auth_type = AuthType::parse(&row.auth_type)
            .ok_or_else(|| anyhow!("Unknown auth type '{}'", row.auth_type))?;

        Ok(Credential {
            api_key: self.decrypt_opt(row.api_key, "api_key")?,
            client_secret: self.decrypt_opt(row.client_secret, "client_secret")?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            id: row.id,
            environment_id: row.environment_id,
            auth_type,
            org_name: row.org_name,
            member_id: row.member_id,
            branch_id: row.branch_id,
            client_id: row.client_id,
        })
    }

    pub fn insert_credential(&self, new: &NewCredential) -> Result<Credential> {
        let new = new.normalized();
        let id = new_id();
        let now = timestamp(&Utc::now());
        let api_key = self.encrypt_opt(new.api_key.as_deref())?;
        let client_secret = self.encrypt_opt(new.client_secret.as_deref())?;

        self.conn()?
            .execute(
                r#"
                INSERT INTO credentials (
                    id, environment_id, auth_type, org_name, member_id, branch_id,
                    api_key, client_id, client_secret, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                "#,
                params![
                    id,
                    new.environment_id,
                    new.auth_type.as_str(),
                    new.org_name,
                    new.member_id,
                    new.branch_id,
                    api_key,
                    new.client_id,
                    client_secret,
                    now,
                ],
            )
            .context("Failed to insert credential")?;

        self.get_credential(&id)?
            .ok_or_else(|| anyhow!("Credential {} vanished after insert", id))
    }

    pub fn get_credential(&self, id: &str) -> Result<Option<Credential>> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {} FROM credentials c WHERE c.id = ?1", COLUMNS),
                params![id],
                read_row,
            )
            .optional()
            .context("Failed to query credential")?;

        row.map(|r| self.credential_from_row(r)).transpose()
    }

    /// Lists credentials in environments owned by `user_id`, optionally
    /// narrowed to one environment.
    pub fn list_credentials(
        &self,
        user_id: &str,
        environment_id: Option<&str>,
    ) -> Result<Vec<Credential>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare(&format!(
                    r#"
                    SELECT {} FROM credentials c
                    JOIN environments e ON e.id = c.environment_id
                    WHERE e.user_id = ?1 AND (?2 IS NULL OR c.environment_id = ?2)
                    ORDER BY c.org_name, c.created_at
                    "#,
                    COLUMNS
                ))
                .context("Failed to prepare query")?;
            let rows = stmt
                .query_map(params![user_id, environment_id], read_row)
                .context("Failed to execute query")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read credentials")?;
            rows
        };

        rows.into_iter()
            .map(|r| self.credential_from_row(r))
            .collect()
    }

    /// Replaces a credential's fields
    pub fn update_credential(&self, id: &str, new: &NewCredential) -> Result<bool> {
        let new = new.normalized();
        let api_key = self.encrypt_opt(new.api_key.as_deref())?;
        let client_secret = self.encrypt_opt(new.client_secret.as_deref())?;

        let rows = self
            .conn()?
            .execute(
                r#"
                UPDATE credentials SET
                    environment_id = ?2,
                    auth_type = ?3,
                    org_name = ?4,
                    member_id = ?5,
                    branch_id = ?6,
                    api_key = ?7,
                    client_id = ?8,
                    client_secret = ?9,
                    updated_at = ?10
                WHERE id = ?1
                "#,
                params![
                    id,
                    new.environment_id,
                    new.auth_type.as_str(),
                    new.org_name,
                    new.member_id,
                    new.branch_id,
                    api_key,
                    new.client_id,
                    client_secret,
                    timestamp(&Utc::now()),
                ],
            )
            .context("Failed to update credential")?;

        Ok(rows > 0)
    }

    pub fn delete_credential(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()?
            .execute("DELETE FROM credentials WHERE id = ?1", params![id])
            .context("Failed to delete credential")?;
        Ok(rows > 0)
    }
}

impl From<&Credential> for NewCredential {
    fn from(c: &Credential) -> Self {
        NewCredential {
            environment_id: c.environment_id.clone(),
            auth_type: c.auth_type,
            org_name: c.org_name.clone(),
            member_id: c.member_id.clone(),
            branch_id: c.branch_id.clone(),
            api_key: c.api_key.clone(),
            client_id: c.client_id.clone(),
            client_secret: c.client_secret.clone(),
        }
    }
}
