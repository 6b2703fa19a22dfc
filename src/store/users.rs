//! Registered users and their bearer tokens.

use super::{new_id, parse_timestamp, timestamp, Store};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use rusqlite::{params, OptionalExtension};

/// Length of generated bearer tokens
const TOKEN_LEN: usize = 40;

/// A user owning environments and reports
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    /// Unique, 3-32 chars, [a-z0-9-_]
    pub name: String,
    /// Bearer token for API access
    pub token: String,
    pub created_at: DateTime<Utc>,
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

impl Store {
    /// Creates a user with a freshly generated token.
    ///
    /// Fails with a unique violation if the name is taken.
    pub fn create_user(&self, name: &str) -> Result<User> {
        let user = User {
            id: new_id(),
            name: name.to_string(),
            token: generate_token(),
            created_at: Utc::now(),
        };

        self.conn()?
            .execute(
                "INSERT INTO users (id, name, token, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![user.id, user.name, user.token, timestamp(&user.created_at)],
            )
            .context("Failed to insert user")?;

        Ok(user)
    }

    /// Looks up the user owning a bearer token
    pub fn get_user_by_token(&self, token: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, name, token, created_at FROM users WHERE token = ?1",
                params![token],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query user by token")?;

        row.map(|(id, name, token, created_at)| {
            Ok(User {
                id,
                name,
                token,
                created_at: parse_timestamp(&created_at)?,
            })
        })
        .transpose()
    }
}
