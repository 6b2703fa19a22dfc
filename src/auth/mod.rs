//! Bearer-token authentication.
//!
//! Every API route except the OAuth callback and `/health` resolves the
//! `Authorization: Bearer <token>` header to a [`User`]. User creation is
//! gated by the admin token instead.

use crate::store::{Store, User};
use axum::http::HeaderMap;

#[cfg(test)]
mod tests;

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
/// Returns the token string if present and valid.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

/// Parse bearer token from Authorization header value
fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    // Expect "Bearer <token>"
    let parts: Vec<&str> = header_value.splitn(2, ' ').collect();

    if parts.len() != 2 {
        return Err(TokenError::InvalidFormat);
    }

    if !parts[0].eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = parts[1].trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Token extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum TokenError {
    /// Authorization header not present
    Missing,
    /// Invalid format (not "Bearer <token>")
    InvalidFormat,
    /// Token is empty string
    Empty,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Missing => write!(f, "Authorization token not provided"),
            TokenError::InvalidFormat => write!(f, "Invalid authorization token format"),
            TokenError::Empty => write!(f, "Authorization token is empty"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Authentication errors
#[derive(Debug)]
pub enum AuthError {
    /// Missing or malformed Authorization header
    InvalidToken(TokenError),
    /// Well-formed token that matches no user
    UnknownToken,
    /// Token lookup failed
    Store(anyhow::Error),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidToken(e) => write!(f, "{}", e),
            AuthError::UnknownToken => write!(f, "Invalid authorization token"),
            AuthError::Store(e) => write!(f, "Token lookup failed: {:#}", e),
        }
    }
}

/// Resolves the request's bearer token to a user
pub fn authenticate(headers: &HeaderMap, store: &Store) -> Result<User, AuthError> {
    let token = extract_bearer_token(headers).map_err(AuthError::InvalidToken)?;

    store
        .get_user_by_token(&token)
        .map_err(AuthError::Store)?
        .ok_or(AuthError::UnknownToken)
}

/// Returns true if the bearer token matches the expected admin token.
/// Returns true (no restriction) when `expected` is None.
pub fn is_admin(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };

    match extract_bearer_token(headers) {
        Ok(token) => token == expected,
        Err(_) => false,
    }
}
