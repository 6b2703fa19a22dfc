//! Token endpoint calls: authorization code and refresh token grants.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// Salesforce token response. Salesforce omits `expires_in`; the lifetime
/// is configured instead.
#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub instance_url: Option<String>,
}

/// Exchange an authorization code for tokens
pub async fn exchange_code(
    http: &reqwest::Client,
    token_url: &str,
    code: &str,
    redirect_uri: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenResponse> {
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", client_id),
        ("client_secret", client_secret),
    ];
    request_token(http, token_url, &form).await
}

/// Exchange a refresh token for a new access token
pub async fn refresh_access_token(
    http: &reqwest::Client,
    token_url: &str,
    refresh_token: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenResponse> {
    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", client_id),
        ("client_secret", client_secret),
    ];
    request_token(http, token_url, &form).await
}

async fn request_token(
    http: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse> {
    tracing::debug!(token_url = %token_url, grant_type = form[0].1, "Requesting token");

    let response = http
        .post(token_url)
        .header("Accept", "application/json")
        .form(form)
        .send()
        .await
        .context("Failed to reach token endpoint")?;

    let status = response.status();
    let body = response
        .text()
        .await
        .context("Failed to read token response")?;

    if !status.is_success() {
        return Err(anyhow!(upstream_message(&body).unwrap_or_else(|| {
            format!("Token request failed with status {}", status)
        })));
    }

    serde_json::from_str(&body).context("Failed to parse token response")
}

/// The provider's own explanation of a failed grant
fn upstream_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error_description", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|msg| !msg.is_empty())
        .map(str::to_string)
}
