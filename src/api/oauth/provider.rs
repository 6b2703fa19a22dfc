//! Salesforce login hosts and the authorize URL.

use crate::config::OAuthConfig;
use crate::store::{Environment, EnvironmentType};

/// True when an org should authenticate against the sandbox login host.
///
/// Sandbox and scratch environments always do. Production-typed ones do
/// when the instance URL carries a sandbox marker, since orgs are often
/// registered with the wrong type.
pub fn is_sandbox(env_type: EnvironmentType, instance_url: &str) -> bool {
    if matches!(env_type, EnvironmentType::Sandbox | EnvironmentType::Scratch) {
        return true;
    }

    let host = instance_url
        .split("://")
        .nth(1)
        .unwrap_or(instance_url)
        .split('/')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    host.contains(".sandbox.")
        || host.contains("--")
        || host.contains("test.salesforce.com")
        || has_cs_pod(&host)
}

/// Legacy sandbox pods look like `cs42.salesforce.com`
fn has_cs_pod(host: &str) -> bool {
    host.split('.').any(|label| {
        label.len() > 2
            && label.starts_with("cs")
            && label[2..].chars().all(|c| c.is_ascii_digit())
    })
}

/// Login host base URL for an environment
pub fn login_url<'a>(config: &'a OAuthConfig, env: &Environment) -> &'a str {
    let url = if is_sandbox(env.env_type, &env.instance_url) {
        &config.sandbox_login_url
    } else {
        &config.production_login_url
    };
    url.trim_end_matches('/')
}

pub fn token_url(login_url: &str) -> String {
    format!("{}/services/oauth2/token", login_url)
}

/// Builds the authorization redirect for the Connected App
pub fn build_authorize_url(
    login_url: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
) -> String {
    format!(
        "{}/services/oauth2/authorize?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&prompt={}",
        login_url,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&scopes.join(" ")),
        urlencoding::encode(state),
        urlencoding::encode("login consent"),
    )
}
