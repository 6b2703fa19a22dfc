use anyhow::{Context, Result};
use serde::Deserialize;

/// Environment variable holding the secret that the encryption key is derived from
pub const ENCRYPTION_SECRET_VAR: &str = "SFBENCH_ENCRYPTION_SECRET";

/// Environment variable pointing at an optional TOML config file
pub const CONFIG_PATH_VAR: &str = "SFBENCH_CONFIG";

/// Complete sfbench configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Public base URL of the application. Used for the OAuth redirect URI,
    /// the popup postMessage target origin, and CORS.
    #[serde(default = "default_app_url")]
    pub app_url: String,
    /// Token required to register users. Registration is open when unset.
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_app_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            app_url: default_app_url(),
            admin_token: None,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "sfbench.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Salesforce OAuth configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_production_login_url")]
    pub production_login_url: String,
    #[serde(default = "default_sandbox_login_url")]
    pub sandbox_login_url: String,
    /// How long an authorize state token stays valid
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: i64,
    /// Access token lifetime recorded after a code exchange or refresh.
    /// Salesforce does not report `expires_in`, so this is fixed.
    #[serde(default = "default_token_lifetime")]
    pub token_lifetime_seconds: i64,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_production_login_url() -> String {
    "https://login.salesforce.com".to_string()
}

fn default_sandbox_login_url() -> String {
    "https://test.salesforce.com".to_string()
}

fn default_state_ttl() -> i64 {
    600
}

fn default_token_lifetime() -> i64 {
    7200
}

fn default_scopes() -> Vec<String> {
    vec!["api".to_string(), "refresh_token".to_string()]
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            production_login_url: default_production_login_url(),
            sandbox_login_url: default_sandbox_login_url(),
            state_ttl_seconds: default_state_ttl(),
            token_lifetime_seconds: default_token_lifetime(),
            scopes: default_scopes(),
        }
    }
}

/// Test execution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_runner_timeout")]
    pub timeout_seconds: u64,
}

fn default_runner_timeout() -> u64 {
    30
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_runner_timeout(),
        }
    }
}

/// API limits
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
    /// Recency window for the derived deposit queries
    #[serde(default = "default_deposit_lookback")]
    pub deposit_lookback_days: i64,
}

fn default_page_size() -> u32 {
    50
}

fn default_max_page_size() -> u32 {
    500
}

fn default_deposit_lookback() -> i64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            deposit_lookback_days: default_deposit_lookback(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from `SFBENCH_CONFIG` (if set), then applies
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => load_config(&path)?,
            Err(_) => AppConfig::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Overrides file values with `SFBENCH_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SFBENCH_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Ok(v) = std::env::var("SFBENCH_APP_URL") {
            self.server.app_url = v;
        }
        if let Ok(v) = std::env::var("SFBENCH_ADMIN_TOKEN") {
            if !v.is_empty() {
                self.server.admin_token = Some(v);
            }
        }
        if let Ok(v) = std::env::var("SFBENCH_DB_PATH") {
            self.database.path = v;
        }
    }

    /// Application URL without a trailing slash
    pub fn app_url(&self) -> &str {
        self.server.app_url.trim_end_matches('/')
    }

    /// Fixed OAuth redirect URI registered on the Connected App
    pub fn redirect_uri(&self) -> String {
        format!("{}/api/oauth/callback", self.app_url())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: AppConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.database.path, "sfbench.db");
        assert_eq!(config.oauth.production_login_url, "https://login.salesforce.com");
        assert_eq!(config.oauth.sandbox_login_url, "https://test.salesforce.com");
        assert_eq!(config.oauth.token_lifetime_seconds, 7200);
        assert_eq!(config.api.max_page_size, 500);
        assert_eq!(config.api.deposit_lookback_days, 30);
        assert!(config.server.admin_token.is_none());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:8080"
            app_url = "https://bench.example.com/"
            admin_token = "admin"

            [database]
            path = "/var/lib/sfbench/data.db"

            [oauth]
            state_ttl_seconds = 120
            scopes = ["api", "refresh_token", "offline_access"]

            [runner]
            timeout_seconds = 5

            [api]
            max_page_size = 200
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.server.admin_token.as_deref(), Some("admin"));
        assert_eq!(config.database.path, "/var/lib/sfbench/data.db");
        assert_eq!(config.oauth.state_ttl_seconds, 120);
        assert_eq!(config.oauth.scopes.len(), 3);
        assert_eq!(config.runner.timeout_seconds, 5);
        assert_eq!(config.api.max_page_size, 200);
        assert_eq!(config.api.default_page_size, 50);
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [runner]
            timeout_seconds = 3
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.runner.timeout_seconds, 3);
        assert_eq!(config.oauth.state_ttl_seconds, 600); // Default
        assert_eq!(config.server.app_url, "http://localhost:3000"); // Default
    }

    #[test]
    fn test_redirect_uri_strips_trailing_slash() {
        let mut config = AppConfig::default();
        config.server.app_url = "https://bench.example.com/".to_string();
        assert_eq!(config.app_url(), "https://bench.example.com");
        assert_eq!(
            config.redirect_uri(),
            "https://bench.example.com/api/oauth/callback"
        );
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[database]\npath = \"from-file.db\"").unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.database.path, "from-file.db");
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config("/nonexistent/sfbench.toml").is_err());
    }
}
