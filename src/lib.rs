// Configuration (TOML file + environment overrides)
pub mod config;

// Encryption of secrets at rest
pub mod crypto;

// SQLite persistence
pub mod store;

// Bearer token authentication
pub mod auth;

// Field-level request validation
pub mod validation;

// Test execution against Salesforce
pub mod runner;

// Deposit values recovered from earlier results
pub mod deposits;

// HTTP API and OAuth flow
pub mod api;
