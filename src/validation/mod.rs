//! Field-level input validation.
//!
//! Handlers collect every problem in a request body before rejecting it, so
//! the caller sees all field errors at once instead of the first one.

use reqwest::Url;
use serde::Serialize;
use std::fmt;

/// A single schema violation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Accumulates field errors for one request
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an error for `field`
    pub fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    /// Requires a non-blank string. Returns the trimmed value when present.
    pub fn required<'a>(&mut self, field: &str, value: Option<&'a str>) -> Option<&'a str> {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Some(v),
            _ => {
                self.error(field, "is required");
                None
            }
        }
    }

    /// Checks character length bounds (inclusive)
    pub fn length(&mut self, field: &str, value: &str, min: usize, max: usize) -> bool {
        let len = value.chars().count();
        if len < min || len > max {
            self.error(
                field,
                format!("must be between {} and {} characters", min, max),
            );
            return false;
        }
        true
    }

    /// Requires `value` to be one of `allowed`
    pub fn one_of(&mut self, field: &str, value: &str, allowed: &[&str]) -> bool {
        if allowed.contains(&value) {
            return true;
        }
        self.error(field, format!("must be one of: {}", allowed.join(", ")));
        false
    }

    /// Requires an absolute http(s) URL. Plain http is accepted only for
    /// loopback hosts.
    pub fn url(&mut self, field: &str, value: &str) -> bool {
        if is_valid_instance_url(value) {
            return true;
        }
        self.error(field, "must be an absolute https:// URL");
        false
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Finishes validation
    pub fn finish(self) -> Result<(), Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Instance URLs must be https, except for loopback hosts used in development.
pub fn is_valid_instance_url(value: &str) -> bool {
    let Ok(url) = Url::parse(value) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    match url.scheme() {
        "https" => true,
        "http" => matches!(host, "localhost" | "127.0.0.1" | "[::1]"),
        _ => false,
    }
}
