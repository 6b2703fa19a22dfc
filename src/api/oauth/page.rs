//! Popup page rendered by the OAuth callback.
//!
//! The page hands the outcome to the window that opened the popup via
//! `postMessage`, restricted to the application origin, and closes itself.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

pub const MESSAGE_TYPE: &str = "salesforce-oauth";

pub fn success_message(token: &str, expires_at: DateTime<Utc>) -> Value {
    json!({
        "type": MESSAGE_TYPE,
        "success": true,
        "token": token,
        "expiresAt": expires_at,
    })
}

pub fn failure_message(error: &str) -> Value {
    json!({
        "type": MESSAGE_TYPE,
        "success": false,
        "error": error,
    })
}

/// JSON embedded in a `<script>` must not be able to close the tag
fn script_json(value: &Value) -> String {
    value
        .to_string()
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

pub fn render(message: &Value, target_origin: &str) -> String {
    let title = if message["success"].as_bool().unwrap_or(false) {
        "Salesforce connected"
    } else {
        "Salesforce connection failed"
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body>
<p>{title}. You can close this window.</p>
<script>
(function () {{
  var message = {message};
  if (window.opener) {{
    window.opener.postMessage(message, {origin});
  }}
  window.close();
}})();
</script>
</body>
</html>
"#,
        title = title,
        message = script_json(message),
        origin = script_json(&Value::String(target_origin.to_string())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_page() {
        let expires_at = Utc::now();
        let html = render(&success_message("tok", expires_at), "http://localhost:3000");

        assert!(html.contains(r#""type":"salesforce-oauth""#));
        assert!(html.contains(r#""success":true"#));
        assert!(html.contains(r#""token":"tok""#));
        assert!(html.contains(r#"postMessage(message, "http://localhost:3000")"#));
        assert!(html.contains("window.close()"));
    }

    #[test]
    fn test_failure_page_escapes_script() {
        let html = render(
            &failure_message("</script><script>alert(1)</script>"),
            "http://localhost:3000",
        );

        assert!(html.contains(r#""success":false"#));
        assert!(!html.contains("</script><script>alert"));
        assert!(html.contains("\\u003c/script\\u003e"));
    }
}
