//! `{{name}}` placeholder substitution.

use serde_json::Value;
use std::collections::BTreeMap;

/// Replaces every `{{name}}` whose name is in `vars`. Unknown placeholders
/// are left as written so a failed lookup is visible in the snapshot.
pub fn substitute(input: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Substitutes inside every string of a JSON document, keys excluded
pub fn substitute_value(value: &Value, vars: &BTreeMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(substitute(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_value(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("memberId".to_string(), "M-100".to_string());
        vars.insert("dan".to_string(), "DAN-42".to_string());
        vars
    }

    #[test]
    fn test_substitute_known_and_unknown() {
        assert_eq!(
            substitute("/members/{{memberId}}/deposits/{{ dan }}", &vars()),
            "/members/M-100/deposits/DAN-42"
        );
        assert_eq!(substitute("x {{missing}} y", &vars()), "x {{missing}} y");
        assert_eq!(substitute("open {{memberId", &vars()), "open {{memberId");
        assert_eq!(substitute("no placeholders", &vars()), "no placeholders");
    }

    #[test]
    fn test_substitute_value_recurses() {
        let body = json!({
            "member": "{{memberId}}",
            "items": [{"ref": "{{dan}}"}, 3],
            "{{dan}}": true
        });
        let out = substitute_value(&body, &vars());
        assert_eq!(out["member"], "M-100");
        assert_eq!(out["items"][0]["ref"], "DAN-42");
        assert_eq!(out["items"][1], 3);
        assert_eq!(out["{{dan}}"], true);
    }
}
