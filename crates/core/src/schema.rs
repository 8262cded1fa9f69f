//! Typed JSON-schema-subset validation for tool arguments.
//!
//! Supports: object roots with `properties`/`required`, the type tags
//! {string, integer, number, boolean, array, object}, `enum`, numeric
//! `minimum`/`maximum`, string `minLength`/`maxLength`/`pattern`, homogeneous
//! arrays via `items`, and `additional_properties`. Unknown keys are rejected
//! unless the schema opts in.

use regex_lite::Regex;
use serde_json::Value;

/// Validate `args` against `schema`, returning every violation found.
/// An empty vector means the arguments conform.
pub fn validate_args(args: &Value, schema: &Value) -> Vec<String> {
    let root_type = schema.get("type").and_then(Value::as_str).unwrap_or("object");
    if root_type != "object" {
        return vec![format!("schema root must be object, got '{root_type}'")];
    }
    validate_value(args, schema, "")
}

fn validate_value(value: &Value, schema: &Value, path: &str) -> Vec<String> {
    let label = if path.is_empty() { "parameter" } else { path };
    let mut errors = Vec::new();

    if let Some(type_name) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(value, type_name) {
            return vec![format!("{label} should be {type_name}")];
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            errors.push(format!("{label} must be one of {}", render_enum(allowed)));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                errors.push(format!("{label} must be >= {min}"));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                errors.push(format!("{label} must be <= {max}"));
            }
        }
    }

    if let Some(s) = value.as_str() {
        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if (s.chars().count() as u64) < min {
                errors.push(format!("{label} must be at least {min} chars"));
            }
        }
        if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
            if (s.chars().count() as u64) > max {
                errors.push(format!("{label} must be at most {max} chars"));
            }
        }
        if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
            match Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(s) {
                        errors.push(format!("{label} must match pattern {pattern}"));
                    }
                }
                Err(_) => errors.push(format!("{label} has an invalid pattern in its schema")),
            }
        }
    }

    if let Some(obj) = value.as_object() {
        let props = schema.get("properties").and_then(Value::as_object);

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(key) {
                    errors.push(format!("missing required {}", join_path(path, key)));
                }
            }
        }

        let allow_extra = schema
            .get("additional_properties")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        for (key, sub_value) in obj {
            match props.and_then(|p| p.get(key)) {
                Some(sub_schema) => {
                    errors.extend(validate_value(sub_value, sub_schema, &join_path(path, key)));
                }
                None if props.is_some() && !allow_extra => {
                    errors.push(format!("unknown field {}", join_path(path, key)));
                }
                None => {}
            }
        }
    }

    if let (Some(items), Some(arr)) = (schema.get("items"), value.as_array()) {
        for (idx, item) in arr.iter().enumerate() {
            let child = if path.is_empty() {
                format!("[{idx}]")
            } else {
                format!("{path}[{idx}]")
            };
            errors.extend(validate_value(item, items, &child));
        }
    }

    errors
}

fn type_matches(value: &Value, type_name: &str) -> bool {
    match type_name {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => false,
    }
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn render_enum(allowed: &[Value]) -> String {
    let parts: Vec<String> = allowed
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shell_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "minLength": 1 },
                "timeout": { "type": "integer", "minimum": 1, "maximum": 600 }
            },
            "required": ["command"]
        })
    }

    #[test]
    fn conforming_args_pass() {
        let errors = validate_args(&json!({"command": "ls -la", "timeout": 30}), &shell_schema());
        assert!(errors.is_empty(), "unexpected violations: {errors:?}");
    }

    #[test]
    fn missing_required_field() {
        let errors = validate_args(&json!({"timeout": 30}), &shell_schema());
        assert_eq!(errors, vec!["missing required command"]);
    }

    #[test]
    fn wrong_type_reported() {
        let errors = validate_args(&json!({"command": 42}), &shell_schema());
        assert_eq!(errors, vec!["command should be string"]);
    }

    #[test]
    fn numeric_bounds_enforced() {
        let errors = validate_args(&json!({"command": "ls", "timeout": 9000}), &shell_schema());
        assert_eq!(errors, vec!["timeout must be <= 600"]);
    }

    #[test]
    fn unknown_keys_rejected_by_default() {
        let errors = validate_args(&json!({"command": "ls", "verbose": true}), &shell_schema());
        assert_eq!(errors, vec!["unknown field verbose"]);
    }

    #[test]
    fn additional_properties_opt_in() {
        let schema = json!({
            "type": "object",
            "properties": { "command": { "type": "string" } },
            "additional_properties": true
        });
        let errors = validate_args(&json!({"command": "ls", "anything": 1}), &schema);
        assert!(errors.is_empty());
    }

    #[test]
    fn enum_honored() {
        let schema = json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["read", "write", "append", "list"] }
            }
        });
        assert!(validate_args(&json!({"action": "read"}), &schema).is_empty());
        let errors = validate_args(&json!({"action": "delete"}), &schema);
        assert_eq!(errors, vec!["action must be one of [read, write, append, list]"]);
    }

    #[test]
    fn pattern_honored() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "pattern": "^[a-z][a-z0-9_-]*$" }
            }
        });
        assert!(validate_args(&json!({"name": "my-skill"}), &schema).is_empty());
        assert!(!validate_args(&json!({"name": "Not Valid"}), &schema).is_empty());
    }

    #[test]
    fn arrays_validated_per_item() {
        let schema = json!({
            "type": "object",
            "properties": {
                "paths": { "type": "array", "items": { "type": "string" } }
            }
        });
        assert!(validate_args(&json!({"paths": ["a", "b"]}), &schema).is_empty());
        let errors = validate_args(&json!({"paths": ["a", 3]}), &schema);
        assert_eq!(errors, vec!["paths[1] should be string"]);
    }

    #[test]
    fn nested_objects_report_dotted_paths() {
        let schema = json!({
            "type": "object",
            "properties": {
                "options": {
                    "type": "object",
                    "properties": { "depth": { "type": "integer" } },
                    "required": ["depth"]
                }
            }
        });
        let errors = validate_args(&json!({"options": {}}), &schema);
        assert_eq!(errors, vec!["missing required options.depth"]);
    }

    #[test]
    fn non_object_root_rejected() {
        let schema = json!({ "type": "string" });
        let errors = validate_args(&json!("hi"), &schema);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("root must be object"));
    }
}
