//! Structural JSON-shape validation.
//!
//! Validates a value against the subset of JSON Schema that tool parameter
//! schemas and working-memory shapes actually use: `type`, `properties` +
//! `required`, `items`, and `enum`. Unknown keywords are ignored.

use serde_json::Value;

/// Validate `value` against `schema`.
///
/// Returns the first violation as a human-readable path message, suitable
/// for surfacing to the model as an error-shaped result.
pub fn validate(value: &Value, schema: &Value) -> std::result::Result<(), String> {
    validate_at(value, schema, "$")
}

fn validate_at(value: &Value, schema: &Value, path: &str) -> std::result::Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        // A non-object schema constrains nothing.
        return Ok(());
    };

    if let Some(expected) = schema_obj.get("type").and_then(|t| t.as_str()) {
        check_type(value, expected, path)?;
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(|e| e.as_array())
        && !allowed.contains(value)
    {
        return Err(format!("{path}: value is not one of the allowed values"));
    }

    if let Some(props) = schema_obj.get("properties").and_then(|p| p.as_object()) {
        if let Some(obj) = value.as_object() {
            for (key, prop_schema) in props {
                if let Some(child) = obj.get(key) {
                    validate_at(child, prop_schema, &format!("{path}.{key}"))?;
                }
            }
        }
    }

    if let Some(required) = schema_obj.get("required").and_then(|r| r.as_array()) {
        let obj = value.as_object();
        for name in required.iter().filter_map(|n| n.as_str()) {
            let present = obj.is_some_and(|o| o.contains_key(name));
            if !present {
                return Err(format!("{path}: missing required property '{name}'"));
            }
        }
    }

    if let Some(item_schema) = schema_obj.get("items")
        && let Some(items) = value.as_array()
    {
        for (i, item) in items.iter().enumerate() {
            validate_at(item, item_schema, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn check_type(value: &Value, expected: &str, path: &str) -> std::result::Result<(), String> {
    let matches = match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        // Unknown type keyword constrains nothing.
        _ => true,
    };

    if matches {
        Ok(())
    } else {
        Err(format!("{path}: expected {expected}, got {}", type_name(value)))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "age": { "type": "integer" },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["name"]
        })
    }

    #[test]
    fn valid_object_passes() {
        let value = json!({"name": "Ada", "age": 36, "tags": ["math"]});
        assert!(validate(&value, &person_schema()).is_ok());
    }

    #[test]
    fn missing_required_property_fails() {
        let value = json!({"age": 36});
        let err = validate(&value, &person_schema()).unwrap_err();
        assert!(err.contains("name"));
    }

    #[test]
    fn wrong_type_fails_with_path() {
        let value = json!({"name": "Ada", "age": "thirty-six"});
        let err = validate(&value, &person_schema()).unwrap_err();
        assert!(err.contains("$.age"));
        assert!(err.contains("integer"));
    }

    #[test]
    fn array_items_validated() {
        let value = json!({"name": "Ada", "tags": ["ok", 42]});
        let err = validate(&value, &person_schema()).unwrap_err();
        assert!(err.contains("$.tags[1]"));
    }

    #[test]
    fn enum_membership_checked() {
        let schema = json!({"type": "string", "enum": ["low", "high"]});
        assert!(validate(&json!("low"), &schema).is_ok());
        assert!(validate(&json!("medium"), &schema).is_err());
    }

    #[test]
    fn non_object_schema_is_permissive() {
        assert!(validate(&json!({"anything": 1}), &json!(true)).is_ok());
    }

    #[test]
    fn extra_properties_are_allowed() {
        let value = json!({"name": "Ada", "unlisted": true});
        assert!(validate(&value, &person_schema()).is_ok());
    }
}
