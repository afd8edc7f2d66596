//! Data-driven argument validation: a small JSON-schema walk covering the
//! subset the built-in tools use (object/required/type/enum/array items).

use serde_json::Value;

/// Validates `args` against `schema`. Returns the first violation found.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    validate_value(schema, args, "$")
}

fn validate_value(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{}: value not in enum", path));
        }
        return Ok(());
    }
    let Some(expected) = schema.get("type").and_then(Value::as_str) else {
        return Ok(());
    };
    match expected {
        "object" => {
            let Some(obj) = value.as_object() else {
                return Err(format!("{}: expected object", path));
            };
            if let Some(required) = schema.get("required").and_then(Value::as_array) {
                for name in required.iter().filter_map(Value::as_str) {
                    if !obj.contains_key(name) {
                        return Err(format!("{}: missing required field '{}'", path, name));
                    }
                }
            }
            if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                for (name, prop_schema) in props {
                    if let Some(v) = obj.get(name) {
                        validate_value(prop_schema, v, &format!("{}.{}", path, name))?;
                    }
                }
            }
            Ok(())
        }
        "array" => {
            let Some(items) = value.as_array() else {
                return Err(format!("{}: expected array", path));
            };
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_value(item_schema, item, &format!("{}[{}]", path, i))?;
                }
            }
            Ok(())
        }
        "string" => value
            .is_string()
            .then_some(())
            .ok_or_else(|| format!("{}: expected string", path)),
        "integer" => value
            .as_i64()
            .map(|_| ())
            .ok_or_else(|| format!("{}: expected integer", path)),
        "number" => value
            .is_number()
            .then_some(())
            .ok_or_else(|| format!("{}: expected number", path)),
        "boolean" => value
            .is_boolean()
            .then_some(())
            .ok_or_else(|| format!("{}: expected boolean", path)),
        _ => Ok(()),
    }
}

/// String field accessor used by every tool.
pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, super::ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| super::ToolError::InvalidArguments(format!("missing '{}'", key)))
}

pub fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub fn optional_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "include_hidden": {"type": "boolean"},
                "depth": {"type": "integer"},
                "mode": {"enum": ["fast", "full"]},
                "targets": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["path"]
        })
    }

    #[test]
    fn accepts_valid_arguments() {
        let args = json!({"path": "/", "include_hidden": true, "targets": ["a", "b"]});
        assert!(validate_args(&sample_schema(), &args).is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        let err = validate_args(&sample_schema(), &json!({})).unwrap_err();
        assert!(err.contains("path"));
    }

    #[test]
    fn rejects_wrong_types_and_enum() {
        assert!(validate_args(&sample_schema(), &json!({"path": 5})).is_err());
        assert!(validate_args(&sample_schema(), &json!({"path": "/", "depth": "x"})).is_err());
        assert!(validate_args(&sample_schema(), &json!({"path": "/", "mode": "slow"})).is_err());
        assert!(
            validate_args(&sample_schema(), &json!({"path": "/", "targets": ["a", 3]})).is_err()
        );
    }
}
