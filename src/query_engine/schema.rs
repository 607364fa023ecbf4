//! Validation of JSONQL documents against the JSON Schema subset the command
//! schemas use: `type`, `const`, `enum`, `properties`, `required`,
//! `additionalProperties`, `items`, `minItems`, `minLength` and `anyOf`.

use serde_json::Value;

use crate::common::error::{JsonQlException, Result};

/// Fails with every violation of `schema` found in `instance`.
pub fn check(schema: &Value, instance: &Value) -> Result<()> {
    let violations = validate(schema, instance);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(JsonQlException::new(violations).into())
    }
}

pub fn validate(schema: &Value, instance: &Value) -> Vec<String> {
    let mut violations = Vec::new();
    validate_at(schema, instance, "$", &mut violations);
    violations
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(number) if number.is_i64() || number.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn has_type(instance: &Value, expected: &str) -> bool {
    let actual = type_name(instance);
    actual == expected || (expected == "number" && actual == "integer")
}

fn validate_at(schema: &Value, instance: &Value, path: &str, violations: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type") {
        let matches = match expected {
            Value::String(name) => has_type(instance, name),
            Value::Array(names) => names
                .iter()
                .filter_map(Value::as_str)
                .any(|name| has_type(instance, name)),
            _ => true,
        };
        if !matches {
            violations.push(format!(
                "{path}: expected {}, got {}",
                render_type(expected),
                type_name(instance)
            ));
            // Nothing below makes sense for the wrong type
            return;
        }
    }

    if let Some(constant) = schema.get("const") {
        if instance != constant {
            violations.push(format!("{path}: expected {constant}, got {instance}"));
        }
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(instance) {
            let allowed: Vec<String> = allowed.iter().map(Value::to_string).collect();
            violations.push(format!(
                "{path}: {instance} is not one of [{}]",
                allowed.join(", ")
            ));
        }
    }

    if let Some(Value::Array(options)) = schema.get("anyOf") {
        let any_valid = options.iter().any(|option| {
            let mut scratch = Vec::new();
            validate_at(option, instance, path, &mut scratch);
            scratch.is_empty()
        });
        if !any_valid {
            violations.push(format!("{path}: {instance} matches none of the allowed forms"));
        }
    }

    if let (Some(min), Value::String(string)) = (schema.get("minLength").and_then(Value::as_u64), instance) {
        if (string.chars().count() as u64) < min {
            violations.push(format!("{path}: string shorter than {min}"));
        }
    }

    if let Value::Array(items) = instance {
        if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                violations.push(format!("{path}: expected at least {min} items, got {}", items.len()));
            }
        }
        if let Some(item_schema) = schema.get("items") {
            for (index, item) in items.iter().enumerate() {
                validate_at(item_schema, item, &format!("{path}[{index}]"), violations);
            }
        }
    }

    if let Value::Object(object) = instance {
        let properties = schema.get("properties").and_then(Value::as_object);

        if let Some(Value::Array(required)) = schema.get("required") {
            for name in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(name) {
                    violations.push(format!("{path}: missing required property {name:?}"));
                }
            }
        }

        for (name, value) in object {
            let child = format!("{path}.{name}");
            match (properties.and_then(|props| props.get(name)), schema.get("additionalProperties")) {
                (Some(property_schema), _) => validate_at(property_schema, value, &child, violations),
                (None, Some(Value::Bool(false))) => {
                    violations.push(format!("{path}: unexpected property {name:?}"))
                }
                (None, Some(additional @ Value::Object(_))) => {
                    validate_at(additional, value, &child, violations)
                }
                (None, _) => {}
            }
        }
    }
}

fn render_type(expected: &Value) -> String {
    match expected {
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.as_str().unwrap_or("?").to_owned(),
    }
}
