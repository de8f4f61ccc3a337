use serde_json::Value;

use super::Error;

/// Checks `arguments` against the parts of a JSON schema that matter for
/// tool inputs: the top-level type, `required` properties, and the
/// primitive `type` of each declared property.
///
/// Anything the checker doesn't understand is accepted, so a `null` or
/// empty schema accepts every input. The tool itself is still expected to
/// reject inputs it can't handle.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), Error> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(ty) = schema.get("type") {
        if !type_matches(ty, arguments) {
            return Err(Error::invalid_input().with_reason(format!(
                "expected arguments of type {ty}, got {}",
                type_name(arguments)
            )));
        }
    }

    let Some(object) = arguments.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let missing: Vec<_> = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|key| !object.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(Error::invalid_input().with_reason(format!(
                "missing required properties: {}",
                missing.join(", ")
            )));
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object)
    {
        for (key, value) in object {
            let Some(ty) = properties.get(key).and_then(|p| p.get("type"))
            else {
                continue;
            };
            if !type_matches(ty, value) {
                return Err(Error::invalid_input().with_reason(format!(
                    "property `{key}` should be of type {ty}, got {}",
                    type_name(value)
                )));
            }
        }
    }

    Ok(())
}

fn type_matches(ty: &Value, value: &Value) -> bool {
    match ty {
        Value::String(name) => single_type_matches(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| single_type_matches(name, value)),
        _ => true,
    }
}

fn single_type_matches(name: &str, value: &Value) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        _ => true,
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
