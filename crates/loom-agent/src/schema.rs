//! JSON Schema validation port, used for result schemas, structured model
//! output and tool input.

use serde_json::Value;

/// Fails when `schema` does not compile.
pub fn check_schema(schema: &Value) -> Result<(), String> {
    jsonschema::Validator::new(schema)
        .map(|_| ())
        .map_err(|error| error.to_string())
}

/// Every violation of `schema` by `instance`. `Err` when the schema itself is
/// invalid.
pub fn validation_errors(schema: &Value, instance: &Value) -> Result<Vec<String>, String> {
    let validator = jsonschema::Validator::new(schema).map_err(|error| error.to_string())?;
    if validator.is_valid(instance) {
        return Ok(Vec::new());
    }
    Ok(validator
        .iter_errors(instance)
        .map(|error| error.to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validation_errors_reports_each_violation() {
        let schema = json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        });

        assert!(validation_errors(&schema, &json!({"text": "hi"}))
            .expect("valid schema")
            .is_empty());
        assert_eq!(
            validation_errors(&schema, &json!({}))
                .expect("valid schema")
                .len(),
            1
        );
    }

    #[test]
    fn check_schema_rejects_unknown_type() {
        assert!(check_schema(&json!({"type": "object"})).is_ok());
        assert!(check_schema(&json!({"type": "not-a-type"})).is_err());
    }
}
