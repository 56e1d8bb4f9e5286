//! Action parameter validation

use super::Action;
use crate::error::SchemaError;
use serde_json::{Map, Value};

/// Check `params` against the JSON Schema declared by `action`
pub fn validate(action: &dyn Action, params: &Map<String, Value>) -> Result<(), SchemaError> {
    let schema = action.schema();
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| SchemaError::new(action.name(), format!("bad parameter schema: {}", e)))?;

    let instance = Value::Object(params.clone());
    let problems: Vec<String> = validator
        .iter_errors(&instance)
        .map(|error| {
            let path = error.instance_path().to_string();
            if path.is_empty() {
                error.to_string()
            } else {
                format!("{}: {}", path, error)
            }
        })
        .collect();

    if problems.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::new(action.name(), problems.join("; ")))
    }
}
