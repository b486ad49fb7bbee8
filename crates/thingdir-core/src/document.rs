//! Directory documents
//!
//! A document is an arbitrary JSON object, usually a Thing Description.
//! The directory does not validate its content.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::DirError;

/// A stored document: a JSON object with no enforced schema
pub type Document = Map<String, Value>;

/// All documents keyed by ID, ordered by ID
///
/// Every value is a `Value::Object`.
pub type Collection = BTreeMap<String, Value>;

/// Check that a document ID is usable
pub fn validate_id(id: &str) -> Result<(), DirError> {
    if id.is_empty() {
        return Err(DirError::BadRequest("document ID must not be empty".into()));
    }
    Ok(())
}

/// Generate a fresh document ID of the form `urn:uuid:<v4>`
pub fn new_id() -> String {
    format!("urn:uuid:{}", Uuid::new_v4())
}

/// The document's own `id` field, if it is a non-empty string
pub fn id_of(doc: &Document) -> Option<&str> {
    doc.get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// Parse a JSON payload into a document
///
/// Fails with `BadRequest` when the payload is not valid JSON or not an object.
pub fn from_slice(bytes: &[u8]) -> Result<Document, DirError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| DirError::BadRequest(format!("invalid JSON payload: {}", e)))?;
    match value {
        Value::Object(doc) => Ok(doc),
        other => Err(DirError::BadRequest(format!(
            "document must be a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

/// Merge `patch` into `target`
///
/// - Keys present in `patch` overwrite the same keys in `target`
/// - If both values are objects they are merged key by key
/// - Arrays, scalars and `null` replace the target value wholesale
pub fn merge_patch(target: &mut Document, patch: &Document) {
    for (key, patch_value) in patch {
        match (target.get_mut(key), patch_value) {
            (Some(Value::Object(target_obj)), Value::Object(patch_obj)) => {
                merge_patch(target_obj, patch_obj);
            }
            _ => {
                target.insert(key.clone(), patch_value.clone());
            }
        }
    }
}

/// Name of a JSON value type, for error messages
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
