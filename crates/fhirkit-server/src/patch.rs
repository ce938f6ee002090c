//! `InstancePatch`/`InstancePatchConditional` support (spec §4.7). Only RFC
//! 6902 JSON Patch bodies are accepted — FHIRPath Patch is not implemented,
//! since neither interaction names it as a required wire format.

use fhirkit_core::error::{CoreError, Result};
use serde_json::Value;

pub fn apply_json_patch(current: &Value, patch_body: &Value) -> Result<Value> {
    let patch: json_patch::Patch = serde_json::from_value(patch_body.clone())
        .map_err(|e| CoreError::parse(format!("invalid JSON Patch document: {e}")))?;
    let mut patched = current.clone();
    json_patch::patch(&mut patched, &patch.0).map_err(|e| CoreError::parse(format!("JSON Patch application failed: {e}")))?;
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replaces_a_field() {
        let current = json!({"resourceType": "Patient", "id": "p1", "active": true});
        let patch_body = json!([{"op": "replace", "path": "/active", "value": false}]);
        let patched = apply_json_patch(&current, &patch_body).unwrap();
        assert_eq!(patched["active"], false);
        assert_eq!(patched["id"], "p1");
    }

    #[test]
    fn adds_a_field() {
        let current = json!({"resourceType": "Patient", "id": "p1"});
        let patch_body = json!([{"op": "add", "path": "/gender", "value": "female"}]);
        let patched = apply_json_patch(&current, &patch_body).unwrap();
        assert_eq!(patched["gender"], "female");
    }

    #[test]
    fn rejects_malformed_patch_document() {
        let current = json!({"resourceType": "Patient", "id": "p1"});
        let patch_body = json!({"not": "an array"});
        assert!(apply_json_patch(&current, &patch_body).is_err());
    }

    #[test]
    fn test_failure_is_rejected() {
        let current = json!({"resourceType": "Patient", "id": "p1", "active": true});
        let patch_body = json!([{"op": "test", "path": "/active", "value": false}]);
        assert!(apply_json_patch(&current, &patch_body).is_err());
    }
}
