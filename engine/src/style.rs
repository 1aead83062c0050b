//! FILENAME: engine/src/style.rs
//! PURPOSE: Applies style patches to a cell's opaque style value.
//! CONTEXT: The core reads no fields from a cell's style — it is carried as
//! an opaque JSON value on behalf of whatever layer does interpret it (a UI,
//! a renderer). This module's only job is merging a patch onto whatever is
//! already stored.

use serde_json::Value as JsonValue;

/// An opaque style patch. The core never inspects its contents, only
/// merges it onto a cell's existing style.
pub type StylePatch = JsonValue;

/// Applies `patch` onto `existing`, shallow-merging object keys. If
/// `existing` is `None` or not a JSON object, `patch` replaces it outright.
pub fn apply_patch(existing: Option<JsonValue>, patch: StylePatch) -> JsonValue {
    match existing {
        Some(JsonValue::Object(mut base)) => {
            if let JsonValue::Object(patch_obj) = patch {
                for (key, value) in patch_obj {
                    base.insert(key, value);
                }
                JsonValue::Object(base)
            } else {
                patch
            }
        }
        _ => patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patch_with_no_existing_style_installs_verbatim() {
        let result = apply_patch(None, json!({"bold": true}));
        assert_eq!(result, json!({"bold": true}));
    }

    #[test]
    fn test_patch_shallow_merges_onto_existing_object() {
        let existing = json!({"bold": true, "color": "red"});
        let patch = json!({"color": "blue", "italic": true});
        let result = apply_patch(Some(existing), patch);
        assert_eq!(result, json!({"bold": true, "color": "blue", "italic": true}));
    }

    #[test]
    fn test_patch_replaces_non_object_existing() {
        let result = apply_patch(Some(json!("legacy-string-style")), json!({"bold": true}));
        assert_eq!(result, json!({"bold": true}));
    }
}
