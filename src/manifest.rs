//! `package.json` rewriting.
//!
//! Dependency manifests are stripped of registry bookkeeping before they are
//! packed; the application's own manifest can receive caller overrides.

use serde_json::{Map, Value};

/// Name of the manifest file inside a dependency directory.
pub const MANIFEST_NAME: &str = "package.json";

fn is_removable(key: &str) -> bool {
    key.starts_with('_') || key == "dist" || key == "gitHead" || key == "keywords"
}

/// Removes bookkeeping properties from a parsed manifest.
///
/// Returns `true` when at least one property was removed. Key order of the
/// surviving properties is preserved.
pub fn strip_bookkeeping(manifest: &mut Map<String, Value>) -> bool {
    let before = manifest.len();
    manifest.retain(|key, _| !is_removable(key));
    manifest.len() != before
}

/// Cleans raw manifest bytes.
///
/// `None` means "unchanged": keep the original file. Unparsable input is
/// logged and left alone.
pub fn cleanup_manifest(raw: &[u8]) -> Option<String> {
    let mut value: Value = match serde_json::from_slice(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("Skipping manifest cleanup: {e}");
            return None;
        }
    };
    let Some(object) = value.as_object_mut() else {
        tracing::debug!("Skipping manifest cleanup: top level is not an object");
        return None;
    };
    if !strip_bookkeeping(object) {
        return None;
    }
    match serde_json::to_string_pretty(&value) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::debug!("Skipping manifest cleanup: {e}");
            None
        }
    }
}

/// Deep-merges `overrides` into `target`.
///
/// Objects merge key by key; anything else (arrays, scalars, `null`) replaces
/// the previous value.
pub fn deep_merge(target: &mut Value, overrides: &Value) {
    match (target, overrides) {
        (Value::Object(target), Value::Object(overrides)) => {
            for (key, value) in overrides {
                let nested = value.is_object() && target.get(key).is_some_and(Value::is_object);
                match target.get_mut(key) {
                    Some(existing) if nested => deep_merge(existing, value),
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, overrides) => *target = overrides.clone(),
    }
}

/// Applies `overrides` to the root manifest and serializes it unconditionally.
pub fn apply_overrides(raw: &[u8], overrides: &Value) -> Result<String, serde_json::Error> {
    let mut manifest: Value = serde_json::from_slice(raw)?;
    deep_merge(&mut manifest, overrides);
    serde_json::to_string_pretty(&manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn removes_bookkeeping_and_keeps_order() {
        let raw = br#"{"name":"dep","_private":1,"version":"1.0.0","dist":{},"main":"index.js","gitHead":"abc","keywords":["x"],"_resolved":"r"}"#;
        let cleaned = cleanup_manifest(raw).expect("rewritten");
        let value: Value = serde_json::from_str(&cleaned).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["name", "version", "main"]);
        assert!(cleaned.contains("\n  \"name\": \"dep\""));
    }

    #[test]
    fn untouched_manifest_signals_unchanged() {
        assert_eq!(cleanup_manifest(br#"{"name":"dep","version":"1.0.0"}"#), None);
    }

    #[test]
    fn malformed_manifest_is_tolerated() {
        assert_eq!(cleanup_manifest(b"{ not json"), None);
        assert_eq!(cleanup_manifest(b"[1, 2]"), None);
    }

    #[test]
    fn deep_merge_recurses_into_objects() {
        let mut target = json!({"name": "app", "build": {"a": 1, "b": [1, 2]}, "keep": true});
        deep_merge(&mut target, &json!({"build": {"b": [3], "c": null}, "version": "2.0.0"}));
        assert_eq!(
            target,
            json!({"name": "app", "build": {"a": 1, "b": [3], "c": null}, "keep": true, "version": "2.0.0"})
        );
    }

    #[test]
    fn overrides_always_reserialize() {
        let text = apply_overrides(br#"{"name":"app"}"#, &json!({})).unwrap();
        assert_eq!(text, "{\n  \"name\": \"app\"\n}");
    }
}
