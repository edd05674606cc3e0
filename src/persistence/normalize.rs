//! Fill required document sections with zero values
//!
//! Downstream screens read these sections unconditionally, so a loaded
//! document always carries them even if an older build never wrote them.

use serde_json::{Map, Value, json};

/// Required top-level sections and their zero values
pub fn required_sections() -> [(&'static str, Value); 7] {
    [
        ("player", json!({})),
        ("currencies", json!({ "coins": 0, "gems": 0, "hearts": 0 })),
        ("pets", json!([])),
        ("npcBonds", json!({})),
        ("memories", json!({ "unpublished": [], "published": [] })),
        ("activeShifts", json!([])),
        ("session", json!({})),
    ]
}

/// Insert missing (or null) required sections; fill missing keys inside
/// object sections one level deep. Present values are never overwritten.
pub fn normalize_document(document: &mut Value) {
    if !document.is_object() {
        log::warn!("Loaded document is not an object; replacing with defaults");
        *document = Value::Object(Map::new());
    }
    let Some(root) = document.as_object_mut() else {
        return;
    };

    for (name, zero) in required_sections() {
        match root.get_mut(name) {
            None | Some(Value::Null) => {
                root.insert(name.to_string(), zero);
            }
            Some(Value::Object(section)) => {
                if let Value::Object(defaults) = zero {
                    for (key, value) in defaults {
                        section.entry(key).or_insert(value);
                    }
                }
            }
            Some(_) => {}
        }
    }
}
