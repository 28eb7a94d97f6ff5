//! Output schema sent as a generation constraint with every analysis request.
//!
//! The schema is derived from [`Assessment`](crate::models::Assessment) with
//! `schemars` and then flattened into the self-contained form the generative
//! endpoint accepts: `$ref`s are inlined, single-element `allOf` wrappers are
//! unwrapped, and the `definitions` / `$schema` / `title` keys are dropped.
//!
//! Type-level doc comments become `description`s under schemars; those are
//! stripped so only field-level descriptions reach the model.

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

use crate::models::Assessment;

/// Schema for a response: an array with one assessment object per novel.
pub fn response_schema() -> Value {
    inline_schema::<Vec<Assessment>>()
}

/// Generate a fully inlined JSON schema for `T`.
pub fn inline_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_default();

    let definitions = value.get("definitions").cloned().map(|mut defs| {
        if let Value::Object(map) = &mut defs {
            for def in map.values_mut() {
                strip_description(def);
            }
        }
        defs
    });
    if let Some(defs) = definitions {
        inline_refs(&mut value, &defs);
    }

    strip_description(&mut value);
    if let Value::Object(map) = &mut value {
        map.remove("definitions");
        map.remove("$schema");
        map.remove("title");
    }
    value
}

fn strip_description(value: &mut Value) {
    if let Value::Object(map) = value {
        map.remove("description");
    }
}

fn inline_refs(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(ref_path)) = map.get("$ref").cloned() {
                if let Some(name) = ref_path.strip_prefix("#/definitions/") {
                    if let Some(def) = definitions.get(name) {
                        *value = def.clone();
                        inline_refs(value, definitions);
                        return;
                    }
                }
            }

            if let Some(Value::Array(all_of)) = map.get("allOf").cloned() {
                if all_of.len() == 1 {
                    let description = map.get("description").cloned();
                    if let Some(inner) = all_of.into_iter().next() {
                        *value = inner;
                        inline_refs(value, definitions);
                        if let (Some(desc), Value::Object(m)) = (description, &mut *value) {
                            m.insert("description".to_string(), desc);
                        }
                        return;
                    }
                }
            }

            for (_, v) in map.iter_mut() {
                inline_refs(v, definitions);
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                inline_refs(item, definitions);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enum_values(prop: &Value) -> Vec<String> {
        prop["enum"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_schema_is_array_of_objects() {
        let schema = response_schema();
        assert_eq!(schema["type"], "array");
        assert_eq!(schema["items"]["type"], "object");
        let text = serde_json::to_string(&schema).unwrap();
        assert!(!text.contains("$ref"));
        assert!(!text.contains("definitions"));
    }

    #[test]
    fn test_nine_required_fields_without_usernames() {
        let schema = response_schema();
        let required: Vec<&str> = schema["items"]["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(required.len(), 9);
        for field in [
            "novelSummary",
            "reviewSummary",
            "assessment",
            "summary",
            "characterDevelopment",
            "plotStructure",
            "worldBuilding",
            "themesAndMessages",
            "writingStyle",
        ] {
            assert!(required.contains(&field), "missing {}", field);
        }
        assert!(schema["items"]["properties"].get("availableUsernames").is_none());
    }

    #[test]
    fn test_enum_constraints() {
        let schema = response_schema();
        let props = &schema["items"]["properties"];
        assert_eq!(enum_values(&props["assessment"]), vec!["Good", "Mixed", "Bad"]);
        for category in [
            "characterDevelopment",
            "plotStructure",
            "worldBuilding",
            "themesAndMessages",
            "writingStyle",
        ] {
            assert_eq!(props[category]["type"], "string");
            assert_eq!(
                enum_values(&props[category]),
                vec!["Good", "Mixed", "Bad", "Unknown"]
            );
        }
        assert_eq!(props["novelSummary"]["type"], "string");
        assert!(props["novelSummary"]["description"].is_string());
    }

    #[test]
    fn test_only_field_docs_become_descriptions() {
        let schema = response_schema();
        assert!(schema.get("description").is_none());
        assert!(schema["items"].get("description").is_none());

        let props = schema["items"]["properties"].as_object().unwrap();
        let described: Vec<&str> = props
            .iter()
            .filter(|(_, p)| p.get("description").is_some())
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(described.len(), 3);
        for field in ["novelSummary", "reviewSummary", "summary"] {
            assert!(described.contains(&field), "{} lost its description", field);
        }
        assert!(props["plotStructure"].get("description").is_none());
        assert!(props["assessment"].get("description").is_none());
    }
}
