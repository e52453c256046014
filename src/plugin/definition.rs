//! Plugin definition files and validation.
//!
//! Well-behaved plugins ship a `plugin.json` (or `plugin.yaml`/`.yml`)
//! describing the executables they need on `PATH` and a schema for their
//! configuration. Validation is opt-in; when enabled, every problem for a
//! plugin is collected and reported as one aggregated error rather than
//! failing on the first.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use super::PluginDescriptor;
use crate::errors::PluginError;

const DEFINITION_FILES: &[&str] = &["plugin.json", "plugin.yaml", "plugin.yml"];

/// The parsed definition file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginDefinition {
    #[serde(default)]
    pub name: Option<String>,
    /// Executables that must be discoverable in `PATH`.
    #[serde(default)]
    pub requirements: Vec<String>,
    /// JSON-schema-shaped description of the configuration. Only the
    /// `required` list and per-property `type` fields are enforced.
    #[serde(default)]
    pub configuration: Option<Value>,
}

/// Load the definition from a plugin checkout, if it ships one.
pub fn load_definition(dir: &Path) -> Result<Option<PluginDefinition>, PluginError> {
    for file in DEFINITION_FILES {
        let path = dir.join(file);
        if !path.is_file() {
            continue;
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| PluginError::Definition {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let definition = if file.ends_with(".json") {
            serde_json::from_str(&raw).map_err(|e| PluginError::Definition {
                path: path.clone(),
                message: e.to_string(),
            })?
        } else {
            serde_yaml::from_str(&raw).map_err(|e| PluginError::Definition {
                path: path.clone(),
                message: e.to_string(),
            })?
        };
        return Ok(Some(definition));
    }
    Ok(None)
}

/// Check requirements and configuration against the definition. Returns
/// every problem found, empty when the plugin is good to run.
pub fn validate_plugin(descriptor: &PluginDescriptor, definition: &PluginDefinition) -> Vec<String> {
    let mut problems = Vec::new();

    for requirement in &definition.requirements {
        if which::which(requirement).is_err() {
            problems.push(format!(
                "requirement {requirement:?} could not be found in PATH"
            ));
        }
    }

    if let Some(schema) = &definition.configuration {
        validate_configuration(&descriptor.configuration, schema, &mut problems);
    }

    problems
}

fn validate_configuration(config: &Value, schema: &Value, problems: &mut Vec<String>) {
    let config_map = config.as_object();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            let present = config_map.map(|m| m.contains_key(key)).unwrap_or(false);
            if !present {
                problems.push(format!("missing required configuration key {key:?}"));
            }
        }
    }

    let (Some(config_map), Some(properties)) =
        (config_map, schema.get("properties").and_then(Value::as_object))
    else {
        return;
    };
    for (key, prop_schema) in properties {
        let Some(value) = config_map.get(key) else { continue };
        let Some(expected) = prop_schema.get("type").and_then(Value::as_str) else {
            continue;
        };
        if !type_matches(value, expected) {
            problems.push(format!(
                "configuration key {key:?} should be a {expected}, got {}",
                type_name(value)
            ));
        }
    }
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        // Unknown schema types are not ours to enforce.
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn descriptor_with(config: Value) -> PluginDescriptor {
        PluginDescriptor::parse("github.com/org/demo#v1", config).unwrap()
    }

    #[test]
    fn loads_json_definition() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("plugin.json"),
            r#"{"name": "demo", "requirements": ["sh"]}"#,
        )
        .unwrap();
        let def = load_definition(dir.path()).unwrap().unwrap();
        assert_eq!(def.name.as_deref(), Some("demo"));
        assert_eq!(def.requirements, vec!["sh"]);
    }

    #[test]
    fn loads_yaml_definition() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("plugin.yml"),
            "name: demo\nrequirements:\n  - sh\nconfiguration:\n  required:\n    - run\n",
        )
        .unwrap();
        let def = load_definition(dir.path()).unwrap().unwrap();
        assert!(def.configuration.is_some());
    }

    #[test]
    fn missing_definition_is_not_an_error() {
        let dir = tempdir().unwrap();
        assert!(load_definition(dir.path()).unwrap().is_none());
    }

    #[test]
    fn malformed_definition_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("plugin.json"), "{not json").unwrap();
        assert!(matches!(
            load_definition(dir.path()),
            Err(PluginError::Definition { .. })
        ));
    }

    #[test]
    fn validation_passes_for_satisfied_definition() {
        let def = PluginDefinition {
            name: Some("demo".to_string()),
            // `sh` exists everywhere these tests run.
            requirements: vec!["sh".to_string()],
            configuration: Some(json!({
                "required": ["run"],
                "properties": {"run": {"type": "string"}, "count": {"type": "integer"}}
            })),
        };
        let descriptor = descriptor_with(json!({"run": "app", "count": 3}));
        assert!(validate_plugin(&descriptor, &def).is_empty());
    }

    #[test]
    fn validation_aggregates_every_problem() {
        let def = PluginDefinition {
            name: None,
            requirements: vec!["definitely-not-a-real-binary-zzz".to_string()],
            configuration: Some(json!({
                "required": ["run"],
                "properties": {"count": {"type": "integer"}}
            })),
        };
        let descriptor = descriptor_with(json!({"count": "three"}));
        let problems = validate_plugin(&descriptor, &def);
        assert_eq!(problems.len(), 3, "{problems:?}");
        assert!(problems.iter().any(|p| p.contains("could not be found")));
        assert!(problems.iter().any(|p| p.contains("missing required")));
        assert!(problems.iter().any(|p| p.contains("should be a integer")));
    }

    #[test]
    fn null_configuration_fails_required_keys_only() {
        let def = PluginDefinition {
            name: None,
            requirements: vec![],
            configuration: Some(json!({"required": ["run"]})),
        };
        let descriptor = descriptor_with(Value::Null);
        let problems = validate_plugin(&descriptor, &def);
        assert_eq!(problems.len(), 1);
    }
}
