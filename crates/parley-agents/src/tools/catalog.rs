use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

/// A tool as the host describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// Either a bare `properties` map or a full `{"type": "object", ...}` schema.
    pub parameter_schema: Value,
    pub required: BTreeSet<String>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_schema: Value::Object(Map::new()),
            required: BTreeSet::new(),
        }
    }

    /// Add one parameter to the bare `properties` map.
    pub fn with_parameter(mut self, name: impl Into<String>, schema: Value, required: bool) -> Self {
        let name = name.into();
        if !self.parameter_schema.is_object() {
            self.parameter_schema = Value::Object(Map::new());
        }
        if let Value::Object(props) = &mut self.parameter_schema {
            props.insert(name.clone(), schema);
        }
        if required {
            self.required.insert(name);
        }
        self
    }

    /// Split a JSON-Schema input schema into properties and required names.
    pub fn from_input_schema(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
    ) -> Self {
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let properties = schema
            .get("properties")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        Self {
            name: name.into(),
            description: description.into(),
            parameter_schema: properties,
            required,
        }
    }
}

/// OpenAI-style function declaration offered to a tool-capable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl FunctionSchema {
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

fn is_full_schema(map: &Map<String, Value>) -> bool {
    map.get("type").and_then(Value::as_str) == Some("object")
        && map.get("properties").is_some_and(Value::is_object)
}

pub fn to_function_schema(descriptor: &ToolDescriptor) -> FunctionSchema {
    let properties = match &descriptor.parameter_schema {
        Value::Object(map) if is_full_schema(map) => map["properties"].clone(),
        Value::Object(map) => Value::Object(map.clone()),
        _ => Value::Object(Map::new()),
    };
    // BTreeSet iteration gives a stable order.
    let required: Vec<&str> = descriptor.required.iter().map(String::as_str).collect();

    FunctionSchema {
        kind: "function".to_string(),
        function: FunctionDefinition {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        },
    }
}

pub fn to_function_schemas(descriptors: &[ToolDescriptor]) -> Vec<FunctionSchema> {
    descriptors.iter().map(to_function_schema).collect()
}

/// Decode model-supplied arguments. Anything that is not a JSON object
/// becomes an empty map.
pub fn parse_arguments(raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            debug!(kind = json_kind(&other), "tool arguments are not an object");
            Map::new()
        }
        Err(e) => {
            debug!(error = %e, "tool arguments are not valid JSON");
            Map::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_from_bare_properties() {
        let descriptor = ToolDescriptor::new("get_rate", "Current exchange rate")
            .with_parameter("currency", json!({"type": "string"}), true)
            .with_parameter("date", json!({"type": "string"}), false);

        let schema = to_function_schema(&descriptor);

        assert_eq!(schema.kind, "function");
        assert_eq!(schema.name(), "get_rate");
        assert_eq!(
            schema.function.parameters,
            json!({
                "type": "object",
                "properties": {
                    "currency": {"type": "string"},
                    "date": {"type": "string"}
                },
                "required": ["currency"]
            })
        );
    }

    #[test]
    fn full_schema_is_unwrapped() {
        let descriptor = ToolDescriptor {
            name: "search".to_string(),
            description: "Search notes".to_string(),
            parameter_schema: json!({
                "type": "object",
                "properties": {"q": {"type": "string"}}
            }),
            required: ["q".to_string()].into_iter().collect(),
        };

        let params = to_function_schema(&descriptor).function.parameters;
        assert_eq!(params["properties"], json!({"q": {"type": "string"}}));
        assert_eq!(params["required"], json!(["q"]));
    }

    #[test]
    fn required_names_are_sorted() {
        let descriptor = ToolDescriptor::new("t", "")
            .with_parameter("zeta", json!({}), true)
            .with_parameter("alpha", json!({}), true);
        let params = to_function_schema(&descriptor).function.parameters;
        assert_eq!(params["required"], json!(["alpha", "zeta"]));
    }

    #[test]
    fn input_schema_is_split() {
        let descriptor = ToolDescriptor::from_input_schema(
            "add_note",
            "Store a note",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
        );
        assert_eq!(descriptor.parameter_schema, json!({"text": {"type": "string"}}));
        assert!(descriptor.required.contains("text"));
    }

    #[test]
    fn malformed_arguments_become_empty() {
        assert!(parse_arguments("").is_empty());
        assert!(parse_arguments("{not json").is_empty());
        assert!(parse_arguments("[1, 2]").is_empty());
        assert!(parse_arguments("\"USD\"").is_empty());

        let parsed = parse_arguments(r#"{"currency": "USD"}"#);
        assert_eq!(parsed["currency"], "USD");
    }
}
