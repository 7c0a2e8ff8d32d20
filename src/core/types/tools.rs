//! Tool and function-calling types

use serde::{Deserialize, Serialize};

/// Tool definition offered to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool type, currently always "function"
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function description
    pub function: FunctionDefinition,
}

impl Tool {
    pub fn function(function: FunctionDefinition) -> Self {
        Self {
            tool_type: "function".to_string(),
            function,
        }
    }
}

/// Function signature exposed as a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name
    pub name: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON-schema of the parameters object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Tool-choice policy
///
/// Wire forms: `"none"`, `"auto"`, or `{"type": "function", "function": {"name": "..."}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// "none" or "auto"
    Mode(String),
    /// A specific named function
    Named {
        #[serde(rename = "type")]
        choice_type: String,
        function: NamedFunction,
    },
}

impl ToolChoice {
    pub fn none() -> Self {
        ToolChoice::Mode("none".to_string())
    }

    pub fn auto() -> Self {
        ToolChoice::Mode("auto".to_string())
    }

    pub fn named(name: impl Into<String>) -> Self {
        ToolChoice::Named {
            choice_type: "function".to_string(),
            function: NamedFunction { name: name.into() },
        }
    }
}

/// Reference to a function by name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedFunction {
    pub name: String,
}

/// A complete tool call emitted by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier
    pub id: String,
    /// Tool type, currently always "function"
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Invoked function with serialized arguments
    pub function: FunctionCall,
}

/// Function invocation payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments string
    pub arguments: String,
}

/// Tool call partial inside a streaming delta
///
/// Partials for the same logical call share an `index`; the streaming
/// decoder accumulates them into a complete [`ToolCall`] at finish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCallDelta>,
}

/// Function call fragment inside a tool call delta
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Response format constraint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFormat {
    /// "text" or "json_object"
    #[serde(rename = "type")]
    pub format_type: String,
}

impl ResponseFormat {
    pub fn text() -> Self {
        Self {
            format_type: "text".to_string(),
        }
    }

    pub fn json() -> Self {
        Self {
            format_type: "json_object".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_choice_wire_forms() {
        assert_eq!(
            serde_json::to_string(&ToolChoice::auto()).unwrap(),
            "\"auto\""
        );
        let named = serde_json::to_value(ToolChoice::named("lookup")).unwrap();
        assert_eq!(named["type"], "function");
        assert_eq!(named["function"]["name"], "lookup");
    }

    #[test]
    fn tool_choice_parses_both_forms() {
        let auto: ToolChoice = serde_json::from_str("\"auto\"").unwrap();
        assert!(matches!(auto, ToolChoice::Mode(m) if m == "auto"));

        let named: ToolChoice =
            serde_json::from_str(r#"{"type":"function","function":{"name":"f"}}"#).unwrap();
        assert!(matches!(named, ToolChoice::Named { .. }));
    }
}
