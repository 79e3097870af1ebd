// Tool abstractions for agents
//
// Tools are the actions an agent can take between thoughts (web search,
// asking a coworker). This module defines the tool interface and the
// argument schema shown to the model.

pub mod delegation;
pub mod serper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::sync::Arc;

use crate::error::Result;

pub use delegation::{ASK_QUESTION_TOOL, DELEGATE_WORK_TOOL, delegation_tools};
pub use serper::{SERPER_API_KEY_ENV, SerperSearchTool};

/// Tool parameters schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameters {
    /// Type (always "object" for function parameters)
    #[serde(rename = "type")]
    pub param_type: String,
    /// Property definitions, ordered by name so prompts are stable
    pub properties: BTreeMap<String, ToolPropertySchema>,
    /// Required property names
    pub required: Vec<String>,
}

impl ToolParameters {
    /// Create a new tool parameters schema
    pub fn new() -> Self {
        Self { param_type: "object".to_string(), properties: BTreeMap::new(), required: Vec::new() }
    }

    /// Add a property to the schema
    #[must_use]
    pub fn add_property(
        mut self,
        name: impl Into<String>,
        property_type: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(
            name.clone(),
            ToolPropertySchema {
                property_type: property_type.into(),
                description: description.into(),
            },
        );
        if required {
            self.required.push(name);
        }
        self
    }

    /// Returns the only required parameter, if there is exactly one.
    pub fn sole_required(&self) -> Option<&str> {
        match self.required.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    /// Compact one-line rendering used in prompts, e.g.
    /// `{"search_query": {"type": "string", "description": "..."}}`.
    pub fn describe(&self) -> String {
        let mut out = String::from("{");
        for (i, (name, schema)) in self.properties.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(
                out,
                "\"{}\": {{\"type\": \"{}\", \"description\": \"{}\"}}",
                name, schema.property_type, schema.description
            );
        }
        out.push('}');
        out
    }
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self::new()
    }
}

/// Tool property schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPropertySchema {
    /// Property type
    #[serde(rename = "type")]
    pub property_type: String,
    /// Property description
    pub description: String,
}

/// Arguments passed to tool handler
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    /// Parsed arguments as JSON value
    pub args: Value,
}

impl ToolArguments {
    /// Create new tool arguments
    pub fn new(args: Value) -> Self {
        Self { args }
    }

    /// Get argument as string. Numbers and booleans are stringified.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.args.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Get argument as u64, accepting numeric strings
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        let value = self.args.get(key)?;
        value.as_u64().or_else(|| value.as_str()?.trim().parse().ok())
    }

    /// Returns the names of `required` parameters that are missing or null.
    pub fn missing<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|name| self.args.get(name.as_str()).is_none_or(Value::is_null))
            .map(String::as_str)
            .collect()
    }
}

/// Result from tool execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether execution succeeded
    pub success: bool,
    /// Output from the tool, shown to the model as the observation
    pub output: String,
    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(output: impl Into<String>) -> Self {
        Self { success: true, output: output.into(), metadata: HashMap::new() }
    }

    /// Create an error result
    pub fn error(output: impl Into<String>) -> Self {
        Self { success: false, output: output.into(), metadata: HashMap::new() }
    }

    /// Add metadata to the result
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Handler for tool execution
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with given arguments
    ///
    /// Recoverable failures (bad input, upstream HTTP errors) should be
    /// returned as `ToolResult::error` so the agent can react to them.
    async fn execute(&self, args: &ToolArguments) -> Result<ToolResult>;
}

/// Tool definition
#[derive(Clone)]
pub struct Tool {
    /// Tool name, as the model writes it after `Action:`
    pub name: String,
    /// Tool description
    pub description: String,
    /// Parameter schema
    pub parameters: ToolParameters,
    /// Handler for executing the tool
    pub handler: Arc<dyn ToolHandler>,
}

impl Tool {
    /// Create a new tool
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self { name: name.into(), description: description.into(), parameters, handler }
    }

    /// Whether `name` refers to this tool (trimmed, case-insensitive).
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.trim())
    }

    /// Execute this tool with given arguments
    pub async fn execute(&self, args: &ToolArguments) -> Result<ToolResult> {
        self.handler.execute(args).await
    }
}

// Implement Debug manually since Arc<dyn ToolHandler> doesn't implement Debug
impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("handler", &"<handler>")
            .finish()
    }
}
