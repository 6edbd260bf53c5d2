use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const CURRENT_SCHEMA_VERSION: &str = "1.0";

/// Capability class of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Scraper,
    Proxy,
    AntiBlocking,
    Captcha,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Scraper => "scraper",
            ToolKind::Proxy => "proxy",
            ToolKind::AntiBlocking => "anti_blocking",
            ToolKind::Captcha => "captcha",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "scraper" => Ok(ToolKind::Scraper),
            "proxy" => Ok(ToolKind::Proxy),
            "anti_blocking" => Ok(ToolKind::AntiBlocking),
            "captcha" => Ok(ToolKind::Captcha),
            _ => Err(format!("Unknown tool kind: {}", s)),
        }
    }
}

/// Configuration for a single tool inside a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    /// Registry key of the tool (e.g. `"static_html"`).
    pub tool_id: String,
    pub kind: ToolKind,
    /// Output field name → CSS selector.
    #[serde(default)]
    pub selectors: BTreeMap<String, String>,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ToolConfig {
    pub fn new(tool_id: impl Into<String>, kind: ToolKind) -> Self {
        Self {
            tool_id: tool_id.into(),
            kind,
            selectors: BTreeMap::new(),
            params: serde_json::Map::new(),
        }
    }

    pub fn scraper(tool_id: impl Into<String>) -> Self {
        Self::new(tool_id, ToolKind::Scraper)
    }

    pub fn with_selector(mut self, field: impl Into<String>, selector: impl Into<String>) -> Self {
        self.selectors.insert(field.into(), selector.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(|v| v.as_u64())
    }
}

/// Declarative description of which tools to run, with their parameters.
///
/// Immutable once produced by a stage: refinement produces a new package
/// rather than editing the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfigurationPackage {
    pub schema_version: String,
    pub primary_tool: ToolConfig,
    #[serde(default)]
    pub auxiliary_tools: Vec<ToolConfig>,
    #[serde(default)]
    pub expected_output_schema: serde_json::Value,
}

impl ToolConfigurationPackage {
    pub fn new(primary_tool: ToolConfig) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            primary_tool,
            auxiliary_tools: Vec::new(),
            expected_output_schema: serde_json::Value::Null,
        }
    }

    pub fn with_auxiliary(mut self, tool: ToolConfig) -> Self {
        self.auxiliary_tools.push(tool);
        self
    }

    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.expected_output_schema = schema;
        self
    }

    /// First auxiliary tool of the given kind, if any.
    pub fn auxiliary(&self, kind: ToolKind) -> Option<&ToolConfig> {
        self.auxiliary_tools.iter().find(|t| t.kind == kind)
    }
}
