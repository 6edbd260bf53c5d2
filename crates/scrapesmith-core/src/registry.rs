use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AppError;
use crate::package::{ToolConfig, ToolConfigurationPackage, ToolKind};
use crate::traits::{ExtractionTool, ToolBackend};

type ToolConstructor = Arc<dyn Fn() -> Box<dyn ExtractionTool> + Send + Sync>;

#[derive(Clone)]
struct RegisteredTool {
    kind: ToolKind,
    constructor: ToolConstructor,
}

/// Tool constructors keyed by tool identifier.
///
/// Each call to [`create`](Self::create) builds a fresh instance, so every
/// engine run owns its tools and their lifecycle.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, T>(&mut self, tool_id: impl Into<String>, kind: ToolKind, constructor: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: ExtractionTool + 'static,
    {
        let constructor: ToolConstructor =
            Arc::new(move || Box::new(constructor()) as Box<dyn ExtractionTool>);
        self.tools
            .insert(tool_id.into(), RegisteredTool { kind, constructor });
    }

    pub fn with<F, T>(mut self, tool_id: impl Into<String>, kind: ToolKind, constructor: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: ExtractionTool + 'static,
    {
        self.register(tool_id, kind, constructor);
        self
    }

    pub fn contains(&self, tool_id: &str) -> bool {
        self.tools.contains_key(tool_id)
    }

    pub fn kind_of(&self, tool_id: &str) -> Option<ToolKind> {
        self.tools.get(tool_id).map(|t| t.kind)
    }

    /// Registered ids, sorted.
    pub fn tool_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn create(&self, tool_id: &str) -> Result<Box<dyn ExtractionTool>, AppError> {
        self.tools
            .get(tool_id)
            .map(|t| (t.constructor)())
            .ok_or_else(|| AppError::UnknownTool(tool_id.to_string()))
    }
}

/// Local tool-invocation path: runs a registered tool in-process.
///
/// The payload must carry a `url`; `selectors` and `params` are optional and
/// become the tool's configuration. A full `package` may be supplied instead.
#[derive(Clone)]
pub struct RegistryBackend {
    registry: ToolRegistry,
}

impl RegistryBackend {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    fn package_from_payload(
        &self,
        tool_name: &str,
        payload: &serde_json::Value,
    ) -> Result<ToolConfigurationPackage, AppError> {
        if let Some(package) = payload.get("package") {
            let package: ToolConfigurationPackage = serde_json::from_value(package.clone())?;
            if package.primary_tool.tool_id != tool_name {
                return Err(AppError::ValidationError(format!(
                    "package primary tool '{}' does not match requested tool '{tool_name}'",
                    package.primary_tool.tool_id
                )));
            }
            return Ok(package);
        }

        let kind = self
            .registry
            .kind_of(tool_name)
            .ok_or_else(|| AppError::UnknownTool(tool_name.to_string()))?;
        let mut config = ToolConfig::new(tool_name, kind);
        if let Some(selectors) = payload.get("selectors") {
            config.selectors = serde_json::from_value(selectors.clone())?;
        }
        if let Some(serde_json::Value::Object(params)) = payload.get("params") {
            config.params = params.clone();
        }
        Ok(ToolConfigurationPackage::new(config))
    }
}

impl ToolBackend for RegistryBackend {
    async fn invoke(
        &self,
        tool_name: &str,
        payload: &serde_json::Value,
        context: &serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        let url = payload
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::ValidationError("payload is missing 'url'".into()))?;
        let package = self.package_from_payload(tool_name, payload)?;

        tracing::debug!(tool = %tool_name, %url, ?context, "Invoking local tool");

        let mut tool = self.registry.create(tool_name)?;
        let result = match tool.initialize(&package.primary_tool).await {
            Ok(()) => tool.execute(url, &package).await,
            Err(e) => Err(e),
        };
        tool.cleanup().await;

        let output = result?;
        Ok(serde_json::json!({
            "data": output.data,
            "metadata": output.metadata,
        }))
    }
}
