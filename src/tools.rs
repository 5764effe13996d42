//! Tool registry shared by every session.
//!
//! Callers register [`ToolSpec`]s once; `chat` resolves them by name at call time
//! and hands the resolved specs to the transport, which advertises their
//! [`ToolDefinition`]s to the model and invokes the handlers on tool calls.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::ClientError;

/// String accepted in place of a name list to request every registered tool.
pub const ALL_TOOLS: &str = "all";

/// Callable behind a tool, invoked with named parameters.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, ClientError>;
}

#[async_trait]
impl<F> ToolHandler for F
where
    F: Fn(Map<String, Value>) -> Result<Value, ClientError> + Send + Sync,
{
    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, ClientError> {
        self(arguments)
    }
}

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

/// Declared shape of one named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    #[serde(rename = "type")]
    pub kind: PropertyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

impl Property {
    pub fn new(kind: PropertyKind) -> Self {
        Self {
            kind,
            description: None,
            allowed: None,
        }
    }

    pub fn string() -> Self {
        Self::new(PropertyKind::String)
    }

    pub fn number() -> Self {
        Self::new(PropertyKind::Number)
    }

    pub fn integer() -> Self {
        Self::new(PropertyKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(PropertyKind::Boolean)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_enum<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// Object schema of a tool's parameters: named properties plus the required subset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    pub properties: BTreeMap<String, Property>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ToolParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: impl Into<String>, property: Property) -> Self {
        self.properties.insert(name.into(), property);
        self
    }

    pub fn required(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.required.contains(&name) {
            self.required.push(name);
        }
        self
    }

    /// JSON Schema object describing the parameters.
    pub fn to_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": self.properties,
            "required": self.required,
        })
    }
}

/// Declarative definition a transport serializes into its wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique name exposed to the model.
    pub name: String,
    /// Natural-language description of the tool purpose.
    pub description: String,
    /// JSON Schema describing the input payload.
    pub input_schema: Value,
}

/// A registered tool: metadata plus the handler that runs it.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
    handler: Arc<dyn ToolHandler>,
}

impl ToolSpec {
    /// # Examples
    ///
    /// ```
    /// use llm_relay::error::ClientError;
    /// use llm_relay::tools::{Property, ToolParameters, ToolSpec};
    /// use serde_json::{Map, Value, json};
    ///
    /// let weather = ToolSpec::new(
    ///     "weather",
    ///     "Lookup the weather in a location",
    ///     ToolParameters::new()
    ///         .property("location", Property::string().with_description("e.g. Toronto"))
    ///         .property("unit", Property::string().with_enum(["Celsius", "Fahrenheit"]))
    ///         .required("location"),
    ///     |args: Map<String, Value>| -> Result<Value, ClientError> {
    ///         Ok(json!(format!("22° in {}", args["location"])))
    ///     },
    /// );
    /// assert_eq!(weather.definition().input_schema["required"], json!(["location"]));
    /// ```
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(handler),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.parameters.to_schema(),
        }
    }

    /// Runs the handler after checking every required parameter is present.
    pub async fn invoke(&self, arguments: Map<String, Value>) -> Result<Value, ClientError> {
        if let Some(missing) = self
            .parameters
            .required
            .iter()
            .find(|name| !arguments.contains_key(name.as_str()))
        {
            return Err(ClientError::validation(format!(
                "tool {} is missing required argument {missing}",
                self.name
            )));
        }
        self.handler.call(arguments).await
    }
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// Which tools a chat call offers to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSelection {
    /// Every registered tool, in registration order.
    All,
    /// Exactly these names; any unknown name fails the call.
    Named(Vec<String>),
}

impl ToolSelection {
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ToolSelection::Named(names.into_iter().map(Into::into).collect())
    }

    /// JSON form accepted under the `tools` call parameter.
    pub fn to_value(&self) -> Value {
        match self {
            ToolSelection::All => Value::String(ALL_TOOLS.to_string()),
            ToolSelection::Named(names) => json!(names),
        }
    }
}

impl TryFrom<&Value> for ToolSelection {
    type Error = ClientError;

    /// Accepts an array of tool names or the [`ALL_TOOLS`] sentinel.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::tools::ToolSelection;
    /// use serde_json::json;
    ///
    /// assert_eq!(ToolSelection::try_from(&json!("all")).unwrap(), ToolSelection::All);
    /// assert!(ToolSelection::try_from(&json!("weather")).is_err());
    /// ```
    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(sentinel) if sentinel == ALL_TOOLS => Ok(ToolSelection::All),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        ClientError::InvalidToolsArgument {
                            message: format!("tool names must be strings, got {item}"),
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(ToolSelection::Named),
            other => Err(ClientError::InvalidToolsArgument {
                message: format!("expected a list of tool names or {ALL_TOOLS:?}, got {other}"),
            }),
        }
    }
}

/// Name-keyed tool catalog, safe to mutate and read from many threads.
///
/// Each session holds an `Arc` to one; [`ToolRegistry::global`] is the
/// process-wide default, while tests and embedders can build isolated ones.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<Vec<ToolSpec>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by sessions that were not given one.
    pub fn global() -> Arc<ToolRegistry> {
        static GLOBAL: OnceLock<Arc<ToolRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ToolRegistry::new())).clone()
    }

    /// Inserts `spec`, replacing any tool with the same name in place.
    pub fn register(&self, spec: ToolSpec) {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        debug!(tool = %spec.name, "registered tool");
        match tools.iter_mut().find(|existing| existing.name == spec.name) {
            Some(existing) => *existing = spec,
            None => tools.push(spec),
        }
    }

    /// Removes the named tool. Returns whether anything was removed.
    pub fn disable(&self, name: &str) -> bool {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        let before = tools.len();
        tools.retain(|tool| tool.name != name);
        let removed = tools.len() != before;
        if removed {
            debug!(tool = name, "disabled tool");
        }
        removed
    }

    /// Looks up every name; fails on the first unknown one without returning
    /// a partial list.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<ToolSpec>, ClientError> {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                tools
                    .iter()
                    .find(|tool| tool.name == name)
                    .cloned()
                    .ok_or_else(|| ClientError::UnknownTool {
                        name: name.to_string(),
                    })
            })
            .collect()
    }

    /// Every registered tool in registration order.
    pub fn resolve_all(&self) -> Vec<ToolSpec> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn select(&self, selection: &ToolSelection) -> Result<Vec<ToolSpec>, ClientError> {
        match selection {
            ToolSelection::All => Ok(self.resolve_all()),
            ToolSelection::Named(names) => self.resolve(names.as_slice()),
        }
    }

    pub fn get(&self, name: &str) -> Option<ToolSpec> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|tool| tool.name == name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|tool| tool.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes a registered tool by name. The registry lock is released before
    /// the handler runs.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<Value, ClientError> {
        let spec = self.get(name).ok_or_else(|| ClientError::UnknownTool {
            name: name.to_string(),
        })?;
        spec.invoke(arguments).await
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
